//! Block device facade
//!
//! [`QspifBlockDevice`] drives a QSPI controller and negotiates the
//! fastest bus mode the part and the controller share. [`SpifBlockDevice`]
//! drives a plain SPI master in 1-1-1 mode. Both implement
//! [`BlockDevice`]: every method takes `&self` and serializes on a
//! per-device lock, so a device can be shared between threads.
//!
//! `init` and `deinit` are reference counted. Geometry queries on a
//! device that is not initialized report 0.

mod qspif;
mod spif;

pub use qspif::QspifBlockDevice;
pub use spif::SpifBlockDevice;

use crate::error::Result;

/// Value of an erased byte
pub const ERASE_VALUE: u8 = 0xFF;

/// Block device contract
pub trait BlockDevice {
    /// Bring the device up (nested calls only count)
    fn init(&self) -> Result<()>;

    /// Undo one `init`; the last one releases the device
    fn deinit(&self) -> Result<()>;

    /// Read `buf.len()` bytes starting at `addr`
    fn read(&self, buf: &mut [u8], addr: u64) -> Result<()>;

    /// Program `data` at `addr`
    ///
    /// The range must have been erased. On failure the bytes from the
    /// failing page on are in an unknown state.
    fn program(&self, data: &[u8], addr: u64) -> Result<()>;

    /// Erase `[addr, addr + size)`
    ///
    /// Both ends must be aligned to the erase granularity at that
    /// address, see [`erase_size_at`](Self::erase_size_at).
    fn erase(&self, addr: u64, size: u64) -> Result<()>;

    /// Device size in bytes
    fn size(&self) -> u64;

    /// Minimum read unit
    fn read_size(&self) -> u64;

    /// Minimum program unit
    fn program_size(&self) -> u64;

    /// Erase granularity valid everywhere on the device (0 if none)
    fn erase_size(&self) -> u64;

    /// Erase granularity at `addr`
    fn erase_size_at(&self, addr: u64) -> u64;

    /// Value read back from erased bytes
    fn erase_value(&self) -> i32 {
        ERASE_VALUE as i32
    }

    /// Short device kind name
    fn block_type(&self) -> &'static str;
}

/// Check that `[addr, addr + len)` lies inside a device of `size` bytes
pub(crate) fn check_range(addr: u64, len: usize, size: u64) -> Result<()> {
    match addr.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => {
            log::error!("Access 0x{:X}+{} exceeds device size {}", addr, len, size);
            Err(crate::error::Error::AddressOutOfBounds)
        }
    }
}
