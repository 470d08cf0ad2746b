//! Transport trait definitions

use crate::error::Result;
use crate::spi::{BusFormat, SpiCommand};
use bitflags::bitflags;

bitflags! {
    /// Controller feature flags
    ///
    /// These flags indicate which bus modes a controller can drive. The
    /// capability negotiator only picks read modes the controller reports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SpiFeatures: u32 {
        /// Supports 4-byte addressing commands
        const FOUR_BYTE_ADDR = 1 << 0;
        /// Can read two bits at once (1-1-2 mode)
        const DUAL_IN        = 1 << 2;
        /// Can transfer two bits at once (1-2-2 mode)
        const DUAL_IO        = 1 << 3;
        /// Can read four bits at once (1-1-4 mode)
        const QUAD_IN        = 1 << 4;
        /// Can transfer four bits at once (1-4-4 mode)
        const QUAD_IO        = 1 << 5;
        /// Can send commands with quad I/O (4-4-4 mode)
        const QPI            = 1 << 6;
        /// Can send commands with dual I/O (2-2-2 mode)
        const DPI            = 1 << 7;

        /// Shorthand for dual mode (both DUAL_IN and DUAL_IO)
        const DUAL = Self::DUAL_IN.bits() | Self::DUAL_IO.bits();
        /// Shorthand for quad mode (both QUAD_IN and QUAD_IO)
        const QUAD = Self::QUAD_IN.bits() | Self::QUAD_IO.bits();
    }
}

impl Default for SpiFeatures {
    fn default() -> Self {
        SpiFeatures::empty()
    }
}

/// QSPI controller
///
/// The raw bus-transaction primitive used by
/// [`QspifBlockDevice`](crate::blockdev::QspifBlockDevice). Every transaction
/// runs in the format last set with [`configure_format`](Self::configure_format).
///
/// Implementations report transport faults (electrical, timing or
/// controller errors) as [`Error::DeviceError`](crate::Error::DeviceError).
pub trait QspiBus {
    /// Get the bus modes supported by this controller
    fn features(&self) -> SpiFeatures;

    /// Set the phase layout used by subsequent transactions
    fn configure_format(&mut self, format: &BusFormat) -> Result<()>;

    /// Run a read transaction: instruction, address, optional alternate
    /// bytes, dummy cycles, then `buf.len()` data bytes in
    fn read(&mut self, instruction: u8, alt: Option<u32>, address: u32, buf: &mut [u8])
        -> Result<()>;

    /// Run a write transaction: instruction, address, optional alternate
    /// bytes, then `data` out
    fn write(&mut self, instruction: u8, alt: Option<u32>, address: u32, data: &[u8])
        -> Result<()>;

    /// Run a generic command: instruction, optional address, `tx` out,
    /// then `rx.len()` bytes in
    ///
    /// An address of `None` means no address phase.
    fn command_transfer(
        &mut self,
        instruction: u8,
        address: Option<u32>,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<()>;

    /// Set the bus clock frequency
    fn set_frequency(&mut self, hz: u32) -> Result<()>;

    /// Delay for the specified number of microseconds
    fn delay_us(&mut self, us: u32);
}

impl<B: QspiBus + ?Sized> QspiBus for &mut B {
    fn features(&self) -> SpiFeatures {
        (**self).features()
    }

    fn configure_format(&mut self, format: &BusFormat) -> Result<()> {
        (**self).configure_format(format)
    }

    fn read(&mut self, instruction: u8, alt: Option<u32>, address: u32, buf: &mut [u8])
        -> Result<()> {
        (**self).read(instruction, alt, address, buf)
    }

    fn write(&mut self, instruction: u8, alt: Option<u32>, address: u32, data: &[u8])
        -> Result<()> {
        (**self).write(instruction, alt, address, data)
    }

    fn command_transfer(
        &mut self,
        instruction: u8,
        address: Option<u32>,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<()> {
        (**self).command_transfer(instruction, address, tx, rx)
    }

    fn set_frequency(&mut self, hz: u32) -> Result<()> {
        (**self).set_frequency(hz)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

// Boxed controllers so a device can hold `Box<dyn QspiBus + Send>`
#[cfg(feature = "alloc")]
impl<B: QspiBus + ?Sized> QspiBus for alloc::boxed::Box<B> {
    fn features(&self) -> SpiFeatures {
        (**self).features()
    }

    fn configure_format(&mut self, format: &BusFormat) -> Result<()> {
        (**self).configure_format(format)
    }

    fn read(&mut self, instruction: u8, alt: Option<u32>, address: u32, buf: &mut [u8])
        -> Result<()> {
        (**self).read(instruction, alt, address, buf)
    }

    fn write(&mut self, instruction: u8, alt: Option<u32>, address: u32, data: &[u8])
        -> Result<()> {
        (**self).write(instruction, alt, address, data)
    }

    fn command_transfer(
        &mut self,
        instruction: u8,
        address: Option<u32>,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<()> {
        (**self).command_transfer(instruction, address, tx, rx)
    }

    fn set_frequency(&mut self, hz: u32) -> Result<()> {
        (**self).set_frequency(hz)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

/// SPI Master trait
///
/// The plain (single I/O) SPI transport used by
/// [`SpifBlockDevice`](crate::blockdev::SpifBlockDevice). Each
/// [`SpiCommand`] is one chip-select-framed transaction.
pub trait SpiMaster {
    /// Get the features supported by this master
    fn features(&self) -> SpiFeatures;

    /// Get the maximum number of data bytes in a single transaction
    fn max_transfer_len(&self) -> usize {
        usize::MAX
    }

    /// Execute a single SPI command
    ///
    /// The command contains all the information needed for the transaction:
    /// - `opcode`: The SPI command opcode
    /// - `address`: Optional address (with width)
    /// - `dummy_cycles`: Number of dummy clock cycles after address
    /// - `write_data`: Data to write after the header
    /// - `read_buf`: Buffer to read data into
    fn execute(&mut self, cmd: &mut SpiCommand<'_>) -> Result<()>;

    /// Delay for the specified number of microseconds
    fn delay_us(&mut self, us: u32);
}

impl<M: SpiMaster + ?Sized> SpiMaster for &mut M {
    fn features(&self) -> SpiFeatures {
        (**self).features()
    }

    fn max_transfer_len(&self) -> usize {
        (**self).max_transfer_len()
    }

    fn execute(&mut self, cmd: &mut SpiCommand<'_>) -> Result<()> {
        (**self).execute(cmd)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

#[cfg(feature = "alloc")]
impl<M: SpiMaster + ?Sized> SpiMaster for alloc::boxed::Box<M> {
    fn features(&self) -> SpiFeatures {
        (**self).features()
    }

    fn max_transfer_len(&self) -> usize {
        (**self).max_transfer_len()
    }

    fn execute(&mut self, cmd: &mut SpiCommand<'_>) -> Result<()> {
        (**self).execute(cmd)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}
