//! Command sequences shared by every transport

use crate::config::ReadyPoll;
use crate::error::{Error, Result};
use crate::sfdp::SoftResetSupport;
use crate::spi::opcodes;

/// Primitive operations every flash link provides
pub trait FlashLink {
    /// Run a register/command transfer
    ///
    /// `address` of `None` means no address phase.
    fn command(&mut self, opcode: u8, address: Option<u32>, tx: &[u8], rx: &mut [u8])
        -> Result<()>;

    /// Read SFDP space (1-1-1, 3-byte address, 8 dummy cycles)
    fn read_sfdp(&mut self, address: u32, buf: &mut [u8]) -> Result<()>;

    /// Delay for the specified number of microseconds
    fn delay_us(&mut self, us: u32);

    /// Busy-bit polling policy
    fn ready_poll(&self) -> ReadyPoll;
}

/// JEDEC manufacturer and device ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JedecId {
    /// Manufacturer ID (first RDID byte)
    pub manufacturer: u8,
    /// Memory type and capacity bytes
    pub device: u16,
}

/// Read the JEDEC ID from a flash chip
pub fn read_id<L: FlashLink + ?Sized>(link: &mut L) -> Result<JedecId> {
    let mut buf = [0u8; 3];
    link.command(opcodes::RDID, None, &[], &mut buf)?;
    Ok(JedecId {
        manufacturer: buf[0],
        device: ((buf[1] as u16) << 8) | (buf[2] as u16),
    })
}

/// Read the status register 1
pub fn read_status1<L: FlashLink + ?Sized>(link: &mut L) -> Result<u8> {
    let mut buf = [0u8; 1];
    link.command(opcodes::RDSR, None, &[], &mut buf)?;
    Ok(buf[0])
}

/// Send the Write Enable command
pub fn write_enable<L: FlashLink + ?Sized>(link: &mut L) -> Result<()> {
    link.command(opcodes::WREN, None, &[], &mut [])
}

/// Send the Write Disable command
pub fn write_disable<L: FlashLink + ?Sized>(link: &mut L) -> Result<()> {
    link.command(opcodes::WRDI, None, &[], &mut [])
}

/// Poll until the Write In Progress bit clears
///
/// Sleeps `interval_us` before every status read. A failed status read
/// counts as busy. Returns [`Error::ReadyFailed`] once `max_retries`
/// reads have not seen the part idle.
pub fn wait_ready<L: FlashLink + ?Sized>(link: &mut L) -> Result<()> {
    let poll = link.ready_poll();
    for _ in 0..poll.max_retries {
        link.delay_us(poll.interval_us);
        match read_status1(link) {
            Ok(status) if status & opcodes::SR1_WIP == 0 => return Ok(()),
            Ok(_) => {}
            Err(_) => log::error!("Reading status register failed"),
        }
    }
    log::error!("Device not ready after {} polls", poll.max_retries);
    Err(Error::ReadyFailed)
}

/// Enable writes and verify the Write Enable Latch
///
/// Sends WREN, waits for the part, then checks WEL in SR1.
pub fn set_write_enable<L: FlashLink + ?Sized>(link: &mut L) -> Result<()> {
    write_enable(link).inspect_err(|_| log::error!("Sending WREN command failed"))?;
    wait_ready(link)?;
    let status = read_status1(link)?;
    if status & opcodes::SR1_WEL == 0 {
        log::error!("Write enable latch not set (SR1 0x{:02X})", status);
        return Err(Error::WrenFailed);
    }
    Ok(())
}

/// Reset the part with the advertised protocol, then wait for it
pub fn soft_reset<L: FlashLink + ?Sized>(link: &mut L, support: SoftResetSupport) -> Result<()> {
    match support {
        SoftResetSupport::InstrF0 => {
            log::debug!("Soft reset with 0xF0");
            link.command(opcodes::SOFT_RESET_F0, None, &[], &mut [])?;
        }
        SoftResetSupport::Reset66Then99 => {
            log::debug!("Soft reset with 0x66/0x99");
            link.command(opcodes::RSTEN, None, &[], &mut [])?;
            link.command(opcodes::RST, None, &[], &mut [])?;
        }
        SoftResetSupport::Unsupported => {
            log::error!("No supported soft reset protocol");
            return Err(crate::error::ParseError::NoSoftReset.into());
        }
    }
    wait_ready(link)
}

/// Clear every block protection bit with the global unlock instruction
pub fn global_unlock<L: FlashLink + ?Sized>(link: &mut L) -> Result<()> {
    set_write_enable(link)?;
    link.command(opcodes::ULBPR, None, &[], &mut [])?;
    wait_ready(link)
}

/// Write a register alone: WREN, the command, then wait for the part
pub fn write_register<L: FlashLink + ?Sized>(
    link: &mut L,
    opcode: u8,
    address: Option<u32>,
    data: &[u8],
) -> Result<()> {
    set_write_enable(link)?;
    link.command(opcode, address, data, &mut [])?;
    wait_ready(link)
}
