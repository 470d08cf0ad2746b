//! Single-lane SPI command adapter

use crate::bus::SpiMaster;
use crate::config::ReadyPoll;
use crate::error::{Error, Result};
use crate::spi::{AddressWidth, SpiCommand};

use super::common::FlashLink;

/// An SPI master paired with the address width in use
pub struct SpiLink<'a, M: SpiMaster + ?Sized> {
    master: &'a mut M,
    address_width: AddressWidth,
    poll: ReadyPoll,
}

impl<'a, M: SpiMaster + ?Sized> SpiLink<'a, M> {
    /// Borrow `master`
    pub fn new(master: &'a mut M, address_width: AddressWidth, poll: ReadyPoll) -> Self {
        Self {
            master,
            address_width,
            poll,
        }
    }

    fn wire_address(&self, address: u64) -> Result<u32> {
        if !self.address_width.reaches(address) {
            log::error!("Address 0x{:X} out of range", address);
            return Err(Error::AddressOutOfBounds);
        }
        Ok(address as u32)
    }

    /// Read `buf.len()` bytes, split by the master's transfer limit
    pub fn read(&mut self, instruction: u8, address: u64, buf: &mut [u8]) -> Result<()> {
        let chunk_size = self.master.max_transfer_len().max(1);
        let mut addr = address;
        for chunk in buf.chunks_mut(chunk_size) {
            let wire_addr = self.wire_address(addr)?;
            let len = chunk.len();
            let mut cmd = SpiCommand::read(instruction, wire_addr, self.address_width, chunk);
            self.master
                .execute(&mut cmd)
                .inspect_err(|_| log::error!("Read failed at 0x{:X}", addr))?;
            addr += len as u64;
        }
        Ok(())
    }

    /// Program up to one page; the caller keeps `data` inside a page
    pub fn program(&mut self, instruction: u8, address: u64, data: &[u8]) -> Result<()> {
        let wire_addr = self.wire_address(address)?;
        let mut cmd = SpiCommand::write(instruction, wire_addr, self.address_width, data);
        self.master
            .execute(&mut cmd)
            .inspect_err(|_| log::error!("Program failed at 0x{:X}", address))
    }

    /// Issue one erase command
    pub fn erase(&mut self, instruction: u8, address: u64) -> Result<()> {
        let wire_addr = self.wire_address(address)?;
        let mut cmd = SpiCommand::erase(instruction, wire_addr, self.address_width);
        self.master
            .execute(&mut cmd)
            .inspect_err(|_| log::error!("Erase 0x{:02X} failed at 0x{:X}", instruction, address))
    }
}

impl<M: SpiMaster + ?Sized> FlashLink for SpiLink<'_, M> {
    fn command(&mut self, opcode: u8, address: Option<u32>, tx: &[u8], rx: &mut [u8])
        -> Result<()> {
        let mut cmd = SpiCommand::transfer(opcode, address, self.address_width, tx, rx);
        self.master.execute(&mut cmd)
    }

    fn read_sfdp(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        let mut cmd = SpiCommand::read_sfdp(address, buf);
        self.master.execute(&mut cmd)
    }

    fn delay_us(&mut self, us: u32) {
        self.master.delay_us(us)
    }

    fn ready_poll(&self) -> ReadyPoll {
        self.poll
    }
}
