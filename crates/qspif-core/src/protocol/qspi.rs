//! QSPI command adapter

use crate::bus::{FormatGuard, QspiBus};
use crate::config::ReadyPoll;
use crate::error::{Error, Result};
use crate::negotiate::BusConfig;
use crate::spi::{opcodes, AddressWidth, BusFormat};

use super::common::{self, FlashLink};

/// Bytes addressable through one extended address register value
const EXT_ADDR_WINDOW: u64 = AddressWidth::THREE_BYTE_LIMIT;

/// A QSPI bus paired with the negotiated configuration for one operation
///
/// Created under the device lock and dropped before it is released.
/// Register commands, program and erase run in the command format the
/// bus is left in; data reads and SFDP reads switch format through a
/// [`FormatGuard`].
pub struct QspiLink<'a, B: QspiBus + ?Sized> {
    bus: &'a mut B,
    config: &'a BusConfig,
    poll: ReadyPoll,
}

impl<'a, B: QspiBus + ?Sized> QspiLink<'a, B> {
    /// Borrow `bus` and `config`
    pub fn new(bus: &'a mut B, config: &'a BusConfig, poll: ReadyPoll) -> Self {
        Self { bus, config, poll }
    }

    /// The negotiated configuration in use
    pub fn config(&self) -> &BusConfig {
        self.config
    }

    /// Put the bus in the command format of the current configuration
    pub fn apply_command_format(&mut self) -> Result<()> {
        self.bus.configure_format(&self.config.command_format())
    }

    /// Generic register/command transfer
    ///
    /// Addressed commands go through
    /// [`update_4byte_ext_addr_register`](Self::update_4byte_ext_addr_register)
    /// first.
    pub fn general_command(
        &mut self,
        instruction: u8,
        address: Option<u32>,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<()> {
        let address = match address {
            Some(addr) => Some(self.update_4byte_ext_addr_register(addr as u64)?),
            None => None,
        };
        self.bus
            .command_transfer(instruction, address, tx, rx)
            .inspect_err(|_| log::error!("Command 0x{:02X} failed", instruction))
    }

    /// Prepare `address` for the wire
    ///
    /// In extended address register mode, writes bits [31:24] to the
    /// register and returns the low 24 bits. Otherwise checks that the
    /// address fits the negotiated address width.
    pub fn update_4byte_ext_addr_register(&mut self, address: u64) -> Result<u32> {
        if self.config.uses_ext_addr_register() {
            let upper = [(address >> 24) as u8];
            common::set_write_enable(self)?;
            self.bus
                .command_transfer(opcodes::WREAR, None, &upper, &mut [])
                .inspect_err(|_| log::error!("Writing extended address register failed"))?;
            return Ok((address & 0x00FF_FFFF) as u32);
        }
        if !self.config.address_width.reaches(address) {
            log::error!(
                "Address 0x{:X} out of {}-byte range",
                address,
                self.config.address_width.bytes()
            );
            return Err(Error::AddressOutOfBounds);
        }
        Ok(address as u32)
    }

    /// Read data with the negotiated read command
    ///
    /// The bus is switched to the read format for the transfer and back to
    /// the command format afterwards, whether or not the read succeeded.
    /// In extended address register mode the read is split at 16 MiB
    /// boundaries.
    pub fn read(&mut self, address: u64, buf: &mut [u8]) -> Result<()> {
        if !self.config.uses_ext_addr_register() {
            return self.read_chunk(address, buf);
        }
        let mut addr = address;
        let mut rest = buf;
        while !rest.is_empty() {
            let window_left = (EXT_ADDR_WINDOW - addr % EXT_ADDR_WINDOW) as usize;
            let (chunk, tail) = rest.split_at_mut(window_left.min(rest.len()));
            self.read_chunk(addr, chunk)?;
            addr += chunk.len() as u64;
            rest = tail;
        }
        Ok(())
    }

    fn read_chunk(&mut self, address: u64, buf: &mut [u8]) -> Result<()> {
        let wire_addr = self.update_4byte_ext_addr_register(address)?;
        let mode = self.config.read_mode;
        let alt = if mode.alt_size_bits() > 0 { Some(0) } else { None };

        let mut guard = FormatGuard::apply(
            &mut *self.bus,
            &self.config.read_format(),
            self.config.command_format(),
        )?;
        let result = guard.read(mode.instruction, alt, wire_addr, buf);
        let restored = guard.finish();
        result.inspect_err(|_| log::error!("Read failed at 0x{:X}", address))?;
        restored
    }

    /// Select the address window, then set the write enable latch
    ///
    /// Writing the extended address register consumes the latch, so it
    /// has to go first.
    fn prepare_write(&mut self, address: u64) -> Result<u32> {
        let wire_addr = self.update_4byte_ext_addr_register(address)?;
        common::set_write_enable(self)?;
        Ok(wire_addr)
    }

    /// Write-enable and program up to one page
    ///
    /// The caller keeps `data` inside a page and waits for the part
    /// afterwards.
    pub fn program(&mut self, instruction: u8, address: u64, data: &[u8]) -> Result<()> {
        let wire_addr = self.prepare_write(address)?;
        self.bus
            .write(instruction, None, wire_addr, data)
            .inspect_err(|_| log::error!("Program failed at 0x{:X}", address))
    }

    /// Write-enable and issue one erase command
    pub fn erase(&mut self, instruction: u8, address: u64) -> Result<()> {
        let wire_addr = self.prepare_write(address)?;
        self.bus
            .command_transfer(instruction, Some(wire_addr), &[], &mut [])
            .inspect_err(|_| log::error!("Erase 0x{:02X} failed at 0x{:X}", instruction, address))
    }

    /// Read SR1 and the following registers into `buf`
    ///
    /// `buf` must hold the configured register count.
    pub fn read_status_registers(&mut self, buf: &mut [u8]) -> Result<()> {
        let regs = self.config.status_registers;
        let count = regs.count as usize;
        self.general_command(opcodes::RDSR, None, &[], &mut buf[..1])?;
        if count > 1 {
            self.general_command(regs.read2_instruction, None, &[], &mut buf[1..count])?;
        }
        Ok(())
    }

    /// Write SR1 and the following registers from `buf`
    ///
    /// Registers sharing WRSR are written in one transfer. A register 2
    /// with its own write instruction is written separately, each write
    /// preceded by its own write enable.
    pub fn write_status_registers(&mut self, buf: &[u8]) -> Result<()> {
        let regs = self.config.status_registers;
        let count = regs.count as usize;
        match regs.write2_instruction {
            None => common::write_register(self, opcodes::WRSR, None, &buf[..count]),
            Some(write2) => {
                common::write_register(self, opcodes::WRSR, None, &buf[..1])?;
                common::write_register(self, write2, None, &buf[1..2])
            }
        }
    }
}

impl<B: QspiBus + ?Sized> FlashLink for QspiLink<'_, B> {
    fn command(&mut self, opcode: u8, address: Option<u32>, tx: &[u8], rx: &mut [u8])
        -> Result<()> {
        self.general_command(opcode, address, tx, rx)
    }

    fn read_sfdp(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        let mut guard = FormatGuard::apply(
            &mut *self.bus,
            &BusFormat::sfdp(),
            self.config.command_format(),
        )?;
        let result = guard.read(opcodes::RDSFDP, None, address, buf);
        let restored = guard.finish();
        result.inspect_err(|_| log::error!("Reading SFDP at 0x{:X} failed", address))?;
        restored
    }

    fn delay_us(&mut self, us: u32) {
        self.bus.delay_us(us)
    }

    fn ready_poll(&self) -> ReadyPoll {
        self.poll
    }
}
