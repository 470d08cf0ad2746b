//! SPI command structure

use super::{opcodes, AddressWidth, IoMode};

/// A single SPI transaction
///
/// Designed to avoid allocation - uses slices for data.
/// The lifetime parameter `'a` ties the command to the buffers it references.
pub struct SpiCommand<'a> {
    /// The opcode byte
    pub opcode: u8,

    /// Address (if any)
    pub address: Option<u32>,

    /// Address width
    pub address_width: AddressWidth,

    /// I/O mode
    pub io_mode: IoMode,

    /// Number of dummy cycles after address
    pub dummy_cycles: u8,

    /// Data to write after opcode/address/dummy
    pub write_data: &'a [u8],

    /// Buffer to read into (mutable)
    pub read_buf: &'a mut [u8],
}

impl<'a> SpiCommand<'a> {
    /// Create a generic register/command transfer
    ///
    /// `address` of `None` means no address phase.
    pub fn transfer(
        opcode: u8,
        address: Option<u32>,
        address_width: AddressWidth,
        write_data: &'a [u8],
        read_buf: &'a mut [u8],
    ) -> Self {
        Self {
            opcode,
            address,
            address_width: if address.is_some() {
                address_width
            } else {
                AddressWidth::None
            },
            io_mode: IoMode::Single,
            dummy_cycles: 0,
            write_data,
            read_buf,
        }
    }

    /// Create a simple command with no address or data (e.g., WREN, WRDI)
    pub fn simple(opcode: u8) -> Self {
        Self::transfer(opcode, None, AddressWidth::None, &[], &mut [])
    }

    /// Create a read register command with no address (e.g., RDSR)
    pub fn read_reg(opcode: u8, buf: &'a mut [u8]) -> Self {
        Self::transfer(opcode, None, AddressWidth::None, &[], buf)
    }

    /// Create a write register command with no address (e.g., WRSR)
    pub fn write_reg(opcode: u8, data: &'a [u8]) -> Self {
        Self::transfer(opcode, None, AddressWidth::None, data, &mut [])
    }

    /// Create an addressed read command (e.g., READ)
    pub fn read(opcode: u8, addr: u32, width: AddressWidth, buf: &'a mut [u8]) -> Self {
        Self::transfer(opcode, Some(addr), width, &[], buf)
    }

    /// Create an addressed write command (e.g., PP)
    pub fn write(opcode: u8, addr: u32, width: AddressWidth, data: &'a [u8]) -> Self {
        Self::transfer(opcode, Some(addr), width, data, &mut [])
    }

    /// Create an erase command
    pub fn erase(opcode: u8, addr: u32, width: AddressWidth) -> Self {
        Self::transfer(opcode, Some(addr), width, &[], &mut [])
    }

    /// Create an RDSFDP command (3-byte address, 8 dummy cycles)
    pub fn read_sfdp(addr: u32, buf: &'a mut [u8]) -> Self {
        Self::read(opcodes::RDSFDP, addr, AddressWidth::ThreeByte, buf).with_dummy_cycles(8)
    }

    /// Set the number of dummy cycles
    pub fn with_dummy_cycles(mut self, cycles: u8) -> Self {
        self.dummy_cycles = cycles;
        self
    }
}
