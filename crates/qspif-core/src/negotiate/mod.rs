//! Capability negotiation
//!
//! Turns the parsed SFDP tables and the controller's [`SpiFeatures`] into
//! a [`BusConfig`], and runs the command sequences that put the part into
//! the negotiated state: quad enable, QPI entry, 4-byte addressing,
//! vendor fast mode and block protection clearing.
//!
//! The decoders in [`select`] are pure; the steps in [`steps`] talk to the
//! bus through [`QspiLink`](crate::protocol::QspiLink).
//!
//! [`SpiFeatures`]: crate::bus::SpiFeatures

pub mod quirks;
mod select;
mod steps;

pub use select::*;
pub use steps::*;

use crate::sfdp::FastReadParams;
use crate::spi::{opcodes, AddressWidth, BusFormat, IoMode};

/// Maximum number of status/configuration registers handled
pub const MAX_STATUS_REGISTERS: usize = 3;

/// Fast read command chosen for data reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadMode {
    /// Bus mode of the read
    pub io_mode: IoMode,
    /// Read instruction
    pub instruction: u8,
    /// Dummy cycles after the address (and mode bits)
    pub dummy_cycles: u8,
    /// Mode clock cycles sent as alternate bytes
    pub mode_cycles: u8,
}

impl ReadMode {
    /// Plain 1-1-1 READ (0x03)
    pub const DEFAULT: Self = Self {
        io_mode: IoMode::Single,
        instruction: opcodes::READ,
        dummy_cycles: 0,
        mode_cycles: 0,
    };

    /// Build from BFPT fast read parameters
    pub const fn from_params(io_mode: IoMode, params: FastReadParams) -> Self {
        Self {
            io_mode,
            instruction: params.opcode,
            dummy_cycles: params.dummy_clocks,
            mode_cycles: params.mode_clocks,
        }
    }

    /// Length of the alternate (mode bits) phase in bits
    pub const fn alt_size_bits(&self) -> u8 {
        self.mode_cycles * self.io_mode.addr_lines()
    }

    /// Bus format for this read
    pub const fn format(&self, address_size: AddressWidth) -> BusFormat {
        BusFormat::read(
            self.io_mode,
            address_size,
            self.alt_size_bits(),
            self.dummy_cycles,
        )
    }
}

impl Default for ReadMode {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// How the status/configuration registers are accessed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRegisters {
    /// Number of registers (SR1 plus following registers)
    pub count: u8,
    /// Instruction reading everything after SR1
    pub read2_instruction: u8,
    /// Dedicated write instruction for register 2, `None` when register 2
    /// is written together with SR1 through WRSR
    pub write2_instruction: Option<u8>,
}

impl Default for StatusRegisters {
    fn default() -> Self {
        Self {
            count: 2,
            read2_instruction: opcodes::RDSR2,
            write2_instruction: None,
        }
    }
}

/// Location of the Quad Enable bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuadEnableBit {
    /// Register index, 0 for SR1
    pub register: u8,
    /// Bit number inside the register
    pub bit: u8,
}

impl QuadEnableBit {
    /// Bit mask inside its register
    pub const fn mask(&self) -> u8 {
        1 << self.bit
    }
}

/// How addresses above 16 MiB are reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FourByteStrategy {
    /// 3-byte addressing only
    #[default]
    None,
    /// The part is always in 4-byte mode
    AlwaysOn,
    /// Entered with 0xB7
    EnterB7,
    /// Entered with WREN then 0xB7
    WrenEnterB7,
    /// Bit 0 of the nonvolatile configuration register (0xB5/0xB1)
    ConfigRegister,
    /// Bit 7 of the bank register (0x16/0x17)
    BankRegister,
    /// Extended address register (0xC5) holding address bits [31:24]
    ExtAddrRegister,
}

/// Negotiated bus configuration of one device
///
/// Defaults describe a plain 1-1-1, 3-byte part. `init` refines it once
/// and it stays fixed until `deinit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Mode used for register commands (1-1-1, or 4-4-4 after QPI entry)
    pub command_mode: IoMode,
    /// Address size on the wire
    pub address_width: AddressWidth,
    /// Data read command
    pub read_mode: ReadMode,
    /// Status register access
    pub status_registers: StatusRegisters,
    /// Quad Enable bit, if one was set
    pub quad_enable: Option<QuadEnableBit>,
    /// 4-byte addressing strategy
    pub four_byte: FourByteStrategy,
    /// Program page size
    pub page_size: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            command_mode: IoMode::Single,
            address_width: AddressWidth::ThreeByte,
            read_mode: ReadMode::DEFAULT,
            status_registers: StatusRegisters::default(),
            quad_enable: None,
            four_byte: FourByteStrategy::None,
            page_size: crate::sfdp::DEFAULT_PAGE_SIZE,
        }
    }
}

impl BusConfig {
    /// Format used for register commands, program and erase
    pub const fn command_format(&self) -> BusFormat {
        BusFormat::command(self.command_mode, self.address_width)
    }

    /// Format used for data reads
    pub const fn read_format(&self) -> BusFormat {
        self.read_mode.format(self.address_width)
    }

    /// Extended address register mode
    pub fn uses_ext_addr_register(&self) -> bool {
        self.four_byte == FourByteStrategy::ExtAddrRegister
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spi::BusWidth;

    #[test]
    fn test_alt_bits_follow_address_lines() {
        let mode = ReadMode::from_params(IoMode::QuadIo, FastReadParams::new(0xEB, 2, 4));
        assert_eq!(mode.alt_size_bits(), 8);

        let fmt = mode.format(AddressWidth::ThreeByte);
        assert_eq!(fmt.address, BusWidth::Quad);
        assert_eq!((fmt.alt_size, fmt.dummy_cycles), (8, 4));
    }

    #[test]
    fn test_default_config_is_single_three_byte() {
        let cfg = BusConfig::default();
        assert_eq!(cfg.command_format(), BusFormat::command(IoMode::Single, AddressWidth::ThreeByte));
        assert_eq!(cfg.read_format().alt_size, 0);
        assert_eq!(cfg.page_size, 256);
        assert!(!cfg.uses_ext_addr_register());
    }
}
