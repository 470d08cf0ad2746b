//! QSPI bus formats
//!
//! A [`BusFormat`] is the complete phase layout a QSPI controller needs
//! before it can run a transaction: the width of every phase, the address
//! size, the alternate-byte size and the dummy cycle count.

use super::{AddressWidth, IoMode};

/// Number of data lines used by one transaction phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BusWidth {
    /// One line
    #[default]
    Single,
    /// Two lines
    Dual,
    /// Four lines
    Quad,
}

impl BusWidth {
    /// Width for a line count (anything above 2 is quad)
    pub const fn from_lines(lines: u8) -> Self {
        match lines {
            0 | 1 => Self::Single,
            2 => Self::Dual,
            _ => Self::Quad,
        }
    }

    /// Number of lines
    pub const fn lines(&self) -> u8 {
        match self {
            Self::Single => 1,
            Self::Dual => 2,
            Self::Quad => 4,
        }
    }
}

/// Phase layout of a QSPI transaction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BusFormat {
    /// Instruction phase width
    pub instruction: BusWidth,
    /// Address phase width
    pub address: BusWidth,
    /// Address size
    pub address_size: AddressWidth,
    /// Alternate byte phase width
    pub alt: BusWidth,
    /// Alternate phase length in bits (0 = no alternate phase)
    pub alt_size: u8,
    /// Data phase width
    pub data: BusWidth,
    /// Dummy cycles between address/alternate and data
    pub dummy_cycles: u8,
}

impl BusFormat {
    /// Register/command format: every phase at the command mode's
    /// instruction width, no alternate bytes, no dummy cycles
    pub const fn command(mode: IoMode, address_size: AddressWidth) -> Self {
        let width = mode.cmd_width();
        Self {
            instruction: width,
            address: width,
            address_size,
            alt: width,
            alt_size: 0,
            data: width,
            dummy_cycles: 0,
        }
    }

    /// RDSFDP format: 1-1-1, 3-byte address, 8 dummy cycles
    pub const fn sfdp() -> Self {
        Self {
            instruction: BusWidth::Single,
            address: BusWidth::Single,
            address_size: AddressWidth::ThreeByte,
            alt: BusWidth::Single,
            alt_size: 0,
            data: BusWidth::Single,
            dummy_cycles: 8,
        }
    }

    /// Fast read format for `mode`
    ///
    /// Alternate (mode) bits travel on the address lines.
    pub const fn read(
        mode: IoMode,
        address_size: AddressWidth,
        alt_size: u8,
        dummy_cycles: u8,
    ) -> Self {
        Self {
            instruction: mode.cmd_width(),
            address: mode.addr_width(),
            address_size,
            alt: mode.addr_width(),
            alt_size,
            data: mode.data_width(),
            dummy_cycles,
        }
    }
}
