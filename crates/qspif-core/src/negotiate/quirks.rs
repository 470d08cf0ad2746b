//! Manufacturer-specific overrides

use super::StatusRegisters;
use crate::spi::opcodes;

/// SST / Microchip JEDEC manufacturer ID
pub const MANUFACTURER_SST: u8 = 0xBF;
/// Macronix JEDEC manufacturer ID
pub const MANUFACTURER_MACRONIX: u8 = 0xC2;

/// How block protection is cleared during init
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtectionClear {
    /// Global block protection unlock (0x98)
    Unlock,
    /// Clear the protection bits of SR1
    #[default]
    StatusRegister,
}

/// Vendor handling selected from the manufacturer ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quirk {
    /// Standard JEDEC behavior
    #[default]
    None,
    /// SST: block protection is only cleared by ULBPR
    Sst,
    /// Macronix: third configuration register, fast mode bit,
    /// no 4-byte addressing
    Macronix,
}

/// Overrides applied by a [`Quirk`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuirkOverrides {
    /// Block protection clearing method
    pub protection: ProtectionClear,
    /// Status register layout replacing the default
    pub status_registers: Option<StatusRegisters>,
    /// Set the high performance bit before raising the bus clock
    pub needs_fast_mode: bool,
    /// Whether 4-byte addressing may be negotiated
    pub four_byte_addressing: bool,
}

impl Quirk {
    /// Look up the quirk for a manufacturer ID
    pub fn from_manufacturer(id: u8) -> Self {
        match id {
            MANUFACTURER_SST => Self::Sst,
            MANUFACTURER_MACRONIX => Self::Macronix,
            _ => Self::None,
        }
    }

    /// Overrides carried by this quirk
    pub fn overrides(&self) -> QuirkOverrides {
        match self {
            Self::None => QuirkOverrides {
                protection: ProtectionClear::StatusRegister,
                status_registers: None,
                needs_fast_mode: false,
                four_byte_addressing: true,
            },
            Self::Sst => QuirkOverrides {
                protection: ProtectionClear::Unlock,
                status_registers: None,
                needs_fast_mode: false,
                four_byte_addressing: true,
            },
            Self::Macronix => QuirkOverrides {
                protection: ProtectionClear::StatusRegister,
                status_registers: Some(StatusRegisters {
                    count: 3,
                    read2_instruction: opcodes::RDSR3,
                    write2_instruction: None,
                }),
                needs_fast_mode: true,
                four_byte_addressing: false,
            },
        }
    }
}

impl core::fmt::Display for Quirk {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Sst => write!(f, "SST"),
            Self::Macronix => write!(f, "Macronix"),
        }
    }
}
