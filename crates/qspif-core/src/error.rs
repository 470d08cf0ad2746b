//! Error types for qspif-core
//!
//! This module provides a no_std compatible error type shared by the SFDP
//! parser, the command adapters and the block devices. Each variant maps to
//! one block-device error code, see [`Error::code`].

use core::fmt;

/// Details about an SFDP parsing failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The first four bytes are not "SFDP"
    BadSignature {
        /// Signature found at offset 0
        found: u32,
    },
    /// SFDP header or a parameter header has a major revision other than 1
    UnsupportedRevision {
        /// Major revision found
        major: u8,
    },
    /// No JEDEC Basic Flash Parameter Table was advertised
    MissingBasicTable,
    /// A table is shorter than the field being decoded
    TableTooShort {
        /// Table length in bytes
        len: usize,
    },
    /// Density field describes a device needing more than 4 address bytes
    DensityTooLarge,
    /// Sector map uses command descriptors or several configurations
    UnsupportedSectorMap,
    /// Sector map declares more regions than can be tracked
    TooManyRegions {
        /// Region count declared by the table
        count: usize,
    },
    /// Sector map regions do not add up to the device size
    RegionSizeMismatch {
        /// Sum of all region sizes
        mapped: u64,
        /// Device size from the density field
        device: u64,
    },
    /// Neither erase types nor a legacy 4K erase instruction are usable
    NoEraseInstruction,
    /// Device does not advertise a software reset protocol we implement
    NoSoftReset,
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Identity errors
    /// Another device instance already owns this chip select
    DeviceNotUnique,
    /// Too many device instances are active
    DeviceMaxExceeded,

    // Hardware errors
    /// Bus transfer failed
    DeviceError,
    /// Device stayed busy past the ready-poll retry limit
    ReadyFailed,
    /// Write enable latch not observed after write enable
    WrenFailed,

    // Discovery errors
    /// SFDP content is malformed or unsupported
    ParsingFailed(ParseError),

    // Caller errors
    /// Erase address or size is out of bounds or misaligned
    InvalidEraseParams,
    /// Read or program range exceeds the device
    AddressOutOfBounds,
    /// Operation on a device that has not been initialized
    NotInitialized,
}

impl Error {
    /// Numeric block-device error code
    ///
    /// Codes follow the classic block-device convention (negative values,
    /// `0` reserved for success) so they can be handed to C callers.
    pub const fn code(&self) -> i32 {
        match self {
            Self::DeviceError | Self::NotInitialized | Self::AddressOutOfBounds => -4001,
            Self::ParsingFailed(_) => -4002,
            Self::ReadyFailed => -4003,
            Self::WrenFailed => -4004,
            Self::InvalidEraseParams => -4005,
            Self::DeviceNotUnique => -4006,
            Self::DeviceMaxExceeded => -4007,
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Self::ParsingFailed(err)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSignature { found } => {
                write!(f, "bad SFDP signature 0x{:08X}", found)
            }
            Self::UnsupportedRevision { major } => {
                write!(f, "unsupported SFDP major revision {}", major)
            }
            Self::MissingBasicTable => write!(f, "no basic flash parameter table"),
            Self::TableTooShort { len } => write!(f, "parameter table too short ({} bytes)", len),
            Self::DensityTooLarge => write!(f, "density needs more than 4 address bytes"),
            Self::UnsupportedSectorMap => write!(f, "only single map descriptors are supported"),
            Self::TooManyRegions { count } => write!(f, "sector map has {} regions", count),
            Self::RegionSizeMismatch { mapped, device } => write!(
                f,
                "sector map covers {} bytes but device has {} bytes",
                mapped, device
            ),
            Self::NoEraseInstruction => write!(f, "no usable erase instruction"),
            Self::NoSoftReset => write!(f, "no supported software reset protocol"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceNotUnique => write!(f, "chip select already in use"),
            Self::DeviceMaxExceeded => write!(f, "too many active flash devices"),
            Self::DeviceError => write!(f, "device error"),
            Self::ReadyFailed => write!(f, "device not ready"),
            Self::WrenFailed => write!(f, "write enable failed"),
            Self::ParsingFailed(err) => write!(f, "SFDP parsing failed: {}", err),
            Self::InvalidEraseParams => write!(f, "invalid erase parameters"),
            Self::AddressOutOfBounds => write!(f, "address out of bounds"),
            Self::NotInitialized => write!(f, "device not initialized"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::DeviceError.code(), -4001);
        assert_eq!(Error::ParsingFailed(ParseError::NoSoftReset).code(), -4002);
        assert_eq!(Error::ReadyFailed.code(), -4003);
        assert_eq!(Error::WrenFailed.code(), -4004);
        assert_eq!(Error::InvalidEraseParams.code(), -4005);
        assert_eq!(Error::DeviceNotUnique.code(), -4006);
        assert_eq!(Error::DeviceMaxExceeded.code(), -4007);
    }

    #[test]
    fn test_parse_error_converts() {
        let err: Error = ParseError::MissingBasicTable.into();
        assert_eq!(err, Error::ParsingFailed(ParseError::MissingBasicTable));
    }
}
