//! SFDP type definitions
//!
//! Types representing SFDP structures as defined by JEDEC JESD216.

use bitflags::bitflags;

use crate::error::ParseError;
use crate::region::{EraseType, EraseTypes, MAX_ERASE_TYPES};
use crate::spi::{opcodes, IoMode};

/// SFDP signature magic value ("SFDP" in little-endian)
pub const SFDP_SIGNATURE: u32 = 0x50444653;

/// Maximum number of parameter headers kept for diagnostics
pub const MAX_PARAMETER_HEADERS: usize = 16;

/// Maximum Basic Flash Parameter Table bytes read (20 DWORDs)
pub const BASIC_TABLE_MAX_SIZE: usize = 80;

/// Basic Flash Parameter Table ID
pub const PARAM_ID_BASIC: u16 = 0xFF00;
/// Sector Map Parameter Table ID
pub const PARAM_ID_SECTOR_MAP: u16 = 0xFF81;

// BFPT byte offsets
const BFPT_LEGACY_ERASE: usize = 1;
const BFPT_FAST_READ_SUPPORT: usize = 2;
const BFPT_DENSITY: usize = 4;
const BFPT_FAST_READ_DPI_QPI: usize = 16;
const BFPT_ERASE_TYPES: usize = 28;
const BFPT_ERASE_TYPES_END: usize = 36;
const BFPT_PAGE_SIZE: usize = 40;
const BFPT_QPI_SEQUENCE: usize = 56;
const BFPT_QER: usize = 58;
const BFPT_SOFT_RESET: usize = 61;
const BFPT_FOUR_BYTE_ENTRY: usize = 63;

/// Default program page size when the table does not carry one
pub const DEFAULT_PAGE_SIZE: u32 = 256;

// ============================================================================
// Revision and headers
// ============================================================================

/// SFDP revision information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SfdpRevision {
    /// Major revision number
    pub major: u8,
    /// Minor revision number
    pub minor: u8,
}

impl SfdpRevision {
    /// Create a new revision
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl core::fmt::Display for SfdpRevision {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// SFDP header structure (first 8 bytes at address 0x00)
#[derive(Debug, Clone, Copy, Default)]
pub struct SfdpHeader {
    /// SFDP signature (should be 0x50444653)
    pub signature: u32,
    /// SFDP revision
    pub revision: SfdpRevision,
    /// Number of parameter headers (0-based, so actual count is nph + 1)
    pub nph: u8,
    /// Access protocol (0xFF for legacy)
    pub access_protocol: u8,
}

impl SfdpHeader {
    /// Parse SFDP header from raw bytes
    pub fn parse(data: &[u8; 8]) -> Self {
        Self {
            signature: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            revision: SfdpRevision {
                minor: data[4],
                major: data[5],
            },
            nph: data[6],
            access_protocol: data[7],
        }
    }

    /// Check if the signature is valid
    pub fn is_valid(&self) -> bool {
        self.signature == SFDP_SIGNATURE
    }

    /// Get the number of parameter headers
    pub fn num_param_headers(&self) -> usize {
        (self.nph as usize) + 1
    }
}

/// Parameter header structure (8 bytes each, starting at address 0x08)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParameterHeader {
    /// Parameter ID (MSB << 8 | LSB)
    pub id: u16,
    /// Parameter table revision
    pub revision: SfdpRevision,
    /// Parameter table length in DWORDs
    pub length_dwords: u8,
    /// Parameter table pointer (24-bit byte address)
    pub table_pointer: u32,
}

impl ParameterHeader {
    /// Parse a parameter header from raw bytes
    pub fn parse(data: &[u8; 8]) -> Self {
        Self {
            id: ((data[7] as u16) << 8) | (data[0] as u16),
            revision: SfdpRevision {
                minor: data[1],
                major: data[2],
            },
            length_dwords: data[3],
            table_pointer: u32::from_le_bytes([data[4], data[5], data[6], 0]),
        }
    }

    /// Get the table length in bytes
    pub fn length_bytes(&self) -> usize {
        (self.length_dwords as usize) * 4
    }

    /// Check if this is the Basic Flash Parameter Table
    pub fn is_basic(&self) -> bool {
        self.id == PARAM_ID_BASIC
    }

    /// Check if this is the Sector Map Table
    pub fn is_sector_map(&self) -> bool {
        self.id == PARAM_ID_SECTOR_MAP
    }

    /// Location of the table this header describes
    pub fn location(&self) -> TableLocation {
        TableLocation {
            address: self.table_pointer,
            size: self.length_bytes(),
        }
    }
}

/// Where a parameter table lives in SFDP space
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableLocation {
    /// Byte address of the first DWORD
    pub address: u32,
    /// Table size in bytes (0 when the table is absent)
    pub size: usize,
}

impl TableLocation {
    /// Both address and size are set
    pub fn is_present(&self) -> bool {
        self.address != 0 && self.size != 0
    }
}

/// Result of [`parse_headers`](super::parse_headers)
#[derive(Debug, Clone, Default)]
pub struct HeaderInfo {
    /// SFDP revision from the main header
    pub revision: SfdpRevision,
    /// Number of parameter headers advertised
    pub num_param_headers: usize,
    /// Basic Flash Parameter Table
    pub basic: TableLocation,
    /// Sector Map Table
    pub sector_map: TableLocation,
    /// Every parameter header seen, in SFDP order
    pub headers: heapless::Vec<ParameterHeader, MAX_PARAMETER_HEADERS>,
}

// ============================================================================
// BFPT field decodings
// ============================================================================

/// Flash addressing mode (BFPT DWORD 1 bits [18:17])
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    /// 3-byte addressing only (up to 16 MiB)
    #[default]
    ThreeByteOnly,
    /// 3-byte default, can switch to 4-byte
    ThreeOrFourByte,
    /// 4-byte addressing only
    FourByteOnly,
}

impl AddressMode {
    /// Parse from the two-bit field
    pub fn from_bfpt(value: u8) -> Self {
        match value & 0x03 {
            0b01 => Self::ThreeOrFourByte,
            0b10 => Self::FourByteOnly,
            // 0b11 is reserved
            _ => Self::ThreeByteOnly,
        }
    }

    /// Check if 4-byte addressing is supported
    pub fn supports_4byte(&self) -> bool {
        !matches!(self, Self::ThreeByteOnly)
    }
}

bitflags! {
    /// Fast read modes advertised in BFPT DWORD 1 and DWORD 5
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FastReadSupport: u8 {
        /// 1-1-2
        const DUAL_OUT = 1 << 0;
        /// 1-2-2
        const DUAL_IO  = 1 << 1;
        /// 1-4-4
        const QUAD_IO  = 1 << 2;
        /// 1-1-4
        const QUAD_OUT = 1 << 3;
        /// 2-2-2
        const DPI      = 1 << 4;
        /// 4-4-4
        const QPI      = 1 << 5;
    }
}

impl FastReadSupport {
    /// Flag for an I/O mode (1-1-1 has none and is always available)
    pub fn for_mode(mode: IoMode) -> Self {
        match mode {
            IoMode::Single => Self::empty(),
            IoMode::DualOut => Self::DUAL_OUT,
            IoMode::DualIo => Self::DUAL_IO,
            IoMode::Dpi => Self::DPI,
            IoMode::QuadOut => Self::QUAD_OUT,
            IoMode::QuadIo => Self::QUAD_IO,
            IoMode::Qpi => Self::QPI,
        }
    }
}

/// Parameters for a fast read command
///
/// Contains the opcode, number of mode clocks, and number of dummy/wait cycles
/// needed for a specific fast read mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FastReadParams {
    /// Instruction opcode
    pub opcode: u8,
    /// Number of mode clock cycles
    pub mode_clocks: u8,
    /// Number of dummy/wait clock cycles before valid output
    pub dummy_clocks: u8,
}

impl FastReadParams {
    /// Create new fast read parameters
    pub const fn new(opcode: u8, mode_clocks: u8, dummy_clocks: u8) -> Self {
        Self {
            opcode,
            mode_clocks,
            dummy_clocks,
        }
    }

    /// Decode a (wait-states byte, instruction byte) pair
    ///
    /// Wait-states layout: [7:5] mode clocks, [4:0] dummy clocks
    pub const fn from_bytes(wait_states: u8, opcode: u8) -> Self {
        Self::new(opcode, wait_states >> 5, wait_states & 0x1F)
    }
}

/// Quad Enable (QE) bit location and method (BFPT DWORD 15 bits [22:20])
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuadEnableRequirement {
    /// Device has no QE bit
    #[default]
    None,
    /// QE is bit 1 of SR2; SR1 and SR2 written together with 0x01
    Sr2Bit1,
    /// QE is bit 6 of SR1; SR1 written alone with 0x01
    Sr1Bit6,
    /// QE is bit 7 of SR2; read with 0x3F, written with 0x3E
    Sr2Bit7,
    /// QE is bit 1 of SR2; SR1 and SR2 written together with 0x01,
    /// no inadvertent clear on one-byte writes
    Sr2Bit1NoClear,
    /// QE is bit 1 of SR2; SR2 read with 0x35, written with SR1 through 0x01
    Sr2Bit1Read35,
    /// QE is bit 1 of SR2; SR2 read with 0x35, written alone with 0x31
    Sr2Bit1Write31,
    /// Reserved encoding
    Unknown(u8),
}

impl QuadEnableRequirement {
    /// Parse from the three-bit QER field
    pub fn from_bfpt(value: u8) -> Self {
        match value & 0x07 {
            0 => Self::None,
            1 => Self::Sr2Bit1,
            2 => Self::Sr1Bit6,
            3 => Self::Sr2Bit7,
            4 => Self::Sr2Bit1NoClear,
            5 => Self::Sr2Bit1Read35,
            6 => Self::Sr2Bit1Write31,
            other => Self::Unknown(other),
        }
    }
}

/// 4-4-4 mode enable sequence (BFPT DWORD 15 bits [8:4])
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QpiEnableSequence {
    /// No sequence advertised
    #[default]
    None,
    /// Set QE per QER, then issue 0x38
    QuadEnableThen38,
    /// Issue 0x38
    Instr38,
    /// Issue 0x35
    Instr35,
    /// Read 0x65 at 0x800003, set bit 6, write back with 0x71
    ConfigRegBit6,
    /// Read 0x65, clear bit 7, write back with 0x61
    VolatileConfigBit7,
}

impl QpiEnableSequence {
    /// Decode the five-bit field; the lowest set bit wins
    pub fn from_bfpt(value: u8) -> Self {
        let value = value & 0x1F;
        if value & 0x01 != 0 {
            Self::QuadEnableThen38
        } else if value & 0x02 != 0 {
            Self::Instr38
        } else if value & 0x04 != 0 {
            Self::Instr35
        } else if value & 0x08 != 0 {
            Self::ConfigRegBit6
        } else if value & 0x10 != 0 {
            Self::VolatileConfigBit7
        } else {
            Self::None
        }
    }
}

/// Soft reset protocol (BFPT DWORD 16 bits [13:8])
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SoftResetSupport {
    /// Single 0xF0 instruction
    InstrF0,
    /// 0x66 (Reset Enable) then 0x99 (Reset)
    Reset66Then99,
    /// Nothing this layer implements
    #[default]
    Unsupported,
}

impl SoftResetSupport {
    /// 0xF0 instruction
    pub const INSTR_F0: u8 = 0x08;
    /// 0x66 + 0x99 sequence
    pub const RESET_66_99: u8 = 0x10;

    /// Decode the reset byte
    pub fn from_bfpt(value: u8) -> Self {
        if value & Self::INSTR_F0 != 0 {
            Self::InstrF0
        } else if value & Self::RESET_66_99 != 0 {
            Self::Reset66Then99
        } else {
            Self::Unsupported
        }
    }
}

bitflags! {
    /// Methods to enter 4-byte address mode (BFPT DWORD 16 bits [31:24])
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FourByteEntryMethods: u8 {
        /// Issue 0xB7
        const INSTR_B7         = 0x01;
        /// Issue WREN then 0xB7
        const WREN_INSTR_B7    = 0x02;
        /// 8-bit volatile extended address register (0xC5/0xC8)
        const EXT_ADDR_REG     = 0x04;
        /// 8-bit volatile bank register, bit 7 (0x17/0x16)
        const BANK_REG         = 0x08;
        /// Nonvolatile configuration register, bit 0 (0xB1/0xB5)
        const CONFIG_REG       = 0x10;
        /// Dedicated 4-byte instruction set
        const DEDICATED_INSTRS = 0x20;
        /// Always operates in 4-byte mode
        const ALWAYS_4BYTE     = 0x40;
    }
}

// ============================================================================
// Basic Flash Parameter Table (BFPT)
// ============================================================================

/// Raw Basic Flash Parameter Table
///
/// Holds up to [`BASIC_TABLE_MAX_SIZE`] bytes exactly as read from the part.
/// Accessors decode individual fields on demand. Fields past the end of a
/// short table read as absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicParamTable {
    revision: SfdpRevision,
    data: [u8; BASIC_TABLE_MAX_SIZE],
    len: usize,
}

impl BasicParamTable {
    /// Wrap raw table bytes (truncated to [`BASIC_TABLE_MAX_SIZE`])
    pub fn from_bytes(revision: SfdpRevision, bytes: &[u8]) -> Self {
        let len = bytes.len().min(BASIC_TABLE_MAX_SIZE);
        let mut data = [0u8; BASIC_TABLE_MAX_SIZE];
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            revision,
            data,
            len,
        }
    }

    /// Table revision from its parameter header
    pub fn revision(&self) -> SfdpRevision {
        self.revision
    }

    /// Number of valid bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if no bytes were read
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw table bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Byte at `offset`, if the table is long enough
    pub fn byte(&self, offset: usize) -> Option<u8> {
        self.as_bytes().get(offset).copied()
    }

    fn byte_or_zero(&self, offset: usize) -> u8 {
        self.byte(offset).unwrap_or(0)
    }

    /// Device size in bytes
    ///
    /// Fails when the density uses the 2^N encoding (bit 31 set), which
    /// only devices beyond 4-byte addressing need.
    pub fn density_bytes(&self) -> Result<u64, ParseError> {
        if self.len < BFPT_DENSITY + 4 {
            return Err(ParseError::TableTooShort { len: self.len });
        }
        let d = &self.data[BFPT_DENSITY..BFPT_DENSITY + 4];
        if d[3] & 0x80 != 0 {
            return Err(ParseError::DensityTooLarge);
        }
        let bits = u32::from_le_bytes([d[0], d[1], d[2], d[3]]) as u64;
        Ok((bits + 1) / 8)
    }

    /// Program page size (256 if absent or zero)
    pub fn page_size(&self) -> u32 {
        match self.byte(BFPT_PAGE_SIZE) {
            Some(b) if b >> 4 != 0 => 1u32 << (b >> 4),
            _ => DEFAULT_PAGE_SIZE,
        }
    }

    /// Address byte support
    pub fn address_mode(&self) -> AddressMode {
        AddressMode::from_bfpt(self.byte_or_zero(BFPT_FAST_READ_SUPPORT) >> 1)
    }

    /// Fast read modes advertised by the table
    pub fn fast_read_support(&self) -> FastReadSupport {
        let dword1 = self.byte_or_zero(BFPT_FAST_READ_SUPPORT);
        let dword5 = self.byte_or_zero(BFPT_FAST_READ_DPI_QPI);
        let mut support = FastReadSupport::empty();
        support.set(FastReadSupport::DUAL_OUT, dword1 & 0x01 != 0);
        support.set(FastReadSupport::DUAL_IO, dword1 & 0x10 != 0);
        support.set(FastReadSupport::QUAD_IO, dword1 & 0x20 != 0);
        support.set(FastReadSupport::QUAD_OUT, dword1 & 0x40 != 0);
        support.set(FastReadSupport::DPI, dword5 & 0x01 != 0);
        support.set(FastReadSupport::QPI, dword5 & 0x10 != 0);
        support
    }

    /// Instruction and cycle counts for `mode`
    ///
    /// `None` if the mode is not advertised or the table is too short to
    /// hold its parameters. 1-1-1 is always available as plain READ.
    pub fn fast_read(&self, mode: IoMode) -> Option<FastReadParams> {
        let offset = match mode {
            IoMode::Single => return Some(FastReadParams::new(opcodes::READ, 0, 0)),
            IoMode::QuadIo => 8,
            IoMode::QuadOut => 10,
            IoMode::DualOut => 12,
            IoMode::DualIo => 14,
            IoMode::Dpi => 22,
            IoMode::Qpi => 26,
        };
        if !self.fast_read_support().contains(FastReadSupport::for_mode(mode)) {
            return None;
        }
        let wait_states = self.byte(offset)?;
        let opcode = self.byte(offset + 1)?;
        Some(FastReadParams::from_bytes(wait_states, opcode))
    }

    /// Legacy 4K erase instruction (0xFF means none)
    pub fn legacy_erase_instruction(&self) -> Option<u8> {
        self.byte(BFPT_LEGACY_ERASE).filter(|&op| op != 0xFF)
    }

    /// The four (instruction, size) erase types
    ///
    /// All empty when the table stops before DWORD 9. A size exponent of
    /// 0 (1 byte) marks a slot as unused.
    pub fn erase_types(&self) -> EraseTypes {
        let mut types = [None; MAX_ERASE_TYPES];
        if self.len >= BFPT_ERASE_TYPES_END {
            for (i, slot) in types.iter_mut().enumerate() {
                let exp = self.data[BFPT_ERASE_TYPES + 2 * i];
                let instruction = self.data[BFPT_ERASE_TYPES + 2 * i + 1];
                if exp == 0 || exp >= 32 {
                    continue;
                }
                *slot = Some(EraseType {
                    instruction,
                    size: 1u64 << exp,
                });
            }
        }
        EraseTypes::new(types)
    }

    /// Quad enable requirement
    pub fn quad_enable(&self) -> QuadEnableRequirement {
        QuadEnableRequirement::from_bfpt((self.byte_or_zero(BFPT_QER) & 0x70) >> 4)
    }

    /// 4-4-4 enable sequence
    pub fn qpi_enable(&self) -> QpiEnableSequence {
        let lo = self.byte_or_zero(BFPT_QPI_SEQUENCE) >> 4;
        let hi = self.byte_or_zero(BFPT_QPI_SEQUENCE + 1) & 0x01;
        QpiEnableSequence::from_bfpt((hi << 4) | lo)
    }

    /// Soft reset protocol
    pub fn soft_reset(&self) -> SoftResetSupport {
        SoftResetSupport::from_bfpt(self.byte_or_zero(BFPT_SOFT_RESET))
    }

    /// 4-byte address entry methods
    pub fn four_byte_entry(&self) -> FourByteEntryMethods {
        FourByteEntryMethods::from_bits_truncate(self.byte_or_zero(BFPT_FOUR_BYTE_ENTRY))
    }
}
