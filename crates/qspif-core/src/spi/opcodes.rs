//! Standard JEDEC SPI flash opcodes
//!
//! Instructions issued by the block devices and the capability negotiator,
//! as specified by JEDEC JESD216 (SFDP) and common manufacturer conventions.

// ============================================================================
// Write control
// ============================================================================

/// Write Enable - required before any write/erase operation
pub const WREN: u8 = 0x06;
/// Write Disable - clears WEL bit in status register
pub const WRDI: u8 = 0x04;

// ============================================================================
// Status register operations
// ============================================================================

/// Read Status Register 1
pub const RDSR: u8 = 0x05;
/// Read Status Register 2
pub const RDSR2: u8 = 0x35;
/// Read Status Register 3 (Macronix: read configuration registers)
pub const RDSR3: u8 = 0x15;
/// Read Status Register 2 when QE is bit 7 of SR2
pub const RDSR2_QE7: u8 = 0x3F;
/// Write Status Register 1 (and following registers)
pub const WRSR: u8 = 0x01;
/// Write Status Register 2
pub const WRSR2: u8 = 0x31;
/// Write Status Register 2 when QE is bit 7 of SR2
pub const WRSR2_QE7: u8 = 0x3E;

// ============================================================================
// Identification
// ============================================================================

/// Read JEDEC ID (manufacturer + device ID)
pub const RDID: u8 = 0x9F;

// ============================================================================
// Read / program
// ============================================================================

/// Read Data
pub const READ: u8 = 0x03;
/// Read Data with 4-byte address
pub const READ_4B: u8 = 0x13;
/// Page Program
pub const PP: u8 = 0x02;
/// Page Program with 4-byte address
pub const PP_4B: u8 = 0x12;

// ============================================================================
// Erase commands
// ============================================================================

/// Sector Erase 4KB with 3-byte address
pub const SE_20: u8 = 0x20;
/// Sector Erase 4KB with 4-byte address
pub const SE_21: u8 = 0x21;
/// Block Erase 32KB with 3-byte address
pub const BE_52: u8 = 0x52;
/// Block Erase 32KB with 4-byte address
pub const BE_5C: u8 = 0x5C;
/// Block Erase 64KB with 3-byte address
pub const BE_D8: u8 = 0xD8;
/// Block Erase 64KB with 4-byte address
pub const BE_DC: u8 = 0xDC;

// ============================================================================
// 4-byte address mode control
// ============================================================================

/// Enter 4-Byte Address Mode
pub const EN4B: u8 = 0xB7;
/// Write Extended Address Register
pub const WREAR: u8 = 0xC5;
/// Read Extended Address Register
pub const RDEAR: u8 = 0xC8;
/// Write Bank Address Register
pub const WRBRV: u8 = 0x17;
/// Read Bank Address Register
pub const RDBR: u8 = 0x16;
/// Write Nonvolatile Configuration Register
pub const WRNVCR: u8 = 0xB1;
/// Read Nonvolatile Configuration Register
pub const RDNVCR: u8 = 0xB5;

// ============================================================================
// QPI mode control
// ============================================================================

/// Enter QPI Mode (Winbond/Macronix)
pub const EQIO: u8 = 0x38;
/// Enter QPI Mode (alternate opcode, shares RDSR2 encoding)
pub const EQIO_35: u8 = 0x35;
/// Read Any Register / Read Enhanced Volatile Configuration Register
pub const RDAR: u8 = 0x65;
/// Write Any Register
pub const WRAR: u8 = 0x71;
/// Write Enhanced Volatile Configuration Register
pub const WRECR: u8 = 0x61;
/// Address of the volatile configuration register used with RDAR/WRAR
pub const CR2V_ADDR: u32 = 0x80_0003;

// ============================================================================
// Software Reset
// ============================================================================

/// Reset Enable
pub const RSTEN: u8 = 0x66;
/// Reset Device
pub const RST: u8 = 0x99;
/// Single-instruction Soft Reset
pub const SOFT_RESET_F0: u8 = 0xF0;

// ============================================================================
// Protection
// ============================================================================

/// Global Block Protection Unlock (SST)
pub const ULBPR: u8 = 0x98;

// ============================================================================
// SFDP (Serial Flash Discoverable Parameters)
// ============================================================================

/// Read SFDP (JEDEC JESD216)
pub const RDSFDP: u8 = 0x5A;

// ============================================================================
// Status register bit definitions
// ============================================================================

/// Status Register 1: Write In Progress / Busy
pub const SR1_WIP: u8 = 0x01;
/// Status Register 1: Write Enable Latch
pub const SR1_WEL: u8 = 0x02;

/// Map a 3-byte erase opcode to its 4-byte equivalent
pub fn to_4byte_erase(opcode: u8) -> u8 {
    match opcode {
        SE_20 => SE_21,
        BE_52 => BE_5C,
        BE_D8 => BE_DC,
        _ => opcode,
    }
}
