//! Pure decoders from SFDP fields to bus configuration

use super::{FourByteStrategy, QuadEnableBit, ReadMode, StatusRegisters};
use crate::bus::SpiFeatures;
use crate::error::Result;
use crate::sfdp::{BasicParamTable, FourByteEntryMethods, QpiEnableSequence, QuadEnableRequirement};
use crate::spi::{opcodes, AddressWidth, IoMode};

/// Read modes in order of preference
pub const READ_MODE_PRIORITY: [IoMode; 6] = [
    IoMode::QuadIo,
    IoMode::Qpi,
    IoMode::QuadOut,
    IoMode::Dpi,
    IoMode::DualIo,
    IoMode::DualOut,
];

/// Device size in bytes, checked against what the controller can address
///
/// Densities needing more than 4 address bytes fail to parse. A part
/// above 16 MiB behind a controller (or part) without 4-byte addressing
/// is accepted, but only its first 16 MiB will be reachable.
pub fn check_addressability(bfpt: &BasicParamTable, features: SpiFeatures) -> Result<u64> {
    let size = bfpt.density_bytes().inspect_err(|e| log::error!("{}", e))?;
    if size > AddressWidth::THREE_BYTE_LIMIT
        && !(bfpt.address_mode().supports_4byte() && features.contains(SpiFeatures::FOUR_BYTE_ADDR))
    {
        log::warn!(
            "Device is {} bytes but 4-byte addressing is unavailable, only 16 MiB reachable",
            size
        );
    }
    Ok(size)
}

/// Pick the fastest read mode both the part and the controller support
///
/// 4-4-4 is only considered when the table also describes how to enter
/// QPI mode. Falls back to plain 1-1-1 READ.
pub fn select_read_mode(bfpt: &BasicParamTable, features: SpiFeatures) -> ReadMode {
    for mode in READ_MODE_PRIORITY {
        if !mode.is_supported_by(features) {
            continue;
        }
        if mode == IoMode::Qpi && bfpt.qpi_enable() == QpiEnableSequence::None {
            log::debug!("4-4-4 read advertised without an enable sequence, skipping");
            continue;
        }
        if let Some(params) = bfpt.fast_read(mode) {
            let read_mode = ReadMode::from_params(mode, params);
            log::debug!(
                "Read mode {}: instruction 0x{:02X}, {} mode + {} dummy cycles",
                mode,
                read_mode.instruction,
                read_mode.mode_cycles,
                read_mode.dummy_cycles
            );
            return read_mode;
        }
    }
    log::debug!("Read mode 1-1-1: instruction 0x{:02X}", opcodes::READ);
    ReadMode::DEFAULT
}

/// Locate the QE bit and adjust status register access accordingly
///
/// Returns `None` when the part has no QE bit or the encoding is not
/// recognized; the latter is logged and the read proceeds without it.
pub fn decode_quad_enable(
    requirement: QuadEnableRequirement,
    registers: StatusRegisters,
) -> Option<(QuadEnableBit, StatusRegisters)> {
    let mut regs = registers;
    let sr2 = |bit| QuadEnableBit { register: 1, bit };
    let bit = match requirement {
        QuadEnableRequirement::None => return None,
        QuadEnableRequirement::Unknown(value) => {
            log::warn!("Unrecognized quad enable requirement {}, QE left unset", value);
            return None;
        }
        QuadEnableRequirement::Sr1Bit6 => QuadEnableBit { register: 0, bit: 6 },
        QuadEnableRequirement::Sr2Bit1 | QuadEnableRequirement::Sr2Bit1NoClear => sr2(1),
        QuadEnableRequirement::Sr2Bit7 => {
            regs.read2_instruction = opcodes::RDSR2_QE7;
            regs.write2_instruction = Some(opcodes::WRSR2_QE7);
            sr2(7)
        }
        QuadEnableRequirement::Sr2Bit1Read35 => {
            regs.read2_instruction = opcodes::RDSR2;
            sr2(1)
        }
        QuadEnableRequirement::Sr2Bit1Write31 => {
            regs.read2_instruction = opcodes::RDSR2;
            regs.write2_instruction = Some(opcodes::WRSR2);
            sr2(1)
        }
    };
    if bit.register > 0 {
        regs.count = regs.count.max(2);
    }
    Some((bit, regs))
}

impl FourByteStrategy {
    /// First advertised entry method, in order of preference
    ///
    /// A part that only offers dedicated 4-byte instructions stays in
    /// 3-byte mode.
    pub fn select(methods: FourByteEntryMethods) -> Self {
        if methods.contains(FourByteEntryMethods::ALWAYS_4BYTE) {
            Self::AlwaysOn
        } else if methods.contains(FourByteEntryMethods::INSTR_B7) {
            Self::EnterB7
        } else if methods.contains(FourByteEntryMethods::WREN_INSTR_B7) {
            Self::WrenEnterB7
        } else if methods.contains(FourByteEntryMethods::CONFIG_REG) {
            Self::ConfigRegister
        } else if methods.contains(FourByteEntryMethods::BANK_REG) {
            Self::BankRegister
        } else if methods.contains(FourByteEntryMethods::EXT_ADDR_REG) {
            Self::ExtAddrRegister
        } else {
            Self::None
        }
    }

    /// Address width on the wire once this strategy is active
    pub fn address_width(&self) -> AddressWidth {
        match self {
            Self::None | Self::ExtAddrRegister => AddressWidth::ThreeByte,
            _ => AddressWidth::FourByte,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ParseError};
    use crate::sfdp::SfdpRevision;

    /// 64-byte table for a 16 MiB part, fast read support bytes patched in
    fn table(dword1: u8, dword5: u8) -> BasicParamTable {
        let mut b = [0u8; 64];
        b[1] = 0x20;
        b[2] = dword1;
        b[4..8].copy_from_slice(&(128 * 1024 * 1024u32 - 1).to_le_bytes());
        // 1-4-4: 2 mode + 4 dummy, 0xEB
        b[8] = 0x44;
        b[9] = 0xEB;
        // 1-1-4: 8 dummy, 0x6B
        b[10] = 0x08;
        b[11] = 0x6B;
        // 1-1-2: 8 dummy, 0x3B
        b[12] = 0x08;
        b[13] = 0x3B;
        // 1-2-2: 4 mode + 0 dummy, 0xBB
        b[14] = 0x80;
        b[15] = 0xBB;
        b[16] = dword5;
        // 2-2-2: 4 dummy, 0xBB
        b[22] = 0x04;
        b[23] = 0xBB;
        // 4-4-4: 2 mode + 4 dummy, 0xEB
        b[26] = 0x44;
        b[27] = 0xEB;
        BasicParamTable::from_bytes(SfdpRevision::new(1, 6), &b)
    }

    fn with_qpi_sequence(bfpt: &BasicParamTable, byte56: u8) -> BasicParamTable {
        let mut b = [0u8; 64];
        b.copy_from_slice(bfpt.as_bytes());
        b[56] = byte56;
        BasicParamTable::from_bytes(bfpt.revision(), &b)
    }

    #[test]
    fn test_read_mode_priority() {
        let all = SpiFeatures::all();
        // every mode advertised, 0x38 QPI entry
        let bfpt = with_qpi_sequence(&table(0x71, 0x11), 0x20);

        assert_eq!(select_read_mode(&bfpt, all).io_mode, IoMode::QuadIo);

        let expected = [
            (SpiFeatures::all() - SpiFeatures::QUAD_IO, IoMode::Qpi),
            (SpiFeatures::QUAD_IN | SpiFeatures::DUAL | SpiFeatures::DPI, IoMode::QuadOut),
            (SpiFeatures::DUAL | SpiFeatures::DPI, IoMode::Dpi),
            (SpiFeatures::DUAL, IoMode::DualIo),
            (SpiFeatures::DUAL_IN, IoMode::DualOut),
            (SpiFeatures::empty(), IoMode::Single),
        ];
        for (features, mode) in expected {
            assert_eq!(select_read_mode(&bfpt, features).io_mode, mode, "{:?}", features);
        }
    }

    #[test]
    fn test_read_mode_parameters() {
        let mode = select_read_mode(&table(0x20, 0x00), SpiFeatures::all());
        assert_eq!(mode.instruction, 0xEB);
        assert_eq!((mode.mode_cycles, mode.dummy_cycles), (2, 4));

        let fallback = select_read_mode(&table(0x00, 0x00), SpiFeatures::all());
        assert_eq!(fallback, ReadMode::DEFAULT);
    }

    #[test]
    fn test_qpi_needs_enable_sequence() {
        let bfpt = table(0x00, 0x10);
        assert_eq!(select_read_mode(&bfpt, SpiFeatures::all()).io_mode, IoMode::Single);
        let bfpt = with_qpi_sequence(&bfpt, 0x20);
        assert_eq!(select_read_mode(&bfpt, SpiFeatures::all()).io_mode, IoMode::Qpi);
    }

    #[test]
    fn test_addressability() {
        let bfpt = table(0x00, 0x00);
        assert_eq!(check_addressability(&bfpt, SpiFeatures::empty()), Ok(16 * 1024 * 1024));

        let mut raw = [0u8; 64];
        raw.copy_from_slice(bfpt.as_bytes());
        raw[7] = 0x80;
        let huge = BasicParamTable::from_bytes(bfpt.revision(), &raw);
        assert_eq!(
            check_addressability(&huge, SpiFeatures::all()),
            Err(Error::ParsingFailed(ParseError::DensityTooLarge))
        );
    }

    #[test]
    fn test_quad_enable_decoding() {
        let base = StatusRegisters::default();

        let (bit, regs) = decode_quad_enable(QuadEnableRequirement::Sr1Bit6, base).unwrap();
        assert_eq!(bit, QuadEnableBit { register: 0, bit: 6 });
        assert_eq!(regs, base);

        let (bit, regs) = decode_quad_enable(QuadEnableRequirement::Sr2Bit7, base).unwrap();
        assert_eq!(bit.mask(), 0x80);
        assert_eq!(regs.read2_instruction, 0x3F);
        assert_eq!(regs.write2_instruction, Some(0x3E));

        let (_, regs) = decode_quad_enable(QuadEnableRequirement::Sr2Bit1Write31, base).unwrap();
        assert_eq!((regs.read2_instruction, regs.write2_instruction), (0x35, Some(0x31)));

        assert_eq!(decode_quad_enable(QuadEnableRequirement::None, base), None);
        assert_eq!(decode_quad_enable(QuadEnableRequirement::Unknown(7), base), None);
    }

    #[test]
    fn test_four_byte_priority() {
        use FourByteEntryMethods as M;
        assert_eq!(FourByteStrategy::select(M::all()), FourByteStrategy::AlwaysOn);
        assert_eq!(
            FourByteStrategy::select(M::INSTR_B7 | M::WREN_INSTR_B7),
            FourByteStrategy::EnterB7
        );
        assert_eq!(
            FourByteStrategy::select(M::BANK_REG | M::CONFIG_REG | M::EXT_ADDR_REG),
            FourByteStrategy::ConfigRegister
        );
        assert_eq!(
            FourByteStrategy::select(M::BANK_REG | M::EXT_ADDR_REG),
            FourByteStrategy::BankRegister
        );
        assert_eq!(FourByteStrategy::select(M::EXT_ADDR_REG), FourByteStrategy::ExtAddrRegister);
        assert_eq!(FourByteStrategy::select(M::DEDICATED_INSTRS), FourByteStrategy::None);
        assert_eq!(
            FourByteStrategy::ExtAddrRegister.address_width(),
            AddressWidth::ThreeByte
        );
    }
}
