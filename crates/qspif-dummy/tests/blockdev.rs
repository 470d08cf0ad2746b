//! Block device bring-up and data path against the emulated flash

use qspif_core::blockdev::{BlockDevice, QspifBlockDevice, SpifBlockDevice};
use qspif_core::bus::SpiFeatures;
use qspif_core::negotiate::quirks::Quirk;
use qspif_core::negotiate::{FourByteStrategy, QuadEnableBit};
use qspif_core::registry::{ChipSelect, ChipSelectRegistry};
use qspif_core::sfdp::FourByteEntryMethods;
use qspif_core::spi::{opcodes, AddressWidth, IoMode};
use qspif_core::{Error, ParseError, QspifConfig, SpifConfig};
use qspif_dummy::{DummyConfig, DummyFlash, SfdpImage, Transaction};

const MIB: u64 = 1024 * 1024;

fn device(
    flash: &DummyFlash,
    registry: &'static ChipSelectRegistry,
) -> QspifBlockDevice<DummyFlash> {
    QspifBlockDevice::with_registry(flash.clone(), ChipSelect(0), QspifConfig::default(), registry)
}

fn flash(image: &SfdpImage) -> DummyFlash {
    DummyFlash::new(DummyConfig::new(image.build()))
}

/// Instructions of every command except status polling
fn commands(flash: &DummyFlash) -> Vec<(u8, Option<u32>)> {
    flash
        .transactions()
        .into_iter()
        .filter_map(|t| match t {
            Transaction::Command {
                instruction,
                address,
                ..
            } if instruction != opcodes::RDSR => Some((instruction, address)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_geometry_32mib() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let flash = flash(&SfdpImage::new(32 * MIB));
    let dev = device(&flash, &REGISTRY);

    dev.init().unwrap();
    assert_eq!(dev.size(), 33_554_432);
    assert_eq!(dev.read_size(), 1);
    assert_eq!(dev.program_size(), 1);
    assert_eq!(dev.erase_size(), 4096);
    assert_eq!(dev.erase_size_at(20 * MIB), 4096);
    assert_eq!(dev.erase_value(), 0xFF);
    assert_eq!(dev.block_type(), "QSPIF");

    let map = dev.erase_map().unwrap();
    assert_eq!(map.regions.len(), 1);
    assert_eq!(map.regions[0].high_boundary, 33_554_431);

    let config = dev.bus_config().unwrap();
    assert_eq!(config.read_mode.io_mode, IoMode::Single);
    assert_eq!(config.address_width, AddressWidth::ThreeByte);
    assert_eq!(flash.frequency(), 40_000_000);
    dev.deinit().unwrap();
}

#[test]
fn test_erase_sequence() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let flash = flash(&SfdpImage::new(32 * MIB));
    let dev = device(&flash, &REGISTRY);
    dev.init().unwrap();
    flash.clear_log();

    dev.erase(4096, 8192).unwrap();

    assert_eq!(
        commands(&flash),
        [
            (opcodes::WREN, None),
            (opcodes::SE_20, Some(4096)),
            (opcodes::WREN, None),
            (opcodes::SE_20, Some(8192)),
        ]
    );
    // every erase is followed by a status poll
    let log = flash.transactions();
    for (i, t) in log.iter().enumerate() {
        if t.instruction() == Some(opcodes::SE_20) {
            assert_eq!(log[i + 1].instruction(), Some(opcodes::RDSR));
        }
    }
}

#[test]
fn test_quad_enable_in_sr1() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let image = SfdpImage::new(16 * MIB)
        .fast_read(IoMode::QuadIo, 0xEB, 2, 4)
        .quad_enable(2);
    let flash = DummyFlash::new(DummyConfig::new(image.build()).with_status([0x00, 0x5A, 0x00]));
    let dev = device(&flash, &REGISTRY);
    dev.init().unwrap();

    let status = flash.status_registers();
    assert_eq!(status[0] & 0x40, 0x40);
    assert_eq!(status[1], 0x5A);

    let qe_write = flash
        .transactions()
        .into_iter()
        .find_map(|t| match t {
            Transaction::Command {
                instruction: opcodes::WRSR,
                tx,
                ..
            } => Some(tx),
            _ => None,
        })
        .unwrap();
    assert_eq!(qe_write, [0x40]);
    assert!(!commands(&flash).iter().any(|c| c.0 == opcodes::WRSR2));

    let config = dev.bus_config().unwrap();
    assert_eq!(config.read_mode.io_mode, IoMode::QuadIo);
    assert_eq!(config.quad_enable, Some(QuadEnableBit { register: 0, bit: 6 }));

    dev.program(&[0xA5; 8], 0x100).unwrap();
    let mut buf = [0u8; 8];
    dev.read(&mut buf, 0x100).unwrap();
    assert_eq!(buf, [0xA5; 8]);
}

#[test]
fn test_read_mode_priority() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let image = SfdpImage::new(16 * MIB)
        .fast_read(IoMode::QuadIo, 0xEB, 2, 4)
        .fast_read(IoMode::Qpi, 0xEB, 2, 4)
        .fast_read(IoMode::QuadOut, 0x6B, 0, 8)
        .fast_read(IoMode::Dpi, 0xBB, 0, 4)
        .fast_read(IoMode::DualIo, 0xBB, 4, 0)
        .fast_read(IoMode::DualOut, 0x3B, 0, 8)
        .qpi_sequence(0x02)
        .quad_enable(4)
        .build();

    let cases = [
        (SpiFeatures::all(), IoMode::QuadIo),
        (SpiFeatures::all() - SpiFeatures::QUAD_IO, IoMode::Qpi),
        (SpiFeatures::QUAD_IN | SpiFeatures::DUAL | SpiFeatures::DPI, IoMode::QuadOut),
        (SpiFeatures::DUAL | SpiFeatures::DPI, IoMode::Dpi),
        (SpiFeatures::DUAL, IoMode::DualIo),
        (SpiFeatures::DUAL_IN, IoMode::DualOut),
        (SpiFeatures::empty(), IoMode::Single),
    ];
    for (features, expected) in cases {
        let flash = DummyFlash::new(DummyConfig::new(image.clone()).with_features(features));
        flash.load(0x40, b"priority");
        let dev = device(&flash, &REGISTRY);
        dev.init().unwrap();

        assert_eq!(dev.bus_config().unwrap().read_mode.io_mode, expected);
        assert_eq!(flash.qpi_enabled(), expected == IoMode::Qpi);
        let mut buf = [0u8; 8];
        dev.read(&mut buf, 0x40).unwrap();
        assert_eq!(&buf, b"priority");

        dev.deinit().unwrap();
    }
}

#[test]
fn test_nested_init() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let flash = flash(&SfdpImage::new(MIB));
    let dev = device(&flash, &REGISTRY);

    for _ in 0..3 {
        dev.init().unwrap();
    }
    for _ in 0..2 {
        dev.deinit().unwrap();
        assert_eq!(dev.size(), MIB);
    }
    assert!(REGISTRY.is_reserved(ChipSelect(0)));

    dev.deinit().unwrap();
    assert_eq!(dev.size(), 0);
    assert!(!REGISTRY.is_reserved(ChipSelect(0)));
    let wrdi = commands(&flash).iter().filter(|c| c.0 == opcodes::WRDI).count();
    assert_eq!(wrdi, 1);

    // more deinit than init is a no-op
    dev.deinit().unwrap();
    dev.init().unwrap();
    assert_eq!(dev.size(), MIB);
}

#[test]
fn test_chip_select_uniqueness() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let flash = flash(&SfdpImage::new(MIB));
    let first = device(&flash, &REGISTRY);
    let second = device(&flash, &REGISTRY);

    first.init().unwrap();
    let err = second.init().unwrap_err();
    assert_eq!(err, Error::DeviceNotUnique);
    assert_eq!(err.code(), -4006);

    first.deinit().unwrap();
    let third = device(&flash, &REGISTRY);
    third.init().unwrap();
}

#[test]
fn test_duplicate_chip_select_fails_before_first_init() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let flash = flash(&SfdpImage::new(MIB));
    let first = device(&flash, &REGISTRY);
    let second = device(&flash, &REGISTRY);

    let err = second.init().unwrap_err();
    assert_eq!(err, Error::DeviceNotUnique);
    assert_eq!(err.code(), -4006);
    assert_eq!(second.size(), 0);

    first.init().unwrap();
    first.deinit().unwrap();
    assert!(REGISTRY.is_empty());

    drop(second);
    let third = device(&flash, &REGISTRY);
    third.init().unwrap();
    assert_eq!(third.size(), MIB);
}

#[test]
fn test_deinit_reports_write_disable_failure() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let flash = flash(&SfdpImage::new(MIB));
    let dev = device(&flash, &REGISTRY);
    dev.init().unwrap();

    flash.fail_instruction(Some(opcodes::WRDI));
    let err = dev.deinit().unwrap_err();
    assert_eq!(err, Error::DeviceError);
    assert_eq!(err.code(), -4001);
    assert_eq!(dev.size(), 0);
    assert!(REGISTRY.is_empty());

    flash.fail_instruction(None);
    dev.init().unwrap();
}

#[test]
fn test_misaligned_erase_touches_nothing() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let flash = flash(&SfdpImage::new(MIB));
    let dev = device(&flash, &REGISTRY);
    dev.init().unwrap();
    flash.clear_log();

    for (addr, size) in [(100, 4096), (0, 100), (MIB - 4096, 8192)] {
        let err = dev.erase(addr, size).unwrap_err();
        assert_eq!(err, Error::InvalidEraseParams);
        assert_eq!(err.code(), -4005);
    }
    assert!(flash.transactions().is_empty());
}

#[test]
fn test_program_splits_pages() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let flash = flash(&SfdpImage::new(MIB));
    let dev = device(&flash, &REGISTRY);
    dev.init().unwrap();
    flash.clear_log();

    let data: Vec<u8> = (0..600u32).map(|i| i as u8).collect();
    dev.program(&data, 200).unwrap();

    let writes: Vec<(u32, usize)> = flash
        .transactions()
        .into_iter()
        .filter_map(|t| match t {
            Transaction::Write { address, len, .. } => Some((address, len)),
            _ => None,
        })
        .collect();
    assert_eq!(writes, [(200, 56), (256, 256), (512, 256), (768, 32)]);
    assert_eq!(flash.memory(200, 600), data);

    let mut back = vec![0u8; 600];
    dev.read(&mut back, 200).unwrap();
    assert_eq!(back, data);
}

#[test]
fn test_out_of_range_access() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let flash = flash(&SfdpImage::new(MIB));
    let dev = device(&flash, &REGISTRY);
    dev.init().unwrap();
    flash.clear_log();

    let mut buf = [0u8; 16];
    assert_eq!(dev.read(&mut buf, MIB - 8), Err(Error::AddressOutOfBounds));
    assert_eq!(dev.program(&buf, MIB), Err(Error::AddressOutOfBounds));
    assert_eq!(dev.read(&mut [], 0), Ok(()));
    assert_eq!(dev.program(&[], 0), Ok(()));
    assert!(flash.transactions().is_empty());
}

#[test]
fn test_enter_b7_four_byte_mode() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let image = SfdpImage::new(64 * MIB)
        .address_mode(1)
        .four_byte_entry(FourByteEntryMethods::INSTR_B7 | FourByteEntryMethods::EXT_ADDR_REG);
    let flash = flash(&image);
    let dev = device(&flash, &REGISTRY);
    dev.init().unwrap();

    let config = dev.bus_config().unwrap();
    assert_eq!(config.four_byte, FourByteStrategy::EnterB7);
    assert_eq!(config.address_width, AddressWidth::FourByte);
    assert!(flash.four_byte_mode());

    dev.erase(40 * MIB, 4096).unwrap();
    dev.program(b"high", 40 * MIB).unwrap();
    assert_eq!(flash.memory(40 * MIB, 4), b"high");
}

#[test]
fn test_ext_addr_register_mode() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let image = SfdpImage::new(32 * MIB)
        .address_mode(1)
        .four_byte_entry(FourByteEntryMethods::EXT_ADDR_REG);
    let flash = flash(&image);
    flash.load(16 * MIB - 4, b"splitread");
    let dev = device(&flash, &REGISTRY);
    dev.init().unwrap();

    let config = dev.bus_config().unwrap();
    assert!(config.uses_ext_addr_register());
    assert_eq!(config.address_width, AddressWidth::ThreeByte);

    flash.clear_log();
    let mut buf = [0u8; 9];
    dev.read(&mut buf, 16 * MIB - 4).unwrap();
    assert_eq!(&buf, b"splitread");
    assert_eq!(flash.ext_addr(), 1);

    let ext_writes: Vec<Option<u32>> = commands(&flash)
        .into_iter()
        .filter(|c| c.0 == opcodes::WREAR)
        .map(|c| c.1)
        .collect();
    assert_eq!(ext_writes.len(), 2);

    for addr in [0, 20 * MIB] {
        dev.erase(addr, 4096).unwrap();
        dev.program(b"abcd", addr).unwrap();
        assert_eq!(flash.memory(addr, 4), b"abcd");

        let mut back = [0u8; 4];
        dev.read(&mut back, addr).unwrap();
        assert_eq!(&back, b"abcd");
    }
    assert_eq!(flash.ext_addr(), 1);
}

#[test]
fn test_round_trip_above_16mib_per_strategy() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let cases = [
        (FourByteEntryMethods::ALWAYS_4BYTE, FourByteStrategy::AlwaysOn),
        (FourByteEntryMethods::INSTR_B7, FourByteStrategy::EnterB7),
        (FourByteEntryMethods::WREN_INSTR_B7, FourByteStrategy::WrenEnterB7),
        (FourByteEntryMethods::CONFIG_REG, FourByteStrategy::ConfigRegister),
        (FourByteEntryMethods::BANK_REG, FourByteStrategy::BankRegister),
        (FourByteEntryMethods::EXT_ADDR_REG, FourByteStrategy::ExtAddrRegister),
    ];
    let data: Vec<u8> = (0..300u32).map(|i| (i * 3) as u8).collect();

    for (methods, strategy) in cases {
        let image = SfdpImage::new(32 * MIB).address_mode(1).four_byte_entry(methods);
        let flash = flash(&image);
        flash.load(20 * MIB, &[0u8; 16]);
        let dev = device(&flash, &REGISTRY);
        dev.init().unwrap();
        assert_eq!(dev.bus_config().unwrap().four_byte, strategy);

        // one erase unit above the boundary, one straddling it
        for addr in [20 * MIB, 16 * MIB - 4096] {
            dev.erase(addr, 8192).unwrap();
            dev.program(&data, addr + 4096 - 100).unwrap();

            let mut back = vec![0u8; data.len()];
            dev.read(&mut back, addr + 4096 - 100).unwrap();
            assert_eq!(back, data, "{:?} at 0x{:X}", strategy, addr);
            assert_eq!(flash.memory(addr + 4096 - 100, data.len()), data);
        }
        assert_eq!(flash.memory(20 * MIB, 16), [0xFF; 16]);

        dev.deinit().unwrap();
    }
    assert!(REGISTRY.is_empty());
}

#[test]
fn test_four_byte_disabled_by_config() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let image = SfdpImage::new(32 * MIB)
        .address_mode(1)
        .four_byte_entry(FourByteEntryMethods::INSTR_B7);
    let flash = flash(&image);
    let dev = QspifBlockDevice::with_registry(
        flash.clone(),
        ChipSelect(0),
        QspifConfig::default().with_four_byte_addressing(false),
        &REGISTRY,
    );
    dev.init().unwrap();
    assert_eq!(dev.bus_config().unwrap().four_byte, FourByteStrategy::None);
    assert!(!flash.four_byte_mode());
}

#[test]
fn test_macronix_quirk() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let image = SfdpImage::new(32 * MIB)
        .fast_read(IoMode::QuadIo, 0xEB, 2, 4)
        .quad_enable(2)
        .address_mode(1)
        .four_byte_entry(FourByteEntryMethods::INSTR_B7);
    let flash = DummyFlash::new(DummyConfig::new(image.build()).with_manufacturer(0xC2));
    let dev = device(&flash, &REGISTRY);
    dev.init().unwrap();

    assert_eq!(dev.quirk(), Some(Quirk::Macronix));
    let config = dev.bus_config().unwrap();
    assert_eq!(config.status_registers.count, 3);
    assert_eq!(config.four_byte, FourByteStrategy::None);
    assert!(!flash.four_byte_mode());

    let status = flash.status_registers();
    assert_eq!(status[0] & 0x40, 0x40);
    assert_eq!(status[2] & 0x02, 0x02);

    // fast mode is set before the clock is raised
    let log = flash.transactions();
    let fast_mode = log
        .iter()
        .rposition(|t| matches!(t, Transaction::Command { instruction: opcodes::WRSR, tx, .. } if tx.len() == 3))
        .unwrap();
    let raise = log
        .iter()
        .position(|t| *t == Transaction::Frequency(40_000_000))
        .unwrap();
    assert!(fast_mode < raise);
}

#[test]
fn test_sst_global_unlock() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let flash = DummyFlash::new(
        DummyConfig::new(SfdpImage::new(MIB).build())
            .with_manufacturer(0xBF)
            .with_status([0x3C, 0x00, 0x00]),
    );
    let dev = device(&flash, &REGISTRY);
    dev.init().unwrap();

    assert!(commands(&flash).iter().any(|c| c.0 == opcodes::ULBPR));
    assert_eq!(flash.status_registers()[0] & 0x3C, 0);
}

#[test]
fn test_protection_cleared_through_sr1() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let flash = DummyFlash::new(
        DummyConfig::new(SfdpImage::new(MIB).build()).with_status([0x1C, 0x00, 0x00]),
    );
    let dev = device(&flash, &REGISTRY);
    dev.init().unwrap();

    assert_eq!(flash.status_registers()[0], 0x00);
    assert!(!commands(&flash).iter().any(|c| c.0 == opcodes::ULBPR));
}

#[test]
fn test_boot_sector_map() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let image = SfdpImage::new(2 * MIB)
        .erase_type(1, 16, 0xD8)
        .sector_map(&[(64 * 1024, 0x01), (1984 * 1024, 0x03)]);
    let flash = flash(&image);
    let dev = device(&flash, &REGISTRY);
    dev.init().unwrap();

    assert_eq!(dev.erase_size(), 4096);
    assert_eq!(dev.erase_size_at(0), 4096);
    assert_eq!(dev.erase_size_at(MIB), 4096);

    flash.clear_log();
    dev.erase(0, 128 * 1024).unwrap();
    let erases: Vec<(u8, Option<u32>)> = commands(&flash)
        .into_iter()
        .filter(|c| c.0 != opcodes::WREN)
        .collect();
    assert_eq!(erases.len(), 17);
    assert!(erases[..16].iter().all(|c| c.0 == 0x20));
    assert_eq!(erases[16], (0xD8, Some(64 * 1024)));
}

#[test]
fn test_write_enable_failure() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let flash = flash(&SfdpImage::new(MIB));
    let dev = device(&flash, &REGISTRY);
    dev.init().unwrap();

    flash.set_wel_stuck(true);
    let err = dev.program(&[0u8; 4], 0).unwrap_err();
    assert_eq!(err, Error::WrenFailed);
    assert_eq!(err.code(), -4004);
}

#[test]
fn test_bad_sfdp_fails_init() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let mut image = SfdpImage::new(MIB).build();
    image[0] = b'X';
    let flash = DummyFlash::new(DummyConfig::new(image));
    let dev = device(&flash, &REGISTRY);

    let err = dev.init().unwrap_err();
    assert!(matches!(err, Error::ParsingFailed(ParseError::BadSignature { .. })));
    assert_eq!(err.code(), -4002);
    assert_eq!(dev.size(), 0);

    assert!(REGISTRY.is_reserved(ChipSelect(0)));
    drop(dev);
    assert!(REGISTRY.is_empty());
}

#[test]
fn test_missing_soft_reset_fails_init() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let flash = flash(&SfdpImage::new(MIB).soft_reset(0x00));
    let dev = device(&flash, &REGISTRY);
    assert_eq!(
        dev.init(),
        Err(Error::ParsingFailed(ParseError::NoSoftReset))
    );
}

#[test]
fn test_failed_read_restores_command_format() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let image = SfdpImage::new(MIB)
        .fast_read(IoMode::QuadIo, 0xEB, 2, 4)
        .quad_enable(4);
    let flash = flash(&image);
    let dev = device(&flash, &REGISTRY);
    dev.init().unwrap();
    let command_format = dev.bus_config().unwrap().command_format();

    flash.fail_instruction(Some(0xEB));
    let mut buf = [0u8; 4];
    assert_eq!(dev.read(&mut buf, 0), Err(Error::DeviceError));
    assert_eq!(flash.format(), command_format);
}

#[test]
fn test_spif_four_byte_instructions() {
    static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
    let flash = DummyFlash::new(
        DummyConfig::new(SfdpImage::new(32 * MIB).build()).with_max_transfer_len(1024),
    );
    let dev = SpifBlockDevice::with_registry(
        flash.clone(),
        ChipSelect(7),
        SpifConfig::default(),
        &REGISTRY,
    );
    dev.init().unwrap();
    assert_eq!(dev.size(), 32 * MIB);
    assert_eq!(dev.block_type(), "SPIF");

    let addr = 20 * MIB;
    let data: Vec<u8> = (0..2148u32).map(|i| (i * 7) as u8).collect();
    flash.clear_log();
    dev.erase(addr, 4096).unwrap();
    dev.program(&data, addr).unwrap();

    let mut back = vec![0u8; data.len()];
    dev.read(&mut back, addr).unwrap();
    assert_eq!(back, data);

    let used: Vec<u8> = commands(&flash).into_iter().map(|c| c.0).collect();
    assert!(used.contains(&opcodes::SE_21));
    assert!(used.contains(&opcodes::PP_4B));
    assert_eq!(used.iter().filter(|&&op| op == opcodes::READ_4B).count(), 3);
    assert!(!used.contains(&opcodes::READ));

    dev.deinit().unwrap();
    assert!(REGISTRY.is_empty());
}
