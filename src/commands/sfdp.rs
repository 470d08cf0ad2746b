//! SFDP dump decoder

use crate::error::CliError;
use qspif_core::bus::SpiFeatures;
use qspif_core::negotiate::{decode_quad_enable, select_read_mode, FourByteStrategy, StatusRegisters};
use qspif_core::region::EraseMap;
use qspif_core::sfdp::{self, BasicParamTable, HeaderInfo};
use std::path::Path;

/// Run the sfdp command
pub fn run_decode(dump: &Path) -> Result<(), CliError> {
    let image = std::fs::read(dump).map_err(CliError::io(dump))?;
    log::debug!("Loaded {} bytes of SFDP from {:?}", image.len(), dump);

    let info = sfdp::parse_headers(sfdp::slice_reader(&image))?;
    print_headers(&info);

    let bfpt = sfdp::parse_basic_param_table(sfdp::slice_reader(&image), &info)?;
    print_basic_table(&bfpt)?;

    let map = sfdp::parse_sector_map_table(sfdp::slice_reader(&image), &info, &bfpt)?;
    print_erase_map(&map);
    Ok(())
}

fn print_headers(info: &HeaderInfo) {
    println!("SFDP revision {}, {} parameter headers", info.revision, info.num_param_headers);
    for header in &info.headers {
        println!(
            "  ID 0x{:04X} rev {}: {} bytes at 0x{:06X}",
            header.id,
            header.revision,
            header.length_bytes(),
            header.table_pointer
        );
    }
}

fn print_basic_table(bfpt: &BasicParamTable) -> Result<(), CliError> {
    let size = bfpt.density_bytes().map_err(qspif_core::Error::from)?;
    println!();
    println!("Basic Flash Parameter Table ({} bytes, rev {})", bfpt.len(), bfpt.revision());
    println!("  Density:        {} bytes ({} KiB)", size, size / 1024);
    println!("  Page size:      {} bytes", bfpt.page_size());
    println!("  Address mode:   {:?}", bfpt.address_mode());
    match bfpt.legacy_erase_instruction() {
        Some(op) => println!("  Legacy 4K erase: 0x{:02X}", op),
        None => println!("  Legacy 4K erase: none"),
    }
    for (i, ty) in bfpt.erase_types().iter() {
        println!("  Erase type {}:   {} bytes, 0x{:02X}", i + 1, ty.size, ty.instruction);
    }

    let read = select_read_mode(bfpt, SpiFeatures::all());
    println!(
        "  Read mode:      {} 0x{:02X} ({} mode + {} dummy cycles)",
        read.io_mode, read.instruction, read.mode_cycles, read.dummy_cycles
    );

    let qer = bfpt.quad_enable();
    match decode_quad_enable(qer, StatusRegisters::default()) {
        Some((bit, regs)) => println!(
            "  Quad enable:    {:?}, SR{} bit {}, {} status registers",
            qer,
            bit.register + 1,
            bit.bit,
            regs.count
        ),
        None => println!("  Quad enable:    {:?}", qer),
    }
    println!("  QPI entry:      {:?}", bfpt.qpi_enable());
    println!(
        "  4-byte entry:   {:?} -> {:?}",
        bfpt.four_byte_entry(),
        FourByteStrategy::select(bfpt.four_byte_entry())
    );
    println!("  Soft reset:     {:?}", bfpt.soft_reset());
    Ok(())
}

fn print_erase_map(map: &EraseMap) {
    println!();
    if map.is_legacy() {
        println!("Erase map: legacy, 4K blocks");
    } else {
        println!("Erase map: {} region(s)", map.regions.len());
    }
    let mut start = 0u64;
    for (i, region) in map.regions.iter().enumerate() {
        println!(
            "  Region {}: 0x{:08X}-0x{:08X}, types {:?}, unit {} bytes",
            i,
            start,
            region.high_boundary,
            region.erase_types,
            map.erase_size_at(start)
        );
        start = region.high_boundary + 1;
    }
    println!("  Uniform erase size: {} bytes", map.erase_size());
}

#[cfg(test)]
mod tests {
    use super::*;
    use qspif_dummy::SfdpImage;

    #[test]
    fn test_decode_file() {
        let path = std::env::temp_dir().join(format!("qspif-sfdp-{}.bin", std::process::id()));
        let image = SfdpImage::new(16 * 1024 * 1024)
            .erase_type(1, 16, 0xD8)
            .sector_map(&[(64 * 1024, 0x01), (16 * 1024 * 1024 - 64 * 1024, 0x03)])
            .build();
        std::fs::write(&path, image).unwrap();

        let result = run_decode(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_missing_file() {
        let err = run_decode(Path::new("/nonexistent/sfdp.bin")).unwrap_err();
        assert!(matches!(err, CliError::Io { .. }));
    }
}
