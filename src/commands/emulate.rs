//! Block device bring-up on the in-memory emulator

use crate::cli::EmulateArgs;
use crate::error::CliError;
use indicatif::{ProgressBar, ProgressStyle};
use qspif_core::blockdev::{BlockDevice, QspifBlockDevice};
use qspif_core::registry::ChipSelect;
use qspif_core::QspifConfig;
use qspif_dummy::{DummyConfig, DummyFlash};
use std::path::Path;

/// Chunk size for programming and reading back (4 KiB)
const CHUNK_SIZE: usize = 4096;

fn progress_bar(len: u64, action: &str) -> Result<ProgressBar, CliError> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{eta}}) {}",
                action
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Run the emulate command
pub fn run_emulate(args: &EmulateArgs) -> Result<(), CliError> {
    let sfdp = std::fs::read(&args.sfdp).map_err(CliError::io(&args.sfdp))?;
    let flash = DummyFlash::new(DummyConfig::new(sfdp).with_manufacturer(args.manufacturer));
    let dev = QspifBlockDevice::new(flash, ChipSelect(0), QspifConfig::default());

    dev.init()?;
    let result = exercise(&dev, args);
    let deinit = dev.deinit();
    result?;
    deinit?;
    Ok(())
}

fn exercise(dev: &QspifBlockDevice<DummyFlash>, args: &EmulateArgs) -> Result<(), CliError> {
    print_geometry(dev);

    if let Some(path) = &args.write {
        let image = std::fs::read(path).map_err(CliError::io(path))?;
        write_image(dev, &image, args.offset)?;
        verify_image(dev, &image, args.offset)?;
        println!("Wrote and verified {} bytes at 0x{:X}", image.len(), args.offset);
    }

    if let Some(path) = &args.read_back {
        read_back(dev, path)?;
    }
    Ok(())
}

fn print_geometry(dev: &QspifBlockDevice<DummyFlash>) {
    println!("Device:       {} on {}", dev.block_type(), dev.chip_select());
    println!("Size:         {} bytes", dev.size());
    println!("Read size:    {}", dev.read_size());
    println!("Program size: {}", dev.program_size());
    println!("Erase size:   {}", dev.erase_size());
    if let Some(quirk) = dev.quirk() {
        println!("Quirk:        {}", quirk);
    }
    if let Some(config) = dev.bus_config() {
        println!(
            "Read mode:    {} 0x{:02X}, commands {}",
            config.read_mode.io_mode, config.read_mode.instruction, config.command_mode
        );
        println!(
            "Addressing:   {} bytes ({:?})",
            config.address_width.bytes(),
            config.four_byte
        );
        if let Some(qe) = config.quad_enable {
            println!("Quad enable:  SR{} bit {}", qe.register + 1, qe.bit);
        }
    }
    if let Some(map) = dev.erase_map() {
        let mut start = 0u64;
        for (i, region) in map.regions.iter().enumerate() {
            println!(
                "Region {}:     0x{:08X}-0x{:08X}, unit {} bytes",
                i,
                start,
                region.high_boundary,
                map.erase_size_at(start)
            );
            start = region.high_boundary + 1;
        }
    }
}

fn write_image<D: BlockDevice>(dev: &D, image: &[u8], offset: u64) -> Result<(), CliError> {
    let len = image.len() as u64;
    let size = dev.size();
    if offset.checked_add(len).map_or(true, |end| end > size) {
        return Err(CliError::ImageTooLarge { len, offset, size });
    }
    if image.is_empty() {
        return Ok(());
    }

    let unit = dev.erase_size_at(offset);
    if offset % unit != 0 {
        return Err(CliError::Misaligned { offset, unit });
    }

    // erase whole units up to the end of the image
    let pb = progress_bar(len, "Erasing")?;
    let mut addr = offset;
    while addr < offset + len {
        let unit = dev.erase_size_at(addr);
        dev.erase(addr, unit)?;
        addr += unit;
        pb.set_position((addr - offset).min(len));
    }
    pb.finish_and_clear();

    let pb = progress_bar(len, "Writing")?;
    let mut addr = offset;
    for chunk in image.chunks(CHUNK_SIZE) {
        dev.program(chunk, addr)?;
        addr += chunk.len() as u64;
        pb.inc(chunk.len() as u64);
    }
    pb.finish_with_message("Write complete");
    Ok(())
}

fn verify_image<D: BlockDevice>(dev: &D, image: &[u8], offset: u64) -> Result<(), CliError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut addr = offset;
    for chunk in image.chunks(CHUNK_SIZE) {
        let got = &mut buf[..chunk.len()];
        dev.read(got, addr)?;
        if let Some(pos) = got.iter().zip(chunk).position(|(a, b)| a != b) {
            return Err(CliError::VerifyMismatch(addr + pos as u64));
        }
        addr += chunk.len() as u64;
    }
    Ok(())
}

fn read_back<D: BlockDevice>(dev: &D, path: &Path) -> Result<(), CliError> {
    let size = dev.size();
    let mut data = vec![0u8; size as usize];

    let pb = progress_bar(size, "Reading")?;
    let mut addr = 0u64;
    for chunk in data.chunks_mut(CHUNK_SIZE) {
        dev.read(chunk, addr)?;
        addr += chunk.len() as u64;
        pb.set_position(addr);
    }
    pb.finish_with_message("Read complete");

    std::fs::write(path, &data).map_err(CliError::io(path))?;
    println!("Wrote {} bytes to {:?}", data.len(), path);
    Ok(())
}
