//! CLI argument parsing

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u64
fn parse_hex_u64(s: &str) -> Result<u64, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u64>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a JEDEC manufacturer byte
fn parse_manufacturer(s: &str) -> Result<u8, String> {
    let value = parse_hex_u64(s)?;
    u8::try_from(value).map_err(|_| format!("Manufacturer ID out of range: {}", s))
}

#[derive(Parser)]
#[command(name = "qspif")]
#[command(author, version, about = "SFDP-driven SPI NOR flash tool", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decode an SFDP dump
    Sfdp {
        /// SFDP image file (as read with instruction 0x5A from address 0)
        dump: PathBuf,
    },

    /// Bring up a block device on an emulated flash seeded with an SFDP dump
    Emulate(EmulateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct EmulateArgs {
    /// SFDP image file served by the emulated part
    #[arg(long)]
    pub sfdp: PathBuf,

    /// JEDEC manufacturer ID reported by the part (e.g. 0xC2)
    #[arg(long, value_parser = parse_manufacturer, default_value = "0xEF")]
    pub manufacturer: u8,

    /// Image to erase and program into the device
    #[arg(long)]
    pub write: Option<PathBuf>,

    /// Device offset for --write (hex with 0x prefix or decimal)
    #[arg(long, value_parser = parse_hex_u64, default_value = "0", requires = "write")]
    pub offset: u64,

    /// Read the whole device back into this file
    #[arg(long)]
    pub read_back: Option<PathBuf>,
}
