//! qspif - SFDP-driven SPI NOR flash tool
//!
//! Decodes SFDP dumps and exercises the block devices of `qspif-core`
//! against the in-memory emulator from `qspif-dummy`:
//! - **sfdp** - Print what a part advertises and what the negotiator
//!   would pick for a full-featured controller
//! - **emulate** - Bring up a `QspifBlockDevice` on an emulated part
//!   serving the dump, then optionally program an image and read it back

mod cli;
mod commands;
mod error;

use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.verbose {
        0 => {}
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let result = match cli.command {
        Commands::Sfdp { dump } => commands::sfdp::run_decode(&dump),
        Commands::Emulate(args) => commands::emulate::run_emulate(&args),
    };

    if let Err(e) = result {
        log::error!("{}", e);
        return Err(e.into());
    }
    Ok(())
}
