//! SPI types and command structures
//!
//! This module provides types for describing SPI and QSPI transactions:
//! address widths, multi-I/O modes, QSPI bus formats and the standard
//! JEDEC opcodes used by the block devices.

mod address;
mod command;
mod format;
mod io_mode;
pub mod opcodes;

pub use address::AddressWidth;
pub use command::SpiCommand;
pub use format::{BusFormat, BusWidth};
pub use io_mode::IoMode;
pub use opcodes::*;
