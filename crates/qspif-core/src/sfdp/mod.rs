//! SFDP (Serial Flash Discoverable Parameters) parsing
//!
//! This module implements the subset of JEDEC JESD216 the block devices
//! need to configure themselves: the SFDP and parameter headers, the
//! Basic Flash Parameter Table and the single-descriptor Sector Map Table.
//!
//! # Overview
//!
//! SFDP data is stored in a reserved area of the flash chip and can be
//! read using the RDSFDP command (0x5A). The structure contains:
//!
//! - An SFDP header with signature and revision info
//! - One or more parameter headers describing available tables
//! - Parameter tables containing capability information
//!
//! The parser never talks to a bus itself. Every entry point takes a
//! `read_fn: FnMut(u32, &mut [u8]) -> Result<()>` so the same code serves
//! both transports and in-memory dumps (see [`slice_reader`]).
//!
//! # Usage
//!
//! ```ignore
//! use qspif_core::sfdp;
//!
//! let mut read = sfdp::slice_reader(&dump);
//! let headers = sfdp::parse_headers(&mut read)?;
//! let bfpt = sfdp::parse_basic_param_table(&mut read, &headers)?;
//! let map = sfdp::parse_sector_map_table(&mut read, &headers, &bfpt)?;
//! println!("{} bytes in {} regions", map.device_size, map.regions.len());
//! ```

mod parser;
mod types;

pub use parser::*;
pub use types::*;
