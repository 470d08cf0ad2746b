//! CLI command implementations
//!
//! `sfdp` only decodes a dump. `emulate` goes through the full
//! [`BlockDevice`](qspif_core::blockdev::BlockDevice) contract, so every
//! step it prints is what a real transport would see.

pub mod emulate;
pub mod sfdp;
