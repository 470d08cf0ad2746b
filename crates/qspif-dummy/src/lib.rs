//! qspif-dummy - In-memory SFDP NOR flash emulator for testing
//!
//! This crate provides a dummy flash chip that serves a caller-supplied
//! SFDP image and emulates the register set the block devices negotiate
//! with: status registers, quad enable, QPI entry, the 4-byte addressing
//! mechanisms, soft reset and block protection. It's useful for testing
//! and development without real hardware.
//!
//! [`SfdpImage`] builds synthetic SFDP images.

mod flash;
mod image;

pub use flash::{DummyConfig, DummyFlash, Transaction};
pub use image::SfdpImage;
