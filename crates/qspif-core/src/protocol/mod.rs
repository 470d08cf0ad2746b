//! Command/transport adapters
//!
//! Flash command sequences shared by both block devices are written once
//! against the [`FlashLink`] primitive set. [`QspiLink`] and [`SpiLink`]
//! implement it on top of the two transports and add the addressed data
//! commands (read, program, erase) in the negotiated format.

mod common;
mod qspi;
mod spi;

pub use common::*;
pub use qspi::QspiLink;
pub use spi::SpiLink;
