//! qspif-core - SFDP-driven SPI/QSPI NOR flash block device layer
//!
//! This crate discovers the capabilities of a serial NOR flash chip at
//! runtime by parsing its JEDEC SFDP tables, negotiates bus width, address
//! mode and erase granularity accordingly, and exposes a uniform block
//! device contract on top of it.
//!
//! The SFDP parser, the erase-region model, the command adapters and the
//! capability negotiator are `no_std` compatible. The block devices and the
//! chip-select registry need `std` for their locks.
//!
//! # Features
//!
//! - `std` - Enable the block devices and the chip-select registry (includes `alloc`)
//! - `alloc` - Enable heap allocation
//!
//! # Example
//!
//! ```ignore
//! use qspif_core::blockdev::{BlockDevice, QspifBlockDevice};
//! use qspif_core::registry::ChipSelect;
//! use qspif_core::QspifConfig;
//!
//! fn bring_up<B: qspif_core::bus::QspiBus + Send>(bus: B) -> qspif_core::Result<()> {
//!     let dev = QspifBlockDevice::new(bus, ChipSelect(0), QspifConfig::default());
//!     dev.init()?;
//!     println!("{} bytes, erase unit {}", dev.size(), dev.erase_size());
//!     dev.deinit()
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

#[cfg(feature = "std")]
pub mod blockdev;
pub mod bus;
pub mod config;
pub mod error;
pub mod negotiate;
pub mod protocol;
pub mod region;
#[cfg(feature = "std")]
pub mod registry;
pub mod sfdp;
pub mod spi;

pub use config::{QspifConfig, ReadyPoll, SpifConfig};
pub use error::{Error, ParseError, Result};
