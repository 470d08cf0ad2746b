//! Bus collaborators
//!
//! The block devices never touch hardware directly. They talk to one of
//! two transport traits:
//!
//! - [`QspiBus`]: a QSPI controller that runs instruction/address/alternate/
//!   dummy/data transactions in a configurable [`BusFormat`](crate::spi::BusFormat)
//! - [`SpiMaster`]: a plain SPI master that runs [`SpiCommand`](crate::spi::SpiCommand)s

mod guard;
mod traits;

pub use guard::FormatGuard;
pub use traits::*;
