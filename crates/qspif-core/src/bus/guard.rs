//! Scoped bus format override

use core::ops::{Deref, DerefMut};

use super::QspiBus;
use crate::error::Result;
use crate::spi::BusFormat;

/// Temporarily applied [`BusFormat`]
///
/// Created with [`FormatGuard::apply`], which switches the bus to a
/// transaction-specific format. The guard restores the command format
/// when dropped, including on early return through `?`. Use
/// [`finish`](Self::finish) to observe restore failures.
pub struct FormatGuard<'a, B: QspiBus + ?Sized> {
    bus: &'a mut B,
    restore: BusFormat,
    armed: bool,
}

impl<'a, B: QspiBus + ?Sized> FormatGuard<'a, B> {
    /// Configure `format` and remember `restore` for later
    pub fn apply(bus: &'a mut B, format: &BusFormat, restore: BusFormat) -> Result<Self> {
        if let Err(e) = bus.configure_format(format) {
            if bus.configure_format(&restore).is_err() {
                log::error!("Failed to restore bus format after error");
            }
            return Err(e);
        }
        Ok(Self {
            bus,
            restore,
            armed: true,
        })
    }

    /// Restore the saved format and report the outcome
    pub fn finish(mut self) -> Result<()> {
        self.armed = false;
        self.bus.configure_format(&self.restore)
    }
}

impl<B: QspiBus + ?Sized> Deref for FormatGuard<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.bus
    }
}

impl<B: QspiBus + ?Sized> DerefMut for FormatGuard<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        self.bus
    }
}

impl<B: QspiBus + ?Sized> Drop for FormatGuard<'_, B> {
    fn drop(&mut self) {
        if self.armed && self.bus.configure_format(&self.restore).is_err() {
            log::error!("Failed to restore bus format");
        }
    }
}
