//! Process-wide chip-select reservations
//!
//! Two block devices must never drive the same chip select. Each device
//! reserves its chip select when it is constructed and holds the
//! [`Reservation`] until the outermost `deinit` or until it is dropped.
//! A device constructed while its chip select was taken tries again in
//! `init`.

use std::sync::{Mutex, PoisonError};

use crate::error::{Error, Result};

/// Maximum number of devices holding a chip select at once
pub const MAX_ACTIVE_DEVICES: usize = 10;

/// Chip-select pin identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChipSelect(pub u32);

impl core::fmt::Display for ChipSelect {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "CS{}", self.0)
    }
}

/// Bounded set of reserved chip selects
pub struct ChipSelectRegistry {
    active: Mutex<heapless::Vec<ChipSelect, MAX_ACTIVE_DEVICES>>,
}

static GLOBAL: ChipSelectRegistry = ChipSelectRegistry::new();

impl ChipSelectRegistry {
    /// Empty registry
    pub const fn new() -> Self {
        Self {
            active: Mutex::new(heapless::Vec::new()),
        }
    }

    /// Registry shared by every device in the process
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Reserve `cs`, failing if it is taken or the registry is full
    pub fn try_reserve(&'static self, cs: ChipSelect) -> Result<Reservation> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.contains(&cs) {
            log::error!("{} is already in use", cs);
            return Err(Error::DeviceNotUnique);
        }
        if active.push(cs).is_err() {
            log::error!("Too many active devices ({})", MAX_ACTIVE_DEVICES);
            return Err(Error::DeviceMaxExceeded);
        }
        log::trace!("Reserved {}", cs);
        Ok(Reservation { registry: self, cs })
    }

    /// Whether `cs` is currently reserved
    pub fn is_reserved(&self, cs: ChipSelect) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&cs)
    }

    /// Number of reserved chip selects
    pub fn len(&self) -> usize {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no chip select is reserved
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, cs: ChipSelect) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = active.iter().position(|c| *c == cs) {
            active.swap_remove(pos);
            log::trace!("Released {}", cs);
        }
    }
}

impl Default for ChipSelectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A reserved chip select, released on drop
#[derive(Debug)]
pub struct Reservation {
    registry: &'static ChipSelectRegistry,
    cs: ChipSelect,
}

impl Reservation {
    /// The reserved chip select
    pub fn chip_select(&self) -> ChipSelect {
        self.cs
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.registry.release(self.cs);
    }
}

impl core::fmt::Debug for ChipSelectRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChipSelectRegistry")
            .field("active", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_and_release() {
        static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();

        let first = REGISTRY.try_reserve(ChipSelect(3)).unwrap();
        assert_eq!(first.chip_select(), ChipSelect(3));
        assert_eq!(
            REGISTRY.try_reserve(ChipSelect(3)).unwrap_err(),
            Error::DeviceNotUnique
        );

        drop(first);
        assert!(!REGISTRY.is_reserved(ChipSelect(3)));
        let again = REGISTRY.try_reserve(ChipSelect(3)).unwrap();
        assert!(REGISTRY.is_reserved(again.chip_select()));
    }

    #[test]
    fn test_capacity() {
        static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();

        let held: std::vec::Vec<Reservation> = (0..MAX_ACTIVE_DEVICES as u32)
            .map(|pin| REGISTRY.try_reserve(ChipSelect(pin)).unwrap())
            .collect();
        assert_eq!(REGISTRY.len(), MAX_ACTIVE_DEVICES);
        assert_eq!(
            REGISTRY.try_reserve(ChipSelect(99)).unwrap_err(),
            Error::DeviceMaxExceeded
        );

        drop(held);
        assert!(REGISTRY.is_empty());
    }
}
