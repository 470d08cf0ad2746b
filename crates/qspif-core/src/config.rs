//! Device configuration
//!
//! Both block devices take a small `Copy` configuration at construction.
//! Defaults match common QSPI targets; use the `with_*` builders to
//! override individual fields.

/// Busy-bit polling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyPoll {
    /// Sleep between two status reads, in microseconds
    pub interval_us: u32,
    /// Status reads before giving up with `ReadyFailed`
    pub max_retries: u32,
}

impl Default for ReadyPoll {
    fn default() -> Self {
        Self {
            interval_us: 1000,
            max_retries: 10_000,
        }
    }
}

/// Configuration for [`QspifBlockDevice`](crate::blockdev::QspifBlockDevice)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QspifConfig {
    /// Bus frequency once the device is configured
    pub frequency_hz: u32,
    /// Bus frequency used while reading SFDP and negotiating
    pub discovery_frequency_hz: u32,
    /// Minimum read granularity reported by `read_size`
    pub min_read_size: u64,
    /// Minimum program granularity reported by `program_size`
    pub min_program_size: u64,
    /// Busy-bit polling policy
    pub ready_poll: ReadyPoll,
    /// Allow switching the part to 4-byte addressing
    pub four_byte_addressing: bool,
}

impl Default for QspifConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 40_000_000,
            discovery_frequency_hz: 1_000_000,
            min_read_size: 1,
            min_program_size: 1,
            ready_poll: ReadyPoll::default(),
            four_byte_addressing: true,
        }
    }
}

impl QspifConfig {
    /// Set the operating bus frequency
    pub fn with_frequency(mut self, hz: u32) -> Self {
        self.frequency_hz = hz;
        self
    }

    /// Set the bus frequency used during discovery
    pub fn with_discovery_frequency(mut self, hz: u32) -> Self {
        self.discovery_frequency_hz = hz;
        self
    }

    /// Set the minimum read size
    pub fn with_min_read_size(mut self, size: u64) -> Self {
        self.min_read_size = size;
        self
    }

    /// Set the minimum program size
    pub fn with_min_program_size(mut self, size: u64) -> Self {
        self.min_program_size = size;
        self
    }

    /// Set the ready-poll policy
    pub fn with_ready_poll(mut self, poll: ReadyPoll) -> Self {
        self.ready_poll = poll;
        self
    }

    /// Enable or disable 4-byte addressing negotiation
    pub fn with_four_byte_addressing(mut self, enabled: bool) -> Self {
        self.four_byte_addressing = enabled;
        self
    }
}

/// Configuration for [`SpifBlockDevice`](crate::blockdev::SpifBlockDevice)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpifConfig {
    /// Minimum read granularity reported by `read_size`
    pub min_read_size: u64,
    /// Minimum program granularity reported by `program_size`
    pub min_program_size: u64,
    /// Busy-bit polling policy
    pub ready_poll: ReadyPoll,
}

impl Default for SpifConfig {
    fn default() -> Self {
        Self {
            min_read_size: 1,
            min_program_size: 1,
            ready_poll: ReadyPoll::default(),
        }
    }
}

impl SpifConfig {
    /// Set the ready-poll policy
    pub fn with_ready_poll(mut self, poll: ReadyPoll) -> Self {
        self.ready_poll = poll;
        self
    }

    /// Set the minimum program size
    pub fn with_min_program_size(mut self, size: u64) -> Self {
        self.min_program_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = QspifConfig::default();
        assert_eq!(cfg.frequency_hz, 40_000_000);
        assert_eq!(cfg.ready_poll.interval_us, 1000);
        assert_eq!(cfg.ready_poll.max_retries, 10_000);
        assert!(cfg.four_byte_addressing);
    }

    #[test]
    fn test_builders() {
        let cfg = QspifConfig::default()
            .with_frequency(80_000_000)
            .with_four_byte_addressing(false)
            .with_ready_poll(ReadyPoll {
                interval_us: 0,
                max_retries: 5,
            });
        assert_eq!(cfg.frequency_hz, 80_000_000);
        assert!(!cfg.four_byte_addressing);
        assert_eq!(cfg.ready_poll.max_retries, 5);
        assert_eq!(cfg.min_read_size, 1);
    }
}
