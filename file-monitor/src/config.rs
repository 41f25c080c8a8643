//! Configuration for the file monitor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lower bound on the missing-path poll interval, to keep the periodic
/// existence checks bounded.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tunables for a [`FileMonitor`](crate::FileMonitor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// How often the missing-path tracker re-checks its targets. This is a
    /// policy knob, not a correctness requirement; the default is one
    /// second.
    pub poll_interval: Duration,

    /// Capacity of the raw-event channel between the kernel backend and
    /// the coordinator.
    pub channel_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            channel_capacity: 1000,
        }
    }
}

impl MonitorConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the missing-path poll interval, clamped to [`MIN_POLL_INTERVAL`].
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Set the raw-event channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}
