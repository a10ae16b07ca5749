//! Scheduler configuration types
//!
//! The scheduler needs very little configuration: the fallback cycle time for
//! messages whose layout declares none, and whether the declared `[min, max]`
//! of each signal is enforced on top of its bit-width range.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cycle time used when neither the layout nor the configuration names one
pub const DEFAULT_CYCLE_TIME_MS: u64 = 100;

/// Configuration for the message scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cycle time for messages that declare none (default: 100ms)
    #[serde(default = "default_cycle_time")]
    pub default_cycle_time_ms: u64,

    /// Reject values outside a signal's declared `[min, max]`
    #[serde(default = "default_true")]
    pub enforce_declared_ranges: bool,
}

fn default_true() -> bool {
    true
}

fn default_cycle_time() -> u64 {
    DEFAULT_CYCLE_TIME_MS
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_cycle_time_ms: DEFAULT_CYCLE_TIME_MS,
            enforce_declared_ranges: true,
        }
    }
}

impl SchedulerConfig {
    /// Create a new scheduler configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the fallback cycle time
    pub fn with_default_cycle_time_ms(mut self, cycle_time_ms: u64) -> Self {
        self.default_cycle_time_ms = cycle_time_ms;
        self
    }

    /// Builder method: enable or disable declared range enforcement
    pub fn with_declared_ranges(mut self, enabled: bool) -> Self {
        self.enforce_declared_ranges = enabled;
        self
    }

    /// Resolve the transmit interval for a layout's declared cycle time.
    ///
    /// A missing or zero cycle time falls back to the configured default, and
    /// a zero default falls back to [`DEFAULT_CYCLE_TIME_MS`].
    pub fn interval_for(&self, declared_ms: Option<u64>) -> Duration {
        let ms = declared_ms
            .filter(|ms| *ms > 0)
            .or(Some(self.default_cycle_time_ms).filter(|ms| *ms > 0))
            .unwrap_or(DEFAULT_CYCLE_TIME_MS);
        Duration::from_millis(ms)
    }
}
