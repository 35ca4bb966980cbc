//! Delivery rate control for batch consumers

use serde::{Deserialize, Serialize};

/// How often a consumer wants to receive batches
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum UpdateRate {
    /// Every batch as the worker emits it
    Native,

    /// Batches arriving within `1 / hz` are merged into one delivery
    /// If the requested rate meets or exceeds the emission rate, Native is used
    Max(u32),
}

impl UpdateRate {
    /// Normalize rate against the batch emission frequency
    pub fn normalize(self, emission_hz: f64) -> Self {
        match self {
            UpdateRate::Native => UpdateRate::Native,
            UpdateRate::Max(0) => UpdateRate::Native,
            UpdateRate::Max(hz) if hz as f64 >= emission_hz => UpdateRate::Native,
            UpdateRate::Max(hz) => UpdateRate::Max(hz),
        }
    }

    /// Get coalescing interval if needed
    pub fn coalesce_interval(self, emission_hz: f64) -> Option<std::time::Duration> {
        match self.normalize(emission_hz) {
            UpdateRate::Native => None,
            UpdateRate::Max(hz) => Some(std::time::Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}
