//! Batching and rate control.
//!
//! The [`Batcher`] runs in the worker and cuts samples into ordered batches.
//! [`RateMeter`], [`SampleHistory`], and [`BufferEstimate`] run on the host
//! and feed the [`Metrics`] published by the coordinator.

mod batcher;
mod history;
mod rate;

pub use batcher::Batcher;
pub use history::SampleHistory;
pub use rate::{BufferEstimate, RateMeter};

use serde::{Deserialize, Serialize};

/// Derived figures published after every batch and on the rate window tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct Metrics {
    /// Points per second
    pub data_rate: f64,
    /// Samples currently retained for export
    pub retained_points: usize,
    /// Samples received this session
    pub total_points: u64,
    /// Only present while collecting with a positive rate
    pub buffer: Option<BufferEstimate>,
}
