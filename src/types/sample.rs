//! Samples and batches delivered to consumers

use serde::{Deserialize, Serialize};

/// One parsed frame worth of channel values plus a host timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct Sample {
    /// Host time in milliseconds since the session started
    pub timestamp_ms: f64,
    pub values: Vec<f64>,
    /// Raw bytes of the frame, kept for terminal display
    pub raw: Option<Vec<u8>>,
    /// MCU tick carried by Aresplot monitor data
    pub mcu_timestamp_ms: Option<u32>,
}

impl Sample {
    pub fn new(timestamp_ms: f64, values: Vec<f64>) -> Self {
        Self { timestamp_ms, values, raw: None, mcu_timestamp_ms: None }
    }

    pub fn with_raw(mut self, raw: Vec<u8>) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Raw-only sample carrying bytes no codec could interpret.
    pub fn raw_only(timestamp_ms: f64, raw: Vec<u8>) -> Self {
        Self { timestamp_ms, values: Vec::new(), raw: Some(raw), mcu_timestamp_ms: None }
    }

    /// True when the sample carries plottable values.
    pub fn has_values(&self) -> bool {
        !self.values.is_empty()
    }
}

/// Ordered run of samples shipped from the worker to the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct Batch {
    /// Emission counter within a session, starting at 0
    pub sequence: u64,
    pub samples: Vec<Sample>,
}

impl Batch {
    pub fn new(sequence: u64, samples: Vec<Sample>) -> Self {
        Self { sequence, samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples carrying values (the data-rate unit).
    pub fn point_count(&self) -> usize {
        self.samples.iter().filter(|s| s.has_values()).count()
    }

    /// Append a later batch, keeping the earlier sequence number.
    pub fn merge(&mut self, later: Batch) {
        self.samples.extend(later.samples);
    }
}
