//! Accumulates samples into ordered batches

use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use crate::types::{Batch, Sample};

/// Collects samples and cuts them into [`Batch`]es on a time budget or size cap.
///
/// Timestamps are clamped so they never decrease within a session.
#[derive(Debug)]
pub struct Batcher {
    pending: Vec<Sample>,
    sequence: u64,
    max_samples: usize,
    flush_interval: Duration,
    last_flush: Instant,
    last_timestamp_ms: f64,
}

impl Batcher {
    pub fn new(flush_interval: Duration, max_samples: usize) -> Self {
        Self {
            pending: Vec::new(),
            sequence: 0,
            max_samples: max_samples.max(1),
            flush_interval,
            last_flush: Instant::now(),
            last_timestamp_ms: f64::NEG_INFINITY,
        }
    }

    /// Queue one sample; returns a full batch once the size cap is reached.
    pub fn push(&mut self, mut sample: Sample) -> Option<Batch> {
        if sample.timestamp_ms < self.last_timestamp_ms {
            sample.timestamp_ms = self.last_timestamp_ms;
        }
        self.last_timestamp_ms = sample.timestamp_ms;
        self.pending.push(sample);

        if self.pending.len() >= self.max_samples { self.flush() } else { None }
    }

    /// Cut a batch if the flush interval has elapsed since the last one.
    pub fn flush_if_due(&mut self, now: Instant) -> Option<Batch> {
        if now.duration_since(self.last_flush) >= self.flush_interval { self.flush() } else { None }
    }

    /// Cut a batch from everything pending, if anything is.
    pub fn flush(&mut self) -> Option<Batch> {
        if self.pending.is_empty() {
            return None;
        }
        Some(self.take())
    }

    /// Final drain at session end; may be empty.
    pub fn drain(&mut self) -> Batch {
        self.take()
    }

    fn take(&mut self) -> Batch {
        let samples = std::mem::take(&mut self.pending);
        let batch = Batch::new(self.sequence, samples);
        trace!(sequence = batch.sequence, len = batch.len(), "Batch cut");
        self.sequence += 1;
        self.last_flush = Instant::now();
        batch
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
