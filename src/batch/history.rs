//! Host-side retained samples

use std::collections::VecDeque;

use crate::types::{Batch, Sample};

/// The most recent samples with values, bounded to `max_points`.
///
/// Raw-only samples are terminal output and are not retained.
#[derive(Debug)]
pub struct SampleHistory {
    samples: VecDeque<Sample>,
    max_points: usize,
}

impl SampleHistory {
    pub fn new(max_points: usize) -> Self {
        Self { samples: VecDeque::new(), max_points }
    }

    /// Append a batch, then drop the oldest prefix beyond the bound.
    pub fn extend(&mut self, batch: &Batch) {
        self.samples.extend(batch.samples.iter().filter(|s| s.has_values()).cloned());
        let excess = self.samples.len().saturating_sub(self.max_points);
        if excess > 0 {
            self.samples.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_samples_are_trimmed() {
        let mut history = SampleHistory::new(3);
        let batch = Batch::new(0, (0..5).map(|i| Sample::new(i as f64, vec![i as f64])).collect());
        history.extend(&batch);

        let stamps: Vec<f64> = history.iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(stamps, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn raw_only_samples_are_not_retained() {
        let mut history = SampleHistory::new(10);
        history.extend(&Batch::new(0, vec![Sample::raw_only(1.0, b"boot".to_vec()), Sample::new(2.0, vec![1.0])]));
        assert_eq!(history.len(), 1);
    }
}
