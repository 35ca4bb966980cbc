//! Synthetic signal generator used when no serial device is attached

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

use crate::types::{Sample, SimConfig};

/// Peak noise as a fraction of the amplitude.
const NOISE_FRACTION: f64 = 0.05;

/// Produces `A·sin(2π·(1 + 0.5·i)·t + i·π/4) + noise` for every channel.
///
/// Config changes take effect on the next tick; the phase clock keeps running.
#[derive(Debug)]
pub struct SimGenerator {
    config: SimConfig,
    rng: StdRng,
    last_timestamp_ms: Option<f64>,
}

impl SimGenerator {
    pub fn new(config: SimConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Deterministic generator for tests and benches.
    pub fn with_seed(config: SimConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: SimConfig, rng: StdRng) -> Self {
        Self { config, rng, last_timestamp_ms: None }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SimConfig) {
        self.config = config;
    }

    /// Samples to emit per tick: `max(1, round(freq_hz × tick_ms / 1000))`.
    pub fn samples_per_tick(&self, tick_ms: f64) -> usize {
        ((self.config.frequency * tick_ms / 1000.0).round() as usize).max(1)
    }

    /// Emit one tick worth of samples ending at `now_ms`.
    ///
    /// Timestamps are spread evenly over the time since the previous tick, so
    /// they stay non-decreasing across ticks.
    pub fn tick(&mut self, now_ms: f64, tick_ms: f64) -> Vec<Sample> {
        let count = self.samples_per_tick(tick_ms);
        let start = match self.last_timestamp_ms {
            Some(last) => last.min(now_ms),
            None => now_ms - tick_ms,
        };
        let span = now_ms - start;

        let samples = (1..=count)
            .map(|k| {
                let timestamp_ms = if k == count { now_ms } else { start + span * k as f64 / count as f64 };
                let values = self.values_at(timestamp_ms / 1000.0);
                Sample::new(timestamp_ms, values)
            })
            .collect();

        self.last_timestamp_ms = Some(now_ms);
        samples
    }

    fn values_at(&mut self, t: f64) -> Vec<f64> {
        let amplitude = self.config.amplitude;
        (0..self.config.num_channels)
            .map(|i| {
                let i = i as f64;
                let signal = amplitude * (2.0 * PI * (1.0 + 0.5 * i) * t + i * PI / 4.0).sin();
                let noise = amplitude * NOISE_FRACTION * self.rng.random_range(-1.0..=1.0);
                signal + noise
            })
            .collect()
    }
}
