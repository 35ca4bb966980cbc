//! Windowed data-rate measurement and buffer-fill estimate

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Counts points over a fixed window.
///
/// The rate is recomputed whenever a window closes and drops to zero once no
/// input has arrived for the decay period.
#[derive(Debug)]
pub struct RateMeter {
    window: Duration,
    decay: Duration,
    window_start: Instant,
    window_points: u64,
    last_input: Option<Instant>,
    rate: f64,
}

impl RateMeter {
    pub fn new(window: Duration, decay: Duration) -> Self {
        Self { window, decay, window_start: Instant::now(), window_points: 0, last_input: None, rate: 0.0 }
    }

    pub fn record(&mut self, points: usize, now: Instant) {
        if points == 0 {
            return;
        }
        self.window_points += points as u64;
        self.last_input = Some(now);
        self.roll(now);
    }

    /// Points per second as of `now`.
    pub fn rate(&mut self, now: Instant) -> f64 {
        self.roll(now);
        match self.last_input {
            Some(last) if now.duration_since(last) < self.decay => self.rate,
            _ => {
                self.rate = 0.0;
                0.0
            }
        }
    }

    fn roll(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.window_start);
        if elapsed >= self.window {
            self.rate = self.window_points as f64 / elapsed.as_secs_f64();
            self.window_points = 0;
            self.window_start = now;
        }
    }

    pub fn reset(&mut self, now: Instant) {
        self.window_start = now;
        self.window_points = 0;
        self.last_input = None;
        self.rate = 0.0;
    }
}

/// How long the retained-points buffer lasts at the current rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct BufferEstimate {
    /// Seconds to fill the whole buffer from empty
    pub total_sec: f64,
    /// Seconds until the buffer is full from its current level
    pub remaining_sec: f64,
}

impl BufferEstimate {
    /// `None` unless the rate is positive.
    pub fn compute(rate: f64, max_points: usize, current: usize) -> Option<Self> {
        if rate <= 0.0 || !rate.is_finite() {
            return None;
        }
        let max = max_points as f64;
        Some(Self { total_sec: max / rate, remaining_sec: ((max - current as f64) / rate).max(0.0) })
    }
}
