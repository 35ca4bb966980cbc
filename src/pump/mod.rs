//! Worker-side byte pump and simulation source.
//!
//! The [`StreamPump`] owns the inbound byte buffer and drives the active codec;
//! [`Decoded`] turns each frame into either a sample for the batcher or a
//! control-plane event for the host.

mod buffer;
mod simulation;
mod stream_pump;

pub use buffer::ByteBuffer;
pub use simulation::SimGenerator;
pub use stream_pump::{PumpStats, StreamPump};

use tokio::time::Instant;

use crate::types::{AckStatus, Frame, Sample};

/// What a single frame means to the rest of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Sample(Sample),
    Ack { cmd_id: u8, status: AckStatus },
    McuError { code: u8, message: Vec<u8> },
    /// Nothing to deliver (a resync frame with no values)
    Nothing,
}

impl Decoded {
    /// Classify `frame`, stamping samples with `timestamp_ms`.
    pub fn from_frame(frame: Frame, timestamp_ms: f64) -> Self {
        match frame {
            Frame::TextLine { values, raw } | Frame::Custom { values, raw } => {
                Decoded::Sample(Sample::new(timestamp_ms, values).with_raw(raw))
            }
            Frame::JustFloat { values } if values.is_empty() => Decoded::Nothing,
            Frame::JustFloat { values } => {
                Decoded::Sample(Sample::new(timestamp_ms, values.into_iter().map(f64::from).collect()))
            }
            Frame::AresMonitor { mcu_timestamp_ms, values } => {
                let mut sample = Sample::new(timestamp_ms, values.into_iter().map(f64::from).collect());
                sample.mcu_timestamp_ms = Some(mcu_timestamp_ms);
                Decoded::Sample(sample)
            }
            Frame::AresAck { cmd_id, status } => Decoded::Ack { cmd_id, status },
            Frame::AresError { code, message } => Decoded::McuError { code, message },
            Frame::Unidentified { raw, .. } => Decoded::Sample(Sample::raw_only(timestamp_ms, raw)),
        }
    }
}

/// Millisecond clock starting at session start.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    started: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self { started: Instant::now() }
    }

    pub fn now_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}
