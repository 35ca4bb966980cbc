//! Wire fixtures shared by unit tests and benchmarks
//!
//! Generators for synthetic byte streams in each supported protocol, so tests
//! and benches exercise the codecs with the same deterministic input.

#![cfg(any(test, feature = "benchmark"))]

use crate::codec::build_frame;
use crate::codec::JUSTFLOAT_TAIL;
use crate::types::{AckStatus, CommandId};

/// Deterministic value for `frame`/`channel` in the generated streams.
pub fn fixture_value(frame: usize, channel: usize) -> f32 {
    (frame as f32 * 0.25) + channel as f32
}

/// `frames` CRLF-terminated comma separated lines with `channels` values each.
pub fn text_stream(frames: usize, channels: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for frame in 0..frames {
        let line: Vec<String> = (0..channels).map(|c| format!("{}", fixture_value(frame, c))).collect();
        out.extend_from_slice(line.join(",").as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// FireWater lines: `prefix:v1,v2,...\n`.
pub fn firewater_stream(frames: usize, channels: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for frame in 0..frames {
        let line: Vec<String> = (0..channels).map(|c| format!("{}", fixture_value(frame, c))).collect();
        out.extend_from_slice(format!("data:{}\n", line.join(",")).as_bytes());
    }
    out
}

/// JustFloat frames: little-endian f32 values followed by the tail marker.
pub fn justfloat_stream(frames: usize, channels: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(frames * (channels * 4 + JUSTFLOAT_TAIL.len()));
    for frame in 0..frames {
        for channel in 0..channels {
            out.extend_from_slice(&fixture_value(frame, channel).to_le_bytes());
        }
        out.extend_from_slice(&JUSTFLOAT_TAIL);
    }
    out
}

/// One encoded `MONITOR_DATA` frame.
pub fn monitor_frame(mcu_timestamp_ms: u32, values: &[f32]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + values.len() * 4);
    payload.extend_from_slice(&mcu_timestamp_ms.to_le_bytes());
    for value in values {
        payload.extend_from_slice(&value.to_le_bytes());
    }
    build_frame(CommandId::MonitorData.as_u8(), &payload).expect("monitor payload fits")
}

/// One encoded `ACK` frame.
pub fn ack_frame(cmd_id: u8, status: AckStatus) -> Vec<u8> {
    build_frame(CommandId::Ack.as_u8(), &[cmd_id, status.as_u8()]).expect("ack payload fits")
}

/// One encoded `ERROR_REPORT` frame.
pub fn error_report_frame(code: u8, message: &[u8]) -> Vec<u8> {
    let mut payload = vec![code];
    payload.extend_from_slice(message);
    build_frame(CommandId::ErrorReport.as_u8(), &payload).expect("error payload fits")
}

/// `frames` monitor frames 10 ms apart with `channels` values each.
pub fn aresplot_stream(frames: usize, channels: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for frame in 0..frames {
        let values: Vec<f32> = (0..channels).map(|c| fixture_value(frame, c)).collect();
        out.extend(monitor_frame(frame as u32 * 10, &values));
    }
    out
}

/// Interleave `noise` bytes in front of every `every`-th byte of `stream`.
pub fn with_noise(stream: &[u8], every: usize, noise: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(stream.len() + stream.len() / every.max(1) * noise.len());
    for (i, byte) in stream.iter().enumerate() {
        if every > 0 && i % every == 0 {
            out.extend_from_slice(noise);
        }
        out.push(*byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_have_expected_sizes() {
        assert_eq!(justfloat_stream(3, 2).len(), 3 * (8 + 4));
        assert_eq!(aresplot_stream(2, 3).len(), 2 * (4 + 4 + 12 + 2));
        assert_eq!(text_stream(2, 2), b"0,1\r\n0.25,1.25\r\n");
        assert_eq!(firewater_stream(1, 2), b"data:0,1\n");
    }

    #[test]
    fn noise_is_inserted() {
        assert_eq!(with_noise(&[1, 2, 3, 4], 2, &[0xEE]), vec![0xEE, 1, 2, 0xEE, 3, 4]);
    }
}
