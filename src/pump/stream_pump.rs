//! Drives the active codec over the rolling byte buffer

use tracing::{debug, trace, warn};

use super::buffer::ByteBuffer;
use crate::codec::{Codec, DEFAULT_GARBAGE_FLUSH_THRESHOLD, ParseOutcome, find_lf};
use crate::types::{Frame, UnidentifiedReason};

/// Counters for one pump instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub bytes_in: u64,
    pub bytes_consumed: u64,
    pub frames: u64,
    pub unidentified: u64,
    pub forced_breaks: u64,
    pub overflow_flushes: u64,
}

/// Owns the inbound [`ByteBuffer`] and the active codec.
///
/// Every call to [`ingest`](Self::ingest) appends one chunk and parses until
/// the codec needs more data or the buffer is empty.
#[derive(Debug)]
pub struct StreamPump {
    buffer: ByteBuffer,
    codec: Box<dyn Codec>,
    forced_break_len: usize,
    garbage_flush_threshold: usize,
    stats: PumpStats,
}

impl StreamPump {
    pub fn new(codec: Box<dyn Codec>, forced_break_len: usize, capacity: usize) -> Self {
        Self {
            buffer: ByteBuffer::with_capacity(capacity),
            codec,
            forced_break_len,
            garbage_flush_threshold: DEFAULT_GARBAGE_FLUSH_THRESHOLD,
            stats: PumpStats::default(),
        }
    }

    /// Buffer length past which a binary codec with no frame boundary in
    /// sight has its stale bytes flushed.
    pub fn with_garbage_flush_threshold(mut self, threshold: usize) -> Self {
        self.garbage_flush_threshold = threshold;
        self
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    /// Swap the active codec. Buffered bytes belong to the old framing and are dropped.
    pub fn replace_codec(&mut self, codec: Box<dyn Codec>) -> Box<dyn Codec> {
        debug!(from = ?self.codec.protocol(), to = ?codec.protocol(), dropped = self.buffer.len(), "Codec replaced");
        self.buffer.clear();
        std::mem::replace(&mut self.codec, codec)
    }

    /// Append `chunk` and parse every complete frame into `out`.
    ///
    /// Returns the number of frames appended.
    pub fn ingest(&mut self, chunk: &[u8], out: &mut Vec<Frame>) -> usize {
        self.buffer.extend(chunk);
        self.stats.bytes_in += chunk.len() as u64;
        self.drain(out)
    }

    /// Parse buffered bytes until the codec needs more or the buffer is empty.
    pub fn drain(&mut self, out: &mut Vec<Frame>) -> usize {
        let before = out.len();

        while !self.buffer.is_empty() {
            let len = self.buffer.len();
            match self.codec.parse(self.buffer.as_slice()) {
                ParseOutcome::Frame { frame, consumed } => {
                    let consumed = if consumed == 0 || consumed > len {
                        warn!(consumed, len, protocol = ?self.codec.protocol(), "Codec broke consumption contract");
                        len
                    } else {
                        consumed
                    };
                    self.buffer.advance(consumed);
                    self.record(&frame, consumed);
                    out.push(frame);
                }
                ParseOutcome::NeedMore => match self.overflow() {
                    Some(frame) => out.push(frame),
                    None => break,
                },
            }
        }

        out.len() - before
    }

    /// Safety net keeping the buffer bounded while the codec needs more.
    fn overflow(&mut self) -> Option<Frame> {
        if self.codec.is_line_oriented() {
            self.forced_break()
        } else {
            self.overflow_flush()
        }
    }

    /// A long run with no line feed becomes an unidentified segment.
    fn forced_break(&mut self) -> Option<Frame> {
        if self.buffer.len() <= self.forced_break_len {
            return None;
        }
        let head = &self.buffer.as_slice()[..self.forced_break_len];
        if find_lf(head).is_some() {
            return None;
        }

        let raw = self.buffer.split_prefix(self.forced_break_len);
        self.stats.forced_breaks += 1;
        trace!(len = raw.len(), "Forced break");

        let frame = Frame::unidentified(raw.to_vec(), UnidentifiedReason::ForcedBreak);
        self.record(&frame, raw.len());
        Some(frame)
    }

    /// Binary codecs that opt in lose everything but a possible split marker
    /// once the buffer passes the flush threshold.
    fn overflow_flush(&mut self) -> Option<Frame> {
        let keep = self.codec.overflow_keep()?;
        let len = self.buffer.len();
        if len <= self.garbage_flush_threshold.max(keep) {
            return None;
        }

        let raw = self.buffer.split_prefix(len - keep);
        self.stats.overflow_flushes += 1;
        debug!(len = raw.len(), protocol = ?self.codec.protocol(), "No frame boundary, buffer flushed");

        let frame = Frame::unidentified(raw.to_vec(), UnidentifiedReason::GarbageFlush);
        self.record(&frame, raw.len());
        Some(frame)
    }

    fn record(&mut self, frame: &Frame, consumed: usize) {
        self.stats.bytes_consumed += consumed as u64;
        self.stats.frames += 1;
        if frame.is_unidentified() {
            self.stats.unidentified += 1;
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn stats(&self) -> PumpStats {
        self.stats
    }
}
