//! Parsed frame types produced by the codecs

use std::fmt;

use super::AckStatus;

/// A single frame recognised (or rejected) by a codec.
///
/// Frames are transient: the stream pump turns them into samples or control
/// events in the same parse turn that produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// One text line; `values` may be empty when no token parsed as a number
    TextLine { values: Vec<f64>, raw: Vec<u8> },
    /// JustFloat frame; empty after a misaligned-tail resync
    JustFloat { values: Vec<f32> },
    /// Aresplot `MONITOR_DATA`
    AresMonitor { mcu_timestamp_ms: u32, values: Vec<f32> },
    /// Aresplot `ACK`
    AresAck { cmd_id: u8, status: AckStatus },
    /// Aresplot `ERROR_REPORT`
    AresError { code: u8, message: Vec<u8> },
    /// Frame produced by a user-supplied parser
    Custom { values: Vec<f64>, raw: Vec<u8> },
    /// Bytes the codec could not interpret, kept for display
    Unidentified { raw: Vec<u8>, reason: UnidentifiedReason },
}

impl Frame {
    pub fn unidentified(raw: impl Into<Vec<u8>>, reason: UnidentifiedReason) -> Self {
        Frame::Unidentified { raw: raw.into(), reason }
    }

    pub fn is_unidentified(&self) -> bool {
        matches!(self, Frame::Unidentified { .. })
    }
}

/// Why a run of bytes was surfaced as [`Frame::Unidentified`].
#[derive(Debug, Clone, PartialEq)]
pub enum UnidentifiedReason {
    /// Bytes preceding the next start-of-packet marker
    BeforeSop,
    /// Header declared a payload longer than the accepted maximum
    OversizedLength(u16),
    BadChecksum { expected: u8, found: u8 },
    BadEop(u8),
    UnknownCommand(u8),
    /// Known command whose payload has the wrong shape
    InvalidPayload { cmd: u8, len: usize },
    /// No frame boundary (SOP or tail marker) within the flush threshold
    GarbageFlush,
    /// Pump safety net: no delimiter within the break length
    ForcedBreak,
    /// User parser threw or returned an unusable result
    UserParserFault(String),
}

impl fmt::Display for UnidentifiedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnidentifiedReason::BeforeSop => f.write_str("bytes before SOP"),
            UnidentifiedReason::OversizedLength(len) => write!(f, "payload length {} too large", len),
            UnidentifiedReason::BadChecksum { expected, found } => {
                write!(f, "checksum mismatch (expected 0x{:02X}, found 0x{:02X})", expected, found)
            }
            UnidentifiedReason::BadEop(byte) => write!(f, "bad EOP 0x{:02X}", byte),
            UnidentifiedReason::UnknownCommand(cmd) => write!(f, "unknown CMD 0x{:02X}", cmd),
            UnidentifiedReason::InvalidPayload { cmd, len } => {
                write!(f, "invalid payload length {} for CMD 0x{:02X}", len, cmd)
            }
            UnidentifiedReason::GarbageFlush => f.write_str("no frame boundary found, buffer flushed"),
            UnidentifiedReason::ForcedBreak => f.write_str("forced break"),
            UnidentifiedReason::UserParserFault(msg) => write!(f, "user parser fault: {}", msg),
        }
    }
}
