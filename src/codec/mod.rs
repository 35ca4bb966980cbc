//! Protocol codecs.
//!
//! Every codec implements the same pure contract: given the bytes buffered so
//! far, return either one frame plus the number of bytes it consumed, or
//! [`ParseOutcome::NeedMore`]. Codecs keep no state between calls; the stream
//! pump owns the buffer and removes the consumed prefix.
//!
//! ```rust
//! use aresplot::codec::{Codec, DefaultCodec, ParseOutcome};
//! use aresplot::Frame;
//!
//! let codec = DefaultCodec;
//! match codec.parse(b"1, 2 3\r\nrest") {
//!     ParseOutcome::Frame { frame: Frame::TextLine { values, .. }, consumed } => {
//!         assert_eq!(values, vec![1.0, 2.0, 3.0]);
//!         assert_eq!(consumed, 8);
//!     }
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

mod aresplot;
mod builder;
mod justfloat;
mod text;
mod user;

pub use aresplot::{AresplotCodec, DEFAULT_GARBAGE_FLUSH_THRESHOLD};
pub use builder::{
    build_frame, build_set_sample_rate, build_set_variable, build_start_monitor, checksum,
};
pub use justfloat::{JUSTFLOAT_TAIL, JustFloatCodec};
pub use text::{DefaultCodec, FireWaterCodec};
pub use user::{PROBE_INPUT, UserCodec};

use std::fmt;
use tracing::{debug, warn};

use crate::types::{Frame, ParserSelection, ProtocolKind};
use crate::{AresplotError, Result};

/// Result of one parse attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// A frame was recognised; `consumed` bytes form its prefix of the buffer
    Frame { frame: Frame, consumed: usize },
    /// The buffer does not yet hold a complete frame
    NeedMore,
}

impl ParseOutcome {
    pub fn frame(frame: Frame, consumed: usize) -> Self {
        ParseOutcome::Frame { frame, consumed }
    }

    /// Bytes consumed by this outcome, zero for `NeedMore`.
    pub fn consumed(&self) -> usize {
        match self {
            ParseOutcome::Frame { consumed, .. } => *consumed,
            ParseOutcome::NeedMore => 0,
        }
    }
}

/// A stateless protocol parser.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Parse at most one frame from the front of `buf`.
    ///
    /// Implementations never consume more than `buf.len()` bytes and never
    /// return a frame that consumed zero bytes.
    fn parse(&self, buf: &[u8]) -> ParseOutcome;

    fn protocol(&self) -> ProtocolKind;

    /// Whether the pump's forced-break safety net applies.
    fn is_line_oriented(&self) -> bool {
        self.protocol().is_line_oriented()
    }

    /// Bytes a binary codec needs kept when the pump flushes an overflowing
    /// buffer, so a boundary marker split across reads survives.
    ///
    /// `None` leaves overflow handling to the codec itself.
    fn overflow_keep(&self) -> Option<usize> {
        None
    }
}

/// Status of the most recent parser activation.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserStatus {
    /// The requested parser is active
    Active(ProtocolKind),
    /// The requested parser failed; the default codec is active instead
    FellBack { requested: ProtocolKind, reason: String },
}

impl ParserStatus {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ParserStatus::FellBack { .. })
    }

    pub fn active_protocol(&self) -> ProtocolKind {
        match self {
            ParserStatus::Active(protocol) => *protocol,
            ParserStatus::FellBack { .. } => ProtocolKind::Default,
        }
    }
}

/// Construct the codec for a builtin protocol or compile and probe a user parser.
pub fn codec_for(selection: &ParserSelection, garbage_flush_threshold: usize) -> Result<Box<dyn Codec>> {
    selection.validate()?;

    let codec: Box<dyn Codec> = match selection.protocol {
        ProtocolKind::Default => Box::new(DefaultCodec),
        ProtocolKind::FireWater => Box::new(FireWaterCodec),
        ProtocolKind::JustFloat => Box::new(JustFloatCodec),
        ProtocolKind::Aresplot => Box::new(AresplotCodec::with_flush_threshold(garbage_flush_threshold)),
        ProtocolKind::Custom => {
            let source = selection
                .parser_source
                .as_deref()
                .ok_or_else(|| AresplotError::config("custom protocol selected without a parser source"))?;
            let codec = UserCodec::compile(source)?;
            codec.probe()?;
            Box::new(codec)
        }
    };
    Ok(codec)
}

/// Activate a parser, degrading to the default codec when it cannot be built.
///
/// Collection always proceeds: a faulty user parser is reported through the
/// returned status instead of failing the session.
pub fn activate(selection: &ParserSelection, garbage_flush_threshold: usize) -> (Box<dyn Codec>, ParserStatus) {
    match codec_for(selection, garbage_flush_threshold) {
        Ok(codec) => {
            debug!(protocol = ?selection.protocol, "Parser activated");
            (codec, ParserStatus::Active(selection.protocol))
        }
        Err(e) => {
            warn!(protocol = ?selection.protocol, "Parser activation failed, using default: {}", e);
            (
                Box::new(DefaultCodec),
                ParserStatus::FellBack { requested: selection.protocol, reason: e.to_string() },
            )
        }
    }
}

/// Index of the first line feed in `buf`.
pub(crate) fn find_lf(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_codecs_report_their_protocol() {
        for protocol in [
            ProtocolKind::Default,
            ProtocolKind::FireWater,
            ProtocolKind::JustFloat,
            ProtocolKind::Aresplot,
        ] {
            let codec = codec_for(&ParserSelection::builtin(protocol), 256).unwrap();
            assert_eq!(codec.protocol(), protocol);
        }
    }

    #[test]
    fn only_text_protocols_are_line_oriented() {
        assert!(DefaultCodec.is_line_oriented());
        assert!(FireWaterCodec.is_line_oriented());
        assert!(!JustFloatCodec.is_line_oriented());
        assert!(!AresplotCodec::default().is_line_oriented());
    }

    #[test]
    fn justfloat_keeps_a_split_tail_on_overflow() {
        assert_eq!(JustFloatCodec.overflow_keep(), Some(3));
        assert_eq!(AresplotCodec::default().overflow_keep(), None);
    }

    #[test]
    fn failing_user_parser_falls_back_to_default() {
        let selection =
            ParserSelection::new(ProtocolKind::Custom, Some("fn parse(bytes) { throw \"nope\"; }".into()));
        let (codec, status) = activate(&selection, 256);

        assert_eq!(codec.protocol(), ProtocolKind::Default);
        assert!(status.is_fallback());
        assert_eq!(status.active_protocol(), ProtocolKind::Default);
    }

    #[test]
    fn custom_without_source_falls_back() {
        let (codec, status) = activate(&ParserSelection::builtin(ProtocolKind::Custom), 256);
        assert_eq!(codec.protocol(), ProtocolKind::Default);
        match status {
            ParserStatus::FellBack { requested, reason } => {
                assert_eq!(requested, ProtocolKind::Custom);
                assert!(reason.contains("parser source"));
            }
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[test]
    fn valid_user_parser_activates() {
        let source = r#"
            fn parse(bytes) {
                let nl = bytes.find_byte(10);
                if nl < 0 { return #{ values: (), frameByteLength: 0 }; }
                #{ values: [nl], frameByteLength: nl + 1 }
            }
        "#;
        let (codec, status) = activate(&ParserSelection::new(ProtocolKind::Custom, Some(source.into())), 256);
        assert_eq!(status, ParserStatus::Active(ProtocolKind::Custom));
        assert_eq!(codec.protocol(), ProtocolKind::Custom);
    }
}
