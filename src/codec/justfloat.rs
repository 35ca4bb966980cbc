//! JustFloat binary codec

use super::{Codec, ParseOutcome};
use crate::types::{Frame, ProtocolKind};

/// Frame terminator, the bit pattern of `+inf` as float32 LE.
pub const JUSTFLOAT_TAIL: [u8; 4] = [0x00, 0x00, 0x80, 0x7F];

/// `N x float32 LE` followed by [`JUSTFLOAT_TAIL`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JustFloatCodec;

impl Codec for JustFloatCodec {
    fn parse(&self, buf: &[u8]) -> ParseOutcome {
        let Some(tail) = buf.windows(JUSTFLOAT_TAIL.len()).position(|w| w == JUSTFLOAT_TAIL) else {
            return ParseOutcome::NeedMore;
        };
        let consumed = tail + JUSTFLOAT_TAIL.len();

        // A misaligned tail means we joined mid-frame; drop the segment and resync
        if tail % 4 != 0 {
            return ParseOutcome::frame(Frame::JustFloat { values: Vec::new() }, consumed);
        }

        let values = buf[..tail]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        ParseOutcome::frame(Frame::JustFloat { values }, consumed)
    }

    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::JustFloat
    }

    fn overflow_keep(&self) -> Option<usize> {
        Some(JUSTFLOAT_TAIL.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(values: &[f32]) -> Vec<u8> {
        let mut out: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        out.extend_from_slice(&JUSTFLOAT_TAIL);
        out
    }

    #[test]
    fn single_frame_decodes() {
        let buf = [0x00, 0x00, 0x80, 0x3F, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x80, 0x7F];
        assert_eq!(
            JustFloatCodec.parse(&buf),
            ParseOutcome::frame(Frame::JustFloat { values: vec![1.0, 2.0] }, 12)
        );
    }

    #[test]
    fn waits_for_tail() {
        let buf = frame_bytes(&[1.5, 2.5]);
        assert_eq!(JustFloatCodec.parse(&buf[..buf.len() - 1]), ParseOutcome::NeedMore);
    }

    #[test]
    fn misaligned_tail_resyncs_with_empty_frame() {
        let mut buf = vec![0x11, 0x22];
        buf.extend(frame_bytes(&[3.0]));

        match JustFloatCodec.parse(&buf) {
            ParseOutcome::Frame { frame: Frame::JustFloat { values }, consumed } => {
                assert!(values.is_empty());
                assert_eq!(consumed, buf.len());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn consecutive_frames_split_at_first_tail() {
        let mut buf = frame_bytes(&[1.0]);
        buf.extend(frame_bytes(&[2.0, 3.0]));

        let ParseOutcome::Frame { frame, consumed } = JustFloatCodec.parse(&buf) else {
            panic!("expected frame");
        };
        assert_eq!(frame, Frame::JustFloat { values: vec![1.0] });
        assert_eq!(consumed, 8);

        let ParseOutcome::Frame { frame, .. } = JustFloatCodec.parse(&buf[consumed..]) else {
            panic!("expected frame");
        };
        assert_eq!(frame, Frame::JustFloat { values: vec![2.0, 3.0] });
    }

    #[test]
    fn bare_tail_is_an_empty_frame() {
        assert_eq!(
            JustFloatCodec.parse(&JUSTFLOAT_TAIL),
            ParseOutcome::frame(Frame::JustFloat { values: vec![] }, 4)
        );
    }
}
