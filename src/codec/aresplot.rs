//! Aresplot framed binary codec (MCU -> PC direction)

use super::builder::checksum;
use super::{Codec, ParseOutcome};
use crate::types::{
    AckStatus, CommandId, EOP, Frame, HEADER_LEN, MAX_PAYLOAD_LEN, ProtocolKind, SOP, TRAILER_LEN,
    UnidentifiedReason,
};

/// Buffer size beyond which SOP-free bytes are flushed as garbage.
pub const DEFAULT_GARBAGE_FLUSH_THRESHOLD: usize = 256;

/// Parser for `SOP | CMD | LEN | PAYLOAD | CHECKSUM | EOP` frames.
///
/// Every framing fault is surfaced as [`Frame::Unidentified`] carrying the
/// bytes it skipped, so the raw stream stays visible and the parser always
/// makes forward progress.
#[derive(Debug, Clone, Copy)]
pub struct AresplotCodec {
    flush_threshold: usize,
}

impl Default for AresplotCodec {
    fn default() -> Self {
        Self { flush_threshold: DEFAULT_GARBAGE_FLUSH_THRESHOLD }
    }
}

impl AresplotCodec {
    pub fn with_flush_threshold(flush_threshold: usize) -> Self {
        Self { flush_threshold }
    }

    fn dispatch(cmd: u8, payload: &[u8]) -> Option<Frame> {
        let frame = match CommandId::from_u8(cmd) {
            Some(CommandId::MonitorData) => {
                if payload.len() < 4 || (payload.len() - 4) % 4 != 0 {
                    return None;
                }
                let mcu_timestamp_ms = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
                let values = payload[4..]
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                Frame::AresMonitor { mcu_timestamp_ms, values }
            }
            Some(CommandId::Ack) => {
                if payload.len() < 2 {
                    return None;
                }
                Frame::AresAck { cmd_id: payload[0], status: AckStatus::from_u8(payload[1]) }
            }
            Some(CommandId::ErrorReport) => {
                let (&code, message) = payload.split_first()?;
                Frame::AresError { code, message: message.to_vec() }
            }
            // Requests only travel PC -> MCU
            _ => return Some(Frame::unidentified(Vec::new(), UnidentifiedReason::UnknownCommand(cmd))),
        };
        Some(frame)
    }
}

impl Codec for AresplotCodec {
    fn parse(&self, buf: &[u8]) -> ParseOutcome {
        let Some(sop) = buf.iter().position(|&b| b == SOP) else {
            if buf.len() > self.flush_threshold {
                return ParseOutcome::frame(
                    Frame::unidentified(buf, UnidentifiedReason::GarbageFlush),
                    buf.len(),
                );
            }
            return ParseOutcome::NeedMore;
        };

        if sop > 0 {
            return ParseOutcome::frame(Frame::unidentified(&buf[..sop], UnidentifiedReason::BeforeSop), sop);
        }

        if buf.len() < HEADER_LEN {
            return ParseOutcome::NeedMore;
        }

        let cmd = buf[1];
        let len = u16::from_le_bytes([buf[2], buf[3]]);
        if len as usize > MAX_PAYLOAD_LEN {
            return ParseOutcome::frame(
                Frame::unidentified(&buf[..HEADER_LEN], UnidentifiedReason::OversizedLength(len)),
                HEADER_LEN,
            );
        }

        let total = HEADER_LEN + len as usize + TRAILER_LEN;
        if buf.len() < total {
            return ParseOutcome::NeedMore;
        }

        let frame_bytes = &buf[..total];
        let payload = &frame_bytes[HEADER_LEN..HEADER_LEN + len as usize];
        let found = frame_bytes[total - 2];
        let eop = frame_bytes[total - 1];

        let expected = checksum(cmd, payload);
        if found != expected {
            return ParseOutcome::frame(
                Frame::unidentified(frame_bytes, UnidentifiedReason::BadChecksum { expected, found }),
                total,
            );
        }
        if eop != EOP {
            return ParseOutcome::frame(Frame::unidentified(frame_bytes, UnidentifiedReason::BadEop(eop)), total);
        }

        let frame = match Self::dispatch(cmd, payload) {
            Some(Frame::Unidentified { reason, .. }) => Frame::unidentified(frame_bytes, reason),
            Some(frame) => frame,
            None => Frame::unidentified(frame_bytes, UnidentifiedReason::InvalidPayload { cmd, len: payload.len() }),
        };
        ParseOutcome::frame(frame, total)
    }

    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Aresplot
    }
}

#[cfg(test)]
#[allow(clippy::approx_constant)]
mod tests {
    use super::*;
    use crate::codec::build_frame;

    fn monitor_payload(mcu_ms: u32, values: &[f32]) -> Vec<u8> {
        let mut payload = mcu_ms.to_le_bytes().to_vec();
        for v in values {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        payload
    }

    /// Parse until the codec asks for more, returning frames and leftover length.
    fn drain(codec: &AresplotCodec, mut buf: &[u8]) -> (Vec<Frame>, usize) {
        let mut frames = Vec::new();
        while !buf.is_empty() {
            match codec.parse(buf) {
                ParseOutcome::Frame { frame, consumed } => {
                    assert!(consumed > 0 && consumed <= buf.len());
                    frames.push(frame);
                    buf = &buf[consumed..];
                }
                ParseOutcome::NeedMore => break,
            }
        }
        (frames, buf.len())
    }

    #[test]
    fn monitor_data_decodes() {
        let frame = build_frame(0x81, &monitor_payload(1000, &[3.14, -1.0])).unwrap();
        let ParseOutcome::Frame { frame: parsed, consumed } = AresplotCodec::default().parse(&frame) else {
            panic!("expected frame");
        };
        assert_eq!(consumed, frame.len());
        match parsed {
            Frame::AresMonitor { mcu_timestamp_ms, values } => {
                assert_eq!(mcu_timestamp_ms, 1000);
                assert_eq!(values.len(), 2);
                assert!((values[0] - 3.14).abs() < 1e-6);
                assert!((values[1] + 1.0).abs() < 1e-6);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn checksum_failure_consumes_whole_frame() {
        let mut frame = build_frame(0x81, &monitor_payload(1000, &[3.14, -1.0])).unwrap();
        let chk = frame.len() - 2;
        frame[chk] ^= 0xFF;

        let (frames, left) = drain(&AresplotCodec::default(), &frame);
        assert_eq!(left, 0);
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Unidentified { raw, reason: UnidentifiedReason::BadChecksum { .. } } => {
                assert_eq!(raw.len(), frame.len());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bad_eop_consumes_whole_frame() {
        let mut frame = build_frame(0x82, &[0x01, 0x00]).unwrap();
        let last = frame.len() - 1;
        frame[last] = 0x00;

        let (frames, left) = drain(&AresplotCodec::default(), &frame);
        assert_eq!(left, 0);
        assert!(matches!(frames[0], Frame::Unidentified { reason: UnidentifiedReason::BadEop(0x00), .. }));
    }

    #[test]
    fn garbage_without_sop_is_flushed() {
        let garbage: Vec<u8> = (0..300).map(|i| (i % 0xA0) as u8).collect();
        let (frames, left) = drain(&AresplotCodec::default(), &garbage);

        assert_eq!(left, 0);
        assert_eq!(frames, vec![Frame::unidentified(garbage.clone(), UnidentifiedReason::GarbageFlush)]);
    }

    #[test]
    fn short_garbage_waits_for_sop() {
        assert_eq!(AresplotCodec::default().parse(&[0x01; 100]), ParseOutcome::NeedMore);
        assert_eq!(AresplotCodec::with_flush_threshold(50).parse(&[0x01; 100]).consumed(), 100);
    }

    #[test]
    fn bytes_before_sop_are_surfaced() {
        let mut buf = b"boot ok\r\n".to_vec();
        buf.extend(build_frame(0x82, &[0x01, 0x00]).unwrap());

        let (frames, left) = drain(&AresplotCodec::default(), &buf);
        assert_eq!(left, 0);
        assert_eq!(frames[0], Frame::unidentified(&b"boot ok\r\n"[..], UnidentifiedReason::BeforeSop));
        assert_eq!(frames[1], Frame::AresAck { cmd_id: 0x01, status: AckStatus::Ok });
    }

    #[test]
    fn oversized_length_skips_header_only() {
        let mut buf = vec![SOP, 0x81, 0x01, 0x08]; // LEN = 2049
        buf.extend(build_frame(0x82, &[0x02, 0x04]).unwrap());

        let (frames, left) = drain(&AresplotCodec::default(), &buf);
        assert_eq!(left, 0);
        assert_eq!(
            frames[0],
            Frame::unidentified(vec![SOP, 0x81, 0x01, 0x08], UnidentifiedReason::OversizedLength(2049))
        );
        assert_eq!(frames[1], Frame::AresAck { cmd_id: 0x02, status: AckStatus::ErrAddrInvalid });
    }

    #[test]
    fn unknown_and_request_commands_are_unidentified() {
        for cmd in [0x42, 0x01] {
            let frame = build_frame(cmd, &[1, 2, 3]).unwrap();
            let (frames, _) = drain(&AresplotCodec::default(), &frame);
            assert_eq!(frames, vec![Frame::unidentified(frame.clone(), UnidentifiedReason::UnknownCommand(cmd))]);
        }
        assert_eq!(UnidentifiedReason::UnknownCommand(0x42).to_string(), "unknown CMD 0x42");
    }

    #[test]
    fn malformed_payloads_are_unidentified() {
        for (cmd, payload) in [(0x81u8, vec![0u8; 6]), (0x81, vec![0u8; 3]), (0x82, vec![0x01]), (0x8F, vec![])] {
            let frame = build_frame(cmd, &payload).unwrap();
            let (frames, _) = drain(&AresplotCodec::default(), &frame);
            assert!(
                matches!(frames[0], Frame::Unidentified { reason: UnidentifiedReason::InvalidPayload { .. }, .. }),
                "cmd 0x{:02X} len {}",
                cmd,
                payload.len()
            );
        }
    }

    #[test]
    fn error_report_keeps_message() {
        let frame = build_frame(0x8F, b"\x03stack low").unwrap();
        let (frames, _) = drain(&AresplotCodec::default(), &frame);
        assert_eq!(frames, vec![Frame::AresError { code: 3, message: b"stack low".to_vec() }]);
    }

    #[test]
    fn partial_frame_needs_more() {
        let frame = build_frame(0x81, &monitor_payload(5, &[1.0])).unwrap();
        for cut in 1..frame.len() {
            assert_eq!(AresplotCodec::default().parse(&frame[..cut]), ParseOutcome::NeedMore, "cut at {}", cut);
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn monitor_data_round_trips(
                mcu_ms in any::<u32>(),
                values in prop::collection::vec(-1.0e6f32..1.0e6, 0..32),
            ) {
                let frame = build_frame(0x81, &monitor_payload(mcu_ms, &values)).unwrap();
                let (frames, left) = drain(&AresplotCodec::default(), &frame);

                prop_assert_eq!(left, 0);
                prop_assert_eq!(frames, vec![Frame::AresMonitor { mcu_timestamp_ms: mcu_ms, values }]);
            }

            #[test]
            fn ack_and_error_round_trip(
                cmd_id in any::<u8>(),
                status in any::<u8>(),
                code in any::<u8>(),
                message in prop::collection::vec(any::<u8>(), 0..64),
            ) {
                let mut buf = build_frame(0x82, &[cmd_id, status]).unwrap();
                let mut report = vec![code];
                report.extend_from_slice(&message);
                buf.extend(build_frame(0x8F, &report).unwrap());

                let (frames, left) = drain(&AresplotCodec::default(), &buf);
                prop_assert_eq!(left, 0);
                prop_assert_eq!(frames, vec![
                    Frame::AresAck { cmd_id, status: AckStatus::from_u8(status) },
                    Frame::AresError { code, message },
                ]);
            }

            #[test]
            fn resyncs_after_sop_free_prefix(
                prefix in prop::collection::vec(any::<u8>().prop_filter("no SOP", |b| *b != SOP), 0..600),
                mcu_ms in any::<u32>(),
                values in prop::collection::vec(-1.0e3f32..1.0e3, 0..8),
            ) {
                let frame = build_frame(0x81, &monitor_payload(mcu_ms, &values)).unwrap();
                let mut buf = prefix.clone();
                buf.extend_from_slice(&frame);

                let (frames, left) = drain(&AresplotCodec::default(), &buf);
                prop_assert_eq!(left, 0);

                let (last, skipped) = frames.split_last().unwrap();
                prop_assert_eq!(last, &Frame::AresMonitor { mcu_timestamp_ms: mcu_ms, values });
                prop_assert!(skipped.iter().all(Frame::is_unidentified));

                let skipped_bytes: usize = skipped.iter().map(|f| match f {
                    Frame::Unidentified { raw, .. } => raw.len(),
                    _ => 0,
                }).sum();
                prop_assert_eq!(skipped_bytes, prefix.len());
            }

            #[test]
            fn consumption_never_exceeds_buffer(buf in prop::collection::vec(any::<u8>(), 0..1024)) {
                let codec = AresplotCodec::default();
                let mut rest = &buf[..];
                while let ParseOutcome::Frame { consumed, .. } = codec.parse(rest) {
                    prop_assert!(consumed > 0);
                    prop_assert!(consumed <= rest.len());
                    rest = &rest[consumed..];
                }
            }
        }
    }
}
