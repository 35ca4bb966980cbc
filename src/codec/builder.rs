//! Aresplot request frame builder

use crate::types::{AresType, CommandId, EOP, HEADER_LEN, MAX_PAYLOAD_LEN, SOP, Subscription, TRAILER_LEN};
use crate::{AresplotError, Result};

/// XOR of `CMD`, both `LEN` bytes, and every payload byte.
pub fn checksum(cmd: u8, payload: &[u8]) -> u8 {
    let len = (payload.len() as u16).to_le_bytes();
    payload.iter().fold(cmd ^ len[0] ^ len[1], |acc, b| acc ^ b)
}

/// Wrap `payload` as `SOP | CMD | LEN | PAYLOAD | CHECKSUM | EOP`.
pub fn build_frame(cmd: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(AresplotError::frame_build(format!(
            "payload of {} bytes exceeds {} bytes",
            payload.len(),
            MAX_PAYLOAD_LEN
        )));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    frame.push(SOP);
    frame.push(cmd);
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);
    frame.push(checksum(cmd, payload));
    frame.push(EOP);
    Ok(frame)
}

/// `START_MONITOR`: `numVars | (address u32 LE, type u8) x numVars`.
///
/// An empty list asks the MCU to stop monitoring.
pub fn build_start_monitor(subscriptions: &[Subscription]) -> Result<Vec<u8>> {
    if subscriptions.len() > u8::MAX as usize {
        return Err(AresplotError::frame_build(format!(
            "{} variables exceed the START_MONITOR count field",
            subscriptions.len()
        )));
    }

    let mut payload = Vec::with_capacity(1 + subscriptions.len() * 5);
    payload.push(subscriptions.len() as u8);
    for sub in subscriptions {
        payload.extend_from_slice(&sub.address.to_le_bytes());
        payload.push(sub.original_type.as_u8());
    }
    build_frame(CommandId::StartMonitor.as_u8(), &payload)
}

/// `SET_VARIABLE`: `address u32 LE | type u8 | value f32 LE`.
pub fn build_set_variable(address: u32, original_type: AresType, value: f32) -> Result<Vec<u8>> {
    let mut payload = [0u8; 9];
    payload[..4].copy_from_slice(&address.to_le_bytes());
    payload[4] = original_type.as_u8();
    payload[5..].copy_from_slice(&value.to_le_bytes());
    build_frame(CommandId::SetVariable.as_u8(), &payload)
}

/// `SET_SAMPLE_RATE`: `rate_hz u32 LE`; zero restores the MCU default.
pub fn build_set_sample_rate(rate_hz: u32) -> Result<Vec<u8>> {
    build_frame(CommandId::SetSampleRate.as_u8(), &rate_hz.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_monitor_is_byte_exact() {
        let subs = [
            Subscription::new(0xDEAD_BEEF, AresType::Float32, "a"),
            Subscription::new(0x1000, AresType::UInt16, "b"),
        ];
        let frame = build_start_monitor(&subs).unwrap();

        let body = [0x01, 0x0B, 0x00, 0x02, 0xEF, 0xBE, 0xAD, 0xDE, 0x06, 0x00, 0x10, 0x00, 0x00, 0x03];
        let chk = body.iter().fold(0u8, |acc, b| acc ^ b);

        let mut expected = vec![0xA5];
        expected.extend_from_slice(&body);
        expected.push(chk);
        expected.push(0x5A);
        assert_eq!(frame, expected);
    }

    #[test]
    fn empty_start_monitor_stops_monitoring() {
        let frame = build_start_monitor(&[]).unwrap();
        assert_eq!(frame, vec![0xA5, 0x01, 0x01, 0x00, 0x00, 0x01 ^ 0x01, 0x5A]);
    }

    #[test]
    fn set_variable_layout() {
        let frame = build_set_variable(0x2000_0010, AresType::Int16, -2.0).unwrap();
        assert_eq!(frame.len(), HEADER_LEN + 9 + TRAILER_LEN);
        assert_eq!(&frame[..4], &[0xA5, 0x02, 0x09, 0x00]);
        assert_eq!(&frame[4..8], &0x2000_0010u32.to_le_bytes());
        assert_eq!(frame[8], AresType::Int16.as_u8());
        assert_eq!(&frame[9..13], &(-2.0f32).to_le_bytes());
        assert_eq!(frame[13], checksum(0x02, &frame[4..13]));
        assert_eq!(frame[14], 0x5A);
    }

    #[test]
    fn set_sample_rate_layout() {
        let frame = build_set_sample_rate(500).unwrap();
        assert_eq!(&frame[..4], &[0xA5, 0x03, 0x04, 0x00]);
        assert_eq!(&frame[4..8], &500u32.to_le_bytes());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let err = build_frame(0x02, &vec![0u8; MAX_PAYLOAD_LEN + 1]).unwrap_err();
        assert!(matches!(err, AresplotError::FrameBuild { .. }));
        assert!(build_frame(0x02, &vec![0u8; MAX_PAYLOAD_LEN]).is_ok());
    }

    #[test]
    fn too_many_subscriptions_for_count_field() {
        let subs: Vec<_> = (0..256).map(|i| Subscription::new(i, AresType::UInt8, "v")).collect();
        assert!(build_start_monitor(&subs).is_err());
    }
}
