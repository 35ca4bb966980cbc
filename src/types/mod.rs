//! Core types shared by the codecs, the worker, and the coordinator.
//!
//! ## Overview
//!
//! - [`Frame`] is what a codec produces from a byte buffer
//! - [`Sample`] and [`Batch`] are what consumers receive
//! - [`AresType`], [`AckStatus`], and [`CommandId`] mirror the Aresplot wire tables
//! - [`SessionConfig`], [`SerialOptions`], and [`CoordinatorConfig`] describe a session
//! - [`ConnectionState`] is the coordinator's state machine
//!
//! ## Usage Example
//!
//! ```rust
//! use aresplot::types::{AresType, Subscription, SubscriptionSet};
//!
//! let mut set = SubscriptionSet::default();
//! set.push(Subscription::new(0x2000_0010, AresType::Float32, "motor_speed")).unwrap();
//! set.push(Subscription::new(0x2000_0014, AresType::Int16, "current_ma")).unwrap();
//!
//! assert_eq!(set.channel_names(), vec!["motor_speed", "current_ma"]);
//! ```

mod ares;
mod config;
mod frame;
mod sample;
mod state;
mod update_rate;

pub use ares::{
    AckStatus, AresType, CommandId, EOP, HEADER_LEN, MAX_PAYLOAD_LEN, MAX_SUBSCRIPTIONS, SOP,
    Subscription, SubscriptionSet, TRAILER_LEN,
};
pub use config::{
    CoordinatorConfig, DEFAULT_BUFFER_SIZE, FlowControl, Parity, ParserSelection, ProtocolKind,
    SerialOptions, SessionConfig, SimConfig, Source,
};
pub use frame::{Frame, UnidentifiedReason};
pub use sample::{Batch, Sample};
pub use state::ConnectionState;
pub use update_rate::UpdateRate;

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    prop_compose! {
        fn arb_sample()(
            timestamp_ms in 0.0f64..1.0e9,
            values in prop::collection::vec(-1.0e6f64..1.0e6, 0..8),
            raw in prop::option::of(prop::collection::vec(any::<u8>(), 0..32)),
        ) -> Sample {
            Sample { timestamp_ms, values, raw, mcu_timestamp_ms: None }
        }
    }

    proptest! {
        #[test]
        fn prop_ack_status_preserves_every_byte(byte in any::<u8>()) {
            prop_assert_eq!(AckStatus::from_u8(byte).as_u8(), byte);
        }

        #[test]
        fn prop_ares_type_codes_are_dense(byte in 0u8..=8) {
            let ty = AresType::from_u8(byte);
            prop_assert!(ty.is_some());
            prop_assert_eq!(ty.map(AresType::as_u8), Some(byte));
        }

        #[test]
        fn prop_batch_merge_keeps_producer_order(
            first in prop::collection::vec(arb_sample(), 0..16),
            second in prop::collection::vec(arb_sample(), 0..16),
        ) {
            let mut merged = Batch::new(3, first.clone());
            merged.merge(Batch::new(4, second.clone()));

            prop_assert_eq!(merged.sequence, 3);
            prop_assert_eq!(merged.len(), first.len() + second.len());
            prop_assert_eq!(&merged.samples[..first.len()], &first[..]);
            prop_assert_eq!(&merged.samples[first.len()..], &second[..]);
        }

        #[test]
        fn prop_point_count_ignores_raw_only_samples(
            samples in prop::collection::vec(arb_sample(), 0..32),
        ) {
            let expected = samples.iter().filter(|s| !s.values.is_empty()).count();
            prop_assert_eq!(Batch::new(0, samples).point_count(), expected);
        }
    }

    #[test]
    fn sample_builders() {
        let sample = Sample::new(12.5, vec![1.0, 2.0]).with_raw(b"1,2".to_vec());
        assert!(sample.has_values());
        assert_eq!(sample.raw.as_deref(), Some(&b"1,2"[..]));

        let raw = Sample::raw_only(13.0, vec![0xFF]);
        assert!(!raw.has_values());
    }

    #[test]
    fn sample_serializes_for_consumers() {
        let sample = Sample::new(1.0, vec![0.5]);
        let yaml = serde_yaml_ng::to_string(&sample).unwrap();
        let back: Sample = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back, sample);
    }
}
