//! Property-based tests for the batch wire format.

#![cfg(test)]

mod common;

use proptest::prelude::*;

use sensorlink_core::constants::{DEFAULT_MAX_PAYLOADS_PER_MESSAGE, MAX_FIELDS_PER_PAYLOAD};
use sensorlink_core::decode::decode_batch;
use sensorlink_core::encoder::worst_case_batch_len;
use sensorlink_core::{encode_batch, EncodeError, FieldValue, SensorPayload};

use common::assert_same_payload;

fn field_value() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        (-1.0e6f32..1.0e6f32).prop_map(FieldValue::Float),
        any::<i32>().prop_map(|v| FieldValue::Int(v as i64)),
        any::<i64>().prop_map(FieldValue::LongInt),
        any::<u32>().prop_map(|v| FieldValue::UInt(v as u64)),
        any::<u64>().prop_map(FieldValue::LongUInt),
        any::<bool>().prop_map(FieldValue::Bool),
    ]
}

fn payload() -> impl Strategy<Value = SensorPayload> {
    (
        "[a-z0-9_]{1,16}",
        any::<u64>(),
        prop::collection::vec(("[a-z_]{1,16}", field_value()), 0..=MAX_FIELDS_PER_PAYLOAD),
    )
        .prop_map(|(sensor, timestamp, fields)| {
            let mut payload = SensorPayload::new(&sensor, timestamp).unwrap();
            for (name, value) in fields {
                payload.push_field(&name, value).unwrap();
            }
            payload
        })
}

fn batch() -> impl Strategy<Value = Vec<SensorPayload>> {
    prop::collection::vec(payload(), 1..=DEFAULT_MAX_PAYLOADS_PER_MESSAGE)
}

proptest! {
    /// Property: a batch within the worst-case bound decodes to what went in.
    #[test]
    fn prop_batch_decodes_to_input(payloads in batch()) {
        let mut buf = vec![0u8; worst_case_batch_len("clock1", payloads.len())];
        let len = encode_batch(&mut buf, "clock1", &payloads).unwrap();

        let decoded = decode_batch(&buf[..len]).unwrap();
        prop_assert_eq!(decoded.device_id.as_str(), "clock1");
        prop_assert_eq!(decoded.payloads.len(), payloads.len());
        for (original, decoded) in payloads.iter().zip(&decoded.payloads) {
            assert_same_payload(original, decoded);
        }
    }

    /// Property: any buffer either holds a complete batch or reports it is too small.
    #[test]
    fn prop_small_buffers_fail_cleanly(payloads in batch(), size in 0usize..400) {
        let mut buf = vec![0u8; size];
        match encode_batch(&mut buf, "clock1", &payloads) {
            Ok(len) => {
                prop_assert!(len <= size);
                prop_assert_eq!(decode_batch(&buf[..len]).unwrap().payloads.len(), payloads.len());
            }
            Err(err) => prop_assert_eq!(err, EncodeError::CapacityExceeded),
        }
    }
}
