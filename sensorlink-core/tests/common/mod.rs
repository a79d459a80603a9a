//! Shared fixtures for integration tests
//!
//! Payload generators shaped like the room monitor's sensors, plus small
//! async helpers for waiting on pipeline state.

#![allow(dead_code)]

use std::time::Duration;

use sensorlink_core::decode::{DecodedValue, DecodedPayload};
use sensorlink_core::{FieldValue, PayloadBuilder, SensorPayload};

/// Microphone window report: RMS extremes and mean over `win_s` seconds
pub fn sound(timestamp: u64, rms: f32) -> SensorPayload {
    PayloadBuilder::new("sound", timestamp)
        .float("rms_max_sound", rms + 6.0)
        .float("rms_min_sound", rms - 4.5)
        .float("rms_sound", rms)
        .uint("win_s", 60)
        .build()
        .unwrap()
}

/// Light sensor window report: lux extremes and mean over `win_s` seconds
pub fn tsl2591(timestamp: u64, lux: f32) -> SensorPayload {
    PayloadBuilder::new("tsl2591", timestamp)
        .float("max_lux", lux * 1.25)
        .float("min_lux", lux * 0.5)
        .float("lux", lux)
        .uint("win_s", 60)
        .build()
        .unwrap()
}

/// Time sync report carrying wall-clock seconds
pub fn sntp(timestamp: u64) -> SensorPayload {
    PayloadBuilder::new("sntp", timestamp)
        .long_uint("sntp_time", timestamp / 1_000_000)
        .build()
        .unwrap()
}

/// What a field value looks like after a trip through the wire format
pub fn expected_wire_value(value: FieldValue) -> DecodedValue {
    match value {
        FieldValue::Float(v) => DecodedValue::Float(v),
        FieldValue::Int(v) | FieldValue::LongInt(v) if v < 0 => DecodedValue::Int(v),
        FieldValue::Int(v) | FieldValue::LongInt(v) => DecodedValue::UInt(v as u64),
        FieldValue::UInt(v) | FieldValue::LongUInt(v) => DecodedValue::UInt(v),
        FieldValue::Bool(v) => DecodedValue::Bool(v),
        FieldValue::Unknown => DecodedValue::Null,
    }
}

/// Check that `decoded` carries the same content as `original`
pub fn assert_same_payload(original: &SensorPayload, decoded: &DecodedPayload) {
    assert_eq!(decoded.sensor, original.sensor());
    assert_eq!(decoded.timestamp, original.timestamp());
    assert_eq!(decoded.fields.len(), original.field_count());
    for (field, (name, value)) in original.fields().iter().zip(&decoded.fields) {
        assert_eq!(name, field.name());
        assert_eq!(*value, expected_wire_value(field.value()));
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
