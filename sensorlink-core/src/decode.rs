//! Batch decoder
//!
//! Parses a batch message back into owned values. The device never decodes
//! its own output; this exists for host-side tooling and for checking what
//! the encoder produced. Both definite and indefinite containers are
//! accepted, and unknown keys are skipped.

use minicbor::data::Type;
use minicbor::Decoder;

use crate::encoder::{
    KEY_DATA, KEY_DEVICE_ID, KEY_FIELDS, KEY_SENSOR, KEY_SENSOR_DATA, KEY_TIMESTAMP,
};
use crate::errors::DecodeError;

/// A decoded field value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecodedValue {
    /// Float of any precision, narrowed to `f32`
    Float(f32),
    /// Negative integer
    Int(i64),
    /// Non-negative integer
    UInt(u64),
    /// Boolean
    Bool(bool),
    /// Null or undefined
    Null,
}

/// A decoded payload
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    /// Sensor name
    pub sensor: String,
    /// Timestamp in microseconds
    pub timestamp: u64,
    /// Fields in wire order
    pub fields: Vec<(String, DecodedValue)>,
}

impl DecodedPayload {
    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<DecodedValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

/// A decoded batch message
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBatch {
    /// Device identifier from the envelope
    pub device_id: String,
    /// Payloads in batch order
    pub payloads: Vec<DecodedPayload>,
}

/// Decode a complete batch message
pub fn decode_batch(bytes: &[u8]) -> Result<DecodedBatch, DecodeError> {
    let mut d = Decoder::new(bytes);
    let mut batch = None;

    for_each_entry(&mut d, |d| {
        if d.str()? == KEY_DATA {
            batch = Some(decode_data(d)?);
        } else {
            d.skip()?;
        }
        Ok(())
    })?;

    batch.ok_or(DecodeError::MissingKey(KEY_DATA))
}

fn decode_data(d: &mut Decoder<'_>) -> Result<DecodedBatch, DecodeError> {
    let mut device_id = None;
    let mut payloads = None;

    for_each_entry(d, |d| {
        match d.str()? {
            KEY_DEVICE_ID => device_id = Some(d.str()?.to_owned()),
            KEY_SENSOR_DATA => {
                let mut list = Vec::new();
                for_each_item(d, |d| {
                    list.push(decode_payload(d)?);
                    Ok(())
                })?;
                payloads = Some(list);
            }
            _ => {
                d.skip()?;
            }
        }
        Ok(())
    })?;

    Ok(DecodedBatch {
        device_id: device_id.ok_or(DecodeError::MissingKey(KEY_DEVICE_ID))?,
        payloads: payloads.ok_or(DecodeError::MissingKey(KEY_SENSOR_DATA))?,
    })
}

fn decode_payload(d: &mut Decoder<'_>) -> Result<DecodedPayload, DecodeError> {
    let mut sensor = None;
    let mut timestamp = None;
    let mut fields = None;

    for_each_entry(d, |d| {
        match d.str()? {
            KEY_SENSOR => sensor = Some(d.str()?.to_owned()),
            KEY_TIMESTAMP => {
                timestamp = Some(d.u64().map_err(|_| DecodeError::UnexpectedType {
                    key: KEY_TIMESTAMP,
                })?)
            }
            KEY_FIELDS => {
                let mut list = Vec::new();
                for_each_entry(d, |d| {
                    let name = d.str()?.to_owned();
                    list.push((name, decode_value(d)?));
                    Ok(())
                })?;
                fields = Some(list);
            }
            _ => {
                d.skip()?;
            }
        }
        Ok(())
    })?;

    Ok(DecodedPayload {
        sensor: sensor.ok_or(DecodeError::MissingKey(KEY_SENSOR))?,
        timestamp: timestamp.ok_or(DecodeError::MissingKey(KEY_TIMESTAMP))?,
        fields: fields.ok_or(DecodeError::MissingKey(KEY_FIELDS))?,
    })
}

fn decode_value(d: &mut Decoder<'_>) -> Result<DecodedValue, DecodeError> {
    let value = match d.datatype()? {
        Type::F32 => DecodedValue::Float(d.f32()?),
        Type::F64 => DecodedValue::Float(d.f64()? as f32),
        Type::U8 | Type::U16 | Type::U32 | Type::U64 => DecodedValue::UInt(d.u64()?),
        Type::I8 | Type::I16 | Type::I32 | Type::I64 => DecodedValue::Int(d.i64()?),
        Type::Bool => DecodedValue::Bool(d.bool()?),
        Type::Null | Type::Undefined => {
            d.skip()?;
            DecodedValue::Null
        }
        _ => return Err(DecodeError::UnexpectedType { key: KEY_FIELDS }),
    };
    Ok(value)
}

/// Visit every key/value pair of a map, definite or indefinite
fn for_each_entry<'b, F>(d: &mut Decoder<'b>, mut entry: F) -> Result<(), DecodeError>
where
    F: FnMut(&mut Decoder<'b>) -> Result<(), DecodeError>,
{
    match d.map()? {
        Some(len) => {
            for _ in 0..len {
                entry(d)?;
            }
        }
        None => loop {
            if matches!(d.datatype()?, Type::Break) {
                d.set_position(d.position() + 1);
                break;
            }
            entry(d)?;
        },
    }
    Ok(())
}

/// Visit every item of an array, definite or indefinite
fn for_each_item<'b, F>(d: &mut Decoder<'b>, mut item: F) -> Result<(), DecodeError>
where
    F: FnMut(&mut Decoder<'b>) -> Result<(), DecodeError>,
{
    match d.array()? {
        Some(len) => {
            for _ in 0..len {
                item(d)?;
            }
        }
        None => loop {
            if matches!(d.datatype()?, Type::Break) {
                d.set_position(d.position() + 1);
                break;
            }
            item(d)?;
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode_batch;
    use crate::payload::{FieldValue, PayloadBuilder, SensorPayload};

    #[test]
    fn decodes_encoder_output() {
        let payloads = [
            PayloadBuilder::new("sound", 10)
                .float("rms_sound", 44.5)
                .uint("win_s", 4)
                .build()
                .unwrap(),
            PayloadBuilder::new("bme690", 11)
                .int("delta", -7)
                .bool("ok", false)
                .field("raw", FieldValue::Unknown)
                .build()
                .unwrap(),
        ];
        let mut buf = [0u8; 256];
        let len = encode_batch(&mut buf, "clock1", &payloads).unwrap();

        let batch = decode_batch(&buf[..len]).unwrap();
        assert_eq!(batch.device_id, "clock1");
        assert_eq!(batch.payloads.len(), 2);
        assert_eq!(batch.payloads[0].sensor, "sound");
        assert_eq!(batch.payloads[0].field("rms_sound"), Some(DecodedValue::Float(44.5)));
        assert_eq!(batch.payloads[1].timestamp, 11);
        assert_eq!(batch.payloads[1].field("delta"), Some(DecodedValue::Int(-7)));
        assert_eq!(batch.payloads[1].field("ok"), Some(DecodedValue::Bool(false)));
        assert_eq!(batch.payloads[1].field("raw"), Some(DecodedValue::Null));
    }

    #[test]
    fn empty_field_map_decodes_to_no_fields() {
        let payloads = [SensorPayload::new("sntp", 1).unwrap()];
        let mut buf = [0u8; 128];
        let len = encode_batch(&mut buf, "clock1", &payloads).unwrap();

        let batch = decode_batch(&buf[..len]).unwrap();
        assert!(batch.payloads[0].fields.is_empty());
    }

    #[test]
    fn accepts_definite_length_containers() {
        // {"data": {"deviceId": "d", "sensor_data": []}}
        let bytes = [
            0xa1, 0x64, b'd', b'a', b't', b'a',
            0xa2,
            0x68, b'd', b'e', b'v', b'i', b'c', b'e', b'I', b'd', 0x61, b'd',
            0x6b, b's', b'e', b'n', b's', b'o', b'r', b'_', b'd', b'a', b't', b'a', 0x80,
        ];
        let batch = decode_batch(&bytes).unwrap();
        assert_eq!(batch.device_id, "d");
        assert!(batch.payloads.is_empty());
    }

    #[test]
    fn missing_envelope_is_reported() {
        // {} as an empty definite map
        assert_eq!(decode_batch(&[0xa0]), Err(DecodeError::MissingKey(KEY_DATA)));
        assert!(matches!(decode_batch(&[0xff]), Err(DecodeError::Malformed(_))));
    }
}
