//! CBOR Batch Encoder
//!
//! ## Overview
//!
//! Batches are written straight into a fixed message buffer with
//! [`minicbor`], using indefinite-length containers so the encoder never has
//! to know up front how many payloads or fields will follow:
//!
//! ```text
//! { "data": {
//!     "deviceId": "clock1",
//!     "sensor_data": [
//!       { "sensor": "sound", "timestamp": 1700000000000000,
//!         "fields": { "rms_sound": 44.0, "win_s": 4 } },
//!       ...
//!     ]
//! }}
//! ```
//!
//! [`encode_payload`] writes one payload map into whatever container is open
//! on the encoder. [`BatchWriter`] owns the envelope: it opens the outer maps
//! and the `sensor_data` array, accepts payloads, and closes everything on
//! [`seal`](BatchWriter::seal).
//!
//! ## Value Mapping
//!
//! | Field value | CBOR |
//! |-------------|------|
//! | `Float` | single-precision float (major 7, `0xfa`) |
//! | `Int`, `LongInt` | smallest signed integer encoding |
//! | `UInt`, `LongUInt` | smallest unsigned integer encoding |
//! | `Bool` | `true` / `false` |
//! | `Unknown` | `null` |
//!
//! Encoding is deterministic: the same payload written on an encoder in the
//! same state always produces the same bytes.
//!
//! ## Failure
//!
//! The only failure is running out of buffer. Once that happens the buffer
//! holds a truncated document and must be discarded, not sealed.

use minicbor::encode::{Error, Write};
use minicbor::Encoder;

use crate::constants::{FIELD_NAME_MAX_LEN, MAX_FIELDS_PER_PAYLOAD, SENSOR_NAME_MAX_LEN};
use crate::errors::{EncodeError, EncodeResult};
use crate::payload::{FieldValue, SensorPayload};

/// Envelope key wrapping the batch
pub const KEY_DATA: &str = "data";
/// Envelope key for the device identifier
pub const KEY_DEVICE_ID: &str = "deviceId";
/// Envelope key for the payload array
pub const KEY_SENSOR_DATA: &str = "sensor_data";
/// Payload key for the sensor name
pub const KEY_SENSOR: &str = "sensor";
/// Payload key for the timestamp
pub const KEY_TIMESTAMP: &str = "timestamp";
/// Payload key for the field map
pub const KEY_FIELDS: &str = "fields";

/// Append one payload map into the container currently open on `encoder`
pub fn encode_payload<W: Write>(
    payload: &SensorPayload,
    encoder: &mut Encoder<W>,
) -> EncodeResult<()> {
    write_payload(payload, encoder).map_err(capacity_exceeded)
}

fn write_payload<W: Write>(
    payload: &SensorPayload,
    e: &mut Encoder<W>,
) -> Result<(), Error<W::Error>> {
    e.begin_map()?
        .str(KEY_SENSOR)?
        .str(payload.sensor())?
        .str(KEY_TIMESTAMP)?
        .u64(payload.timestamp())?
        .str(KEY_FIELDS)?
        .begin_map()?;

    for field in payload.fields() {
        e.str(field.name())?;
        write_value(field.value(), e)?;
    }

    e.end()?.end()?;
    Ok(())
}

fn write_value<W: Write>(value: FieldValue, e: &mut Encoder<W>) -> Result<(), Error<W::Error>> {
    match value {
        FieldValue::Float(v) => e.f32(v)?,
        FieldValue::Int(v) | FieldValue::LongInt(v) => e.i64(v)?,
        FieldValue::UInt(v) | FieldValue::LongUInt(v) => e.u64(v)?,
        FieldValue::Bool(v) => e.bool(v)?,
        FieldValue::Unknown => e.null()?,
    };
    Ok(())
}

fn capacity_exceeded<E>(_: Error<E>) -> EncodeError {
    EncodeError::CapacityExceeded
}

/// Incremental writer for one batch message
///
/// Borrows the message buffer for the lifetime of the batch. Dropping a
/// writer without sealing leaves an unterminated document in the buffer.
pub struct BatchWriter<'b> {
    encoder: Encoder<&'b mut [u8]>,
    capacity: usize,
    payloads: usize,
}

impl<'b> BatchWriter<'b> {
    /// Open the envelope on `buf` for `device_id`
    pub fn open(buf: &'b mut [u8], device_id: &str) -> EncodeResult<Self> {
        let capacity = buf.len();
        let mut encoder = Encoder::new(buf);
        encoder
            .begin_map()
            .and_then(|e| e.str(KEY_DATA))
            .and_then(|e| e.begin_map())
            .and_then(|e| e.str(KEY_DEVICE_ID))
            .and_then(|e| e.str(device_id))
            .and_then(|e| e.str(KEY_SENSOR_DATA))
            .and_then(|e| e.begin_array())
            .map_err(capacity_exceeded)?;

        Ok(Self {
            encoder,
            capacity,
            payloads: 0,
        })
    }

    /// Append one payload to the `sensor_data` array
    pub fn push(&mut self, payload: &SensorPayload) -> EncodeResult<()> {
        encode_payload(payload, &mut self.encoder)?;
        self.payloads += 1;
        Ok(())
    }

    /// Payloads written so far
    pub fn payload_count(&self) -> usize {
        self.payloads
    }

    /// Bytes written so far
    pub fn bytes_written(&self) -> usize {
        self.capacity - self.encoder.writer().len()
    }

    /// Close the array and both envelope maps, returning the message length
    pub fn seal(mut self) -> EncodeResult<usize> {
        self.encoder
            .end()
            .and_then(|e| e.end())
            .and_then(|e| e.end())
            .map_err(capacity_exceeded)?;
        Ok(self.bytes_written())
    }
}

/// Encode a complete batch into `buf`, returning the message length
pub fn encode_batch(
    buf: &mut [u8],
    device_id: &str,
    payloads: &[SensorPayload],
) -> EncodeResult<usize> {
    let mut writer = BatchWriter::open(buf, device_id)?;
    for payload in payloads {
        writer.push(payload)?;
    }
    writer.seal()
}

/// Encoded size of a text string of `len` bytes, header included
const fn text_len(len: usize) -> usize {
    let header = if len < 24 {
        1
    } else if len <= 0xff {
        2
    } else if len <= 0xffff {
        3
    } else if len <= 0xffff_ffff {
        5
    } else {
        9
    };
    header + len
}

/// Upper bound on the encoded size of any one payload
pub const fn worst_case_payload_len() -> usize {
    // widest scalar: integer with an 8-byte argument
    let value = 9;
    let field = text_len(FIELD_NAME_MAX_LEN) + value;

    1 + text_len(KEY_SENSOR.len())
        + text_len(SENSOR_NAME_MAX_LEN)
        + text_len(KEY_TIMESTAMP.len())
        + 9
        + text_len(KEY_FIELDS.len())
        + 1
        + MAX_FIELDS_PER_PAYLOAD * field
        + 1
        + 1
}

/// Upper bound on the encoded size of a batch of `payloads` payloads
pub fn worst_case_batch_len(device_id: &str, payloads: usize) -> usize {
    let envelope = 1
        + text_len(KEY_DATA.len())
        + 1
        + text_len(KEY_DEVICE_ID.len())
        + text_len(device_id.len())
        + text_len(KEY_SENSOR_DATA.len())
        + 1
        + 3;
    envelope + payloads * worst_case_payload_len()
}
