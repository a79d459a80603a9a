//! Sensor Payloads
//!
//! A [`SensorPayload`] is one report from one producer: a sensor name, a
//! microsecond timestamp and up to [`MAX_FIELDS_PER_PAYLOAD`] named, typed
//! values. Payloads are fixed-size values with inline storage, so they can be
//! copied into the payload queue without touching the heap.
//!
//! ## Memory Layout
//!
//! ```text
//! SensorPayload
//! ├── sensor:    heapless::String<16>        ~17 bytes
//! ├── timestamp: u64                          8 bytes
//! └── fields:    heapless::Vec<SensorField, 5>
//!                └── SensorField { name: String<16>, value: FieldValue }
//! ```
//!
//! ## Example
//!
//! ```rust
//! use sensorlink_core::payload::PayloadBuilder;
//!
//! let payload = PayloadBuilder::new("tsl2591", 1_700_000_000_000_000)
//!     .float("max_lux", 812.5)
//!     .float("min_lux", 790.0)
//!     .float("lux", 801.2)
//!     .uint("win_s", 3)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(payload.field_count(), 4);
//! ```

use heapless::{String, Vec};

use crate::constants::{FIELD_NAME_MAX_LEN, MAX_FIELDS_PER_PAYLOAD, SENSOR_NAME_MAX_LEN};
use crate::errors::{PayloadError, PayloadResult};

/// Bounded sensor name
pub type SensorName = String<SENSOR_NAME_MAX_LEN>;

/// Bounded field name
pub type FieldName = String<FIELD_NAME_MAX_LEN>;

/// Wire type tag of a field value
///
/// Numeric tags match the ones used by device firmware, where `0` marks an
/// uninitialized field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    /// Uninitialized or unrecognized tag
    Invalid = 0,
    /// Single-precision float
    Float = 1,
    /// Signed integer
    Int = 2,
    /// Wide signed integer
    LongInt = 3,
    /// Unsigned integer
    UInt = 4,
    /// Wide unsigned integer
    LongUInt = 5,
    /// Boolean
    Bool = 6,
}

impl FieldType {
    /// Map a raw firmware tag to a type; anything unknown is `Invalid`
    pub fn from_raw(tag: u8) -> Self {
        match tag {
            1 => Self::Float,
            2 => Self::Int,
            3 => Self::LongInt,
            4 => Self::UInt,
            5 => Self::LongUInt,
            6 => Self::Bool,
            _ => Self::Invalid,
        }
    }
}

/// Value of one sensor field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    /// Single-precision float
    Float(f32),
    /// Signed integer
    Int(i64),
    /// Wide signed integer (kept distinct so producers can round-trip their tag)
    LongInt(i64),
    /// Unsigned integer
    UInt(u64),
    /// Wide unsigned integer
    LongUInt(u64),
    /// Boolean
    Bool(bool),
    /// Value whose type tag was not recognized; encoded as null
    Unknown,
}

impl FieldValue {
    /// Type tag carried by this value
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Float(_) => FieldType::Float,
            Self::Int(_) => FieldType::Int,
            Self::LongInt(_) => FieldType::LongInt,
            Self::UInt(_) => FieldType::UInt,
            Self::LongUInt(_) => FieldType::LongUInt,
            Self::Bool(_) => FieldType::Bool,
            Self::Unknown => FieldType::Invalid,
        }
    }
}

/// One named value inside a payload
#[derive(Debug, Clone, PartialEq)]
pub struct SensorField {
    name: FieldName,
    value: FieldValue,
}

impl SensorField {
    /// Create a field, rejecting names longer than [`FIELD_NAME_MAX_LEN`]
    pub fn new(name: &str, value: FieldValue) -> PayloadResult<Self> {
        Ok(Self {
            name: bounded(name)?,
            value,
        })
    }

    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field value
    pub fn value(&self) -> FieldValue {
        self.value
    }
}

/// One report from one sensor
#[derive(Debug, Clone, PartialEq)]
pub struct SensorPayload {
    sensor: SensorName,
    timestamp: u64,
    fields: Vec<SensorField, MAX_FIELDS_PER_PAYLOAD>,
}

impl SensorPayload {
    /// Create a payload with no fields
    ///
    /// `timestamp` is in microseconds, either wall-clock or boot-relative
    /// plus a UTC offset depending on the producer's clock.
    pub fn new(sensor: &str, timestamp: u64) -> PayloadResult<Self> {
        Ok(Self {
            sensor: bounded(sensor)?,
            timestamp,
            fields: Vec::new(),
        })
    }

    /// Append a field
    pub fn push_field(&mut self, name: &str, value: FieldValue) -> PayloadResult<()> {
        let field = SensorField::new(name, value)?;
        self.fields
            .push(field)
            .map_err(|_| PayloadError::TooManyFields { max: MAX_FIELDS_PER_PAYLOAD })
    }

    /// Sensor name
    pub fn sensor(&self) -> &str {
        &self.sensor
    }

    /// Sensor name as a fixed-capacity string
    pub fn sensor_name(&self) -> &SensorName {
        &self.sensor
    }

    /// Timestamp in microseconds
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Fields in insertion order
    pub fn fields(&self) -> &[SensorField] {
        &self.fields
    }

    /// Number of fields
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Look up a field value by name
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        self.fields.iter().find(|f| f.name() == name).map(SensorField::value)
    }
}

/// Builder for [`SensorPayload`]
///
/// Errors are deferred: the first failure is remembered and reported by
/// [`build`](Self::build), so producers can chain field setters.
pub struct PayloadBuilder {
    payload: PayloadResult<SensorPayload>,
}

impl PayloadBuilder {
    /// Start a payload for `sensor` taken at `timestamp` (microseconds)
    pub fn new(sensor: &str, timestamp: u64) -> Self {
        Self {
            payload: SensorPayload::new(sensor, timestamp),
        }
    }

    /// Add a field of any type
    pub fn field(mut self, name: &str, value: FieldValue) -> Self {
        if let Ok(payload) = &mut self.payload {
            if let Err(err) = payload.push_field(name, value) {
                self.payload = Err(err);
            }
        }
        self
    }

    /// Add a float field
    pub fn float(self, name: &str, value: f32) -> Self {
        self.field(name, FieldValue::Float(value))
    }

    /// Add a signed integer field
    pub fn int(self, name: &str, value: i64) -> Self {
        self.field(name, FieldValue::Int(value))
    }

    /// Add a wide signed integer field
    pub fn long_int(self, name: &str, value: i64) -> Self {
        self.field(name, FieldValue::LongInt(value))
    }

    /// Add an unsigned integer field
    pub fn uint(self, name: &str, value: u64) -> Self {
        self.field(name, FieldValue::UInt(value))
    }

    /// Add a wide unsigned integer field
    pub fn long_uint(self, name: &str, value: u64) -> Self {
        self.field(name, FieldValue::LongUInt(value))
    }

    /// Add a boolean field
    pub fn bool(self, name: &str, value: bool) -> Self {
        self.field(name, FieldValue::Bool(value))
    }

    /// Finish the payload
    pub fn build(self) -> PayloadResult<SensorPayload> {
        self.payload
    }
}

fn bounded<const N: usize>(name: &str) -> PayloadResult<String<N>> {
    let mut out = String::new();
    out.push_str(name)
        .map_err(|_| PayloadError::NameTooLong { len: name.len(), max: N })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_field_order() {
        let payload = PayloadBuilder::new("sound", 42)
            .float("rms_max_sound", 61.5)
            .float("rms_min_sound", 30.25)
            .float("rms_sound", 44.0)
            .uint("win_s", 4)
            .build()
            .unwrap();

        let names: std::vec::Vec<&str> = payload.fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, ["rms_max_sound", "rms_min_sound", "rms_sound", "win_s"]);
        assert_eq!(payload.sensor(), "sound");
        assert_eq!(payload.timestamp(), 42);
        assert_eq!(payload.field("win_s"), Some(FieldValue::UInt(4)));
    }

    #[test]
    fn name_at_limit_is_accepted() {
        let name = "abcdefghijklmnop";
        assert_eq!(name.len(), SENSOR_NAME_MAX_LEN);
        assert!(SensorPayload::new(name, 0).is_ok());
    }

    #[test]
    fn long_names_are_rejected() {
        let err = SensorPayload::new("a_very_long_sensor_name", 0).unwrap_err();
        assert_eq!(err, PayloadError::NameTooLong { len: 23, max: 16 });

        let err = PayloadBuilder::new("sntp", 0)
            .long_uint("seconds_since_the_epoch", 1)
            .build()
            .unwrap_err();
        assert!(matches!(err, PayloadError::NameTooLong { .. }));
    }

    #[test]
    fn sixth_field_is_rejected() {
        let mut payload = SensorPayload::new("multi", 0).unwrap();
        for name in ["a", "b", "c", "d", "e"] {
            payload.push_field(name, FieldValue::Bool(true)).unwrap();
        }
        let err = payload.push_field("f", FieldValue::Bool(false)).unwrap_err();
        assert_eq!(err, PayloadError::TooManyFields { max: 5 });
        assert_eq!(payload.field_count(), 5);
    }

    #[test]
    fn builder_reports_first_error() {
        let err = PayloadBuilder::new("a_very_long_sensor_name", 0)
            .float("x", 1.0)
            .build()
            .unwrap_err();
        assert_eq!(err, PayloadError::NameTooLong { len: 23, max: 16 });
    }

    #[test]
    fn raw_tags_map_to_types() {
        assert_eq!(FieldType::from_raw(1), FieldType::Float);
        assert_eq!(FieldType::from_raw(5), FieldType::LongUInt);
        assert_eq!(FieldType::from_raw(0), FieldType::Invalid);
        assert_eq!(FieldType::from_raw(42), FieldType::Invalid);
        assert_eq!(FieldValue::Unknown.field_type(), FieldType::Invalid);
        assert_eq!(FieldValue::LongInt(-3).field_type() as u8, 3);
    }
}
