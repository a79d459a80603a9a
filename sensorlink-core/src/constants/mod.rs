//! Constants for SensorLink Core
//!
//! Centralized defaults for the telemetry pipeline. Every value here can be
//! overridden through [`PipelineConfig`](crate::config::PipelineConfig)
//! except the payload shape limits, which size the inline storage of
//! [`SensorPayload`](crate::payload::SensorPayload) at compile time.
//!
//! ## Organization
//!
//! - **Buffers**: queue depths, buffer counts, message sizing and payload limits
//! - **Time**: blocking timeouts and producer report periods
//!
//! ## Usage Guidelines
//!
//! 1. Always use these constants instead of magic numbers
//! 2. Include units in the name (`_MS`, `_US`, `_BYTES`)
//! 3. Document where the value comes from

/// Buffer sizes, queue depths and payload shape limits.
pub mod buffers;

/// Timeouts, unit conversions and report periods.
pub mod time;

pub use buffers::{
    DEFAULT_BUFFER_COUNT, DEFAULT_MAX_MESSAGE_SIZE_BYTES, DEFAULT_MAX_PAYLOADS_PER_MESSAGE,
    DEFAULT_OVERHEAD_COEFFICIENT, DEFAULT_PAYLOAD_QUEUE_CAPACITY, FIELD_NAME_MAX_LEN,
    MAX_FIELDS_PER_PAYLOAD, SENSOR_NAME_MAX_LEN,
};

pub use time::{
    DEFAULT_PRODUCER_TIMEOUT_MS, DEFAULT_RECONNECT_TIMEOUT_MS, DEFAULT_SEND_TIMEOUT_MS,
    LIGHT_REPORT_PERIOD_MS, SNTP_REPORT_PERIOD_MS, SOUND_REPORT_PERIOD_MS, US_PER_MS,
    US_PER_SECOND,
};
