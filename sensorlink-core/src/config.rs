//! Pipeline configuration
//!
//! All tunables of the pipeline in one serde-friendly struct. Missing keys
//! fall back to the defaults in [`constants`](crate::constants), so a JSON
//! document only needs to name what it changes:
//!
//! ```rust
//! use sensorlink_core::config::PipelineConfig;
//!
//! let config = PipelineConfig::from_json(r#"{ "device_id": "hall2", "buffer_count": 4 }"#).unwrap();
//! assert_eq!(config.buffer_count, 4);
//! assert_eq!(config.max_payloads_per_message, 15);
//! ```
//!
//! The same struct can be built in code with chained setters:
//!
//! ```rust
//! use sensorlink_core::config::PipelineConfig;
//!
//! let config = PipelineConfig::new("hall2")
//!     .max_payloads_per_message(10)
//!     .send_timeout_ms(500);
//! assert!(config.validate().is_ok());
//! ```

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BUFFER_COUNT, DEFAULT_MAX_MESSAGE_SIZE_BYTES, DEFAULT_MAX_PAYLOADS_PER_MESSAGE,
    DEFAULT_OVERHEAD_COEFFICIENT, DEFAULT_PAYLOAD_QUEUE_CAPACITY, DEFAULT_PRODUCER_TIMEOUT_MS,
    DEFAULT_RECONNECT_TIMEOUT_MS, DEFAULT_SEND_TIMEOUT_MS,
};
use crate::encoder::worst_case_batch_len;
use crate::errors::ConfigError;
use crate::transport::QoS;

/// Device identifier used when none is configured
pub const DEFAULT_DEVICE_ID: &str = "clock1";

/// Topic batches are published on when none is configured
pub const DEFAULT_DATA_TOPIC: &str = "/IoT-Clock-RoomMonitor/DEVICE_OUT/DATA";

/// Configuration for one [`Pipeline`](crate::pipeline::Pipeline)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Device identifier written into every batch envelope
    pub device_id: String,
    /// Topic batches are published on
    pub data_topic: String,
    /// Delivery guarantee requested from the transport
    pub qos: QoS,
    /// Whether the broker should retain the last batch
    pub retain: bool,
    /// Depth of the shared payload queue
    pub payload_queue_capacity: usize,
    /// Number of message buffers in the pool
    pub buffer_count: usize,
    /// Depth of the filled queue; `None` means `buffer_count`
    pub filled_queue_depth: Option<usize>,
    /// Largest message the transport accepts, in bytes
    pub max_message_size: usize,
    /// Headroom multiplier applied to `max_message_size` for each buffer
    pub overhead_coefficient: f32,
    /// Payloads sealed into one batch
    pub max_payloads_per_message: usize,
    /// How long producers wait for room in the payload queue
    pub producer_timeout_ms: u64,
    /// How long the aggregator waits for room in the filled queue
    pub send_timeout_ms: u64,
    /// How long the sender waits for a reconnect; `None` waits indefinitely
    pub reconnect_timeout_ms: Option<u64>,
    /// Publish retries after a reconnect, per message
    pub publish_retries: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device_id: DEFAULT_DEVICE_ID.to_owned(),
            data_topic: DEFAULT_DATA_TOPIC.to_owned(),
            qos: QoS::AtMostOnce,
            retain: false,
            payload_queue_capacity: DEFAULT_PAYLOAD_QUEUE_CAPACITY,
            buffer_count: DEFAULT_BUFFER_COUNT,
            filled_queue_depth: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE_BYTES,
            overhead_coefficient: DEFAULT_OVERHEAD_COEFFICIENT,
            max_payloads_per_message: DEFAULT_MAX_PAYLOADS_PER_MESSAGE,
            producer_timeout_ms: DEFAULT_PRODUCER_TIMEOUT_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            reconnect_timeout_ms: Some(DEFAULT_RECONNECT_TIMEOUT_MS),
            publish_retries: 1,
        }
    }
}

impl PipelineConfig {
    /// Create a configuration with defaults for `device_id`
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON document and validate it
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the data topic
    pub fn data_topic(mut self, topic: impl Into<String>) -> Self {
        self.data_topic = topic.into();
        self
    }

    /// Set the publish QoS
    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Set the retain flag
    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Set the payload queue depth
    pub fn payload_queue_capacity(mut self, capacity: usize) -> Self {
        self.payload_queue_capacity = capacity;
        self
    }

    /// Set the number of message buffers
    pub fn buffer_count(mut self, count: usize) -> Self {
        self.buffer_count = count;
        self
    }

    /// Set the filled queue depth
    pub fn filled_queue_depth(mut self, depth: usize) -> Self {
        self.filled_queue_depth = Some(depth);
        self
    }

    /// Set the maximum message size in bytes
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Set the buffer headroom multiplier
    pub fn overhead_coefficient(mut self, coefficient: f32) -> Self {
        self.overhead_coefficient = coefficient;
        self
    }

    /// Set how many payloads go into one batch
    pub fn max_payloads_per_message(mut self, count: usize) -> Self {
        self.max_payloads_per_message = count;
        self
    }

    /// Set the producer push timeout
    pub fn producer_timeout_ms(mut self, ms: u64) -> Self {
        self.producer_timeout_ms = ms;
        self
    }

    /// Set the filled queue send timeout
    pub fn send_timeout_ms(mut self, ms: u64) -> Self {
        self.send_timeout_ms = ms;
        self
    }

    /// Set the reconnect timeout; `None` waits indefinitely
    pub fn reconnect_timeout_ms(mut self, ms: Option<u64>) -> Self {
        self.reconnect_timeout_ms = ms;
        self
    }

    /// Set how many times a message is retried after a reconnect
    pub fn publish_retries(mut self, retries: u8) -> Self {
        self.publish_retries = retries;
        self
    }

    /// Byte size of each message buffer
    pub fn buffer_size(&self) -> usize {
        (self.max_message_size as f32 * self.overhead_coefficient) as usize
    }

    /// Effective filled queue depth
    pub fn filled_depth(&self) -> usize {
        self.filled_queue_depth.unwrap_or(self.buffer_count)
    }

    /// Producer push timeout
    pub fn producer_timeout(&self) -> Duration {
        Duration::from_millis(self.producer_timeout_ms)
    }

    /// Filled queue send timeout
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Reconnect timeout, `None` for indefinite
    pub fn reconnect_timeout(&self) -> Option<Duration> {
        self.reconnect_timeout_ms.map(Duration::from_millis)
    }

    /// Check that the pipeline can run with these values
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &'static str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid { field, reason })
        }

        if self.device_id.is_empty() {
            return invalid("device_id", "must not be empty");
        }
        if self.data_topic.is_empty() {
            return invalid("data_topic", "must not be empty");
        }
        if self.payload_queue_capacity == 0 {
            return invalid("payload_queue_capacity", "must be at least 1");
        }
        if self.buffer_count == 0 {
            return invalid("buffer_count", "must be at least 1");
        }
        match self.filled_queue_depth {
            Some(0) => return invalid("filled_queue_depth", "must be at least 1"),
            Some(depth) if depth > self.buffer_count => {
                return invalid("filled_queue_depth", "must not exceed buffer_count")
            }
            _ => {}
        }
        if self.max_message_size == 0 {
            return invalid("max_message_size", "must be at least 1");
        }
        if !self.overhead_coefficient.is_finite() || self.overhead_coefficient < 1.0 {
            return invalid("overhead_coefficient", "must be a finite value of at least 1.0");
        }
        if self.max_payloads_per_message == 0 {
            return invalid("max_payloads_per_message", "must be at least 1");
        }
        if self.buffer_size() < worst_case_batch_len(&self.device_id, 1) {
            return invalid("max_message_size", "buffer cannot hold a single payload");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.device_id, "clock1");
        assert_eq!(config.payload_queue_capacity, 20);
        assert_eq!(config.buffer_count, 3);
        assert_eq!(config.filled_depth(), 3);
        assert_eq!(config.max_payloads_per_message, 15);
        assert_eq!(config.qos, QoS::AtMostOnce);
        assert!(!config.retain);
        assert_eq!(config.publish_retries, 1);
    }

    #[test]
    fn buffer_size_applies_overhead() {
        let config = PipelineConfig::default();
        assert_eq!(config.buffer_size(), 2457);

        let config = PipelineConfig::default().max_message_size(1000).overhead_coefficient(1.5);
        assert_eq!(config.buffer_size(), 1500);
    }

    #[test]
    fn builder_chain() {
        let config = PipelineConfig::new("hall2")
            .data_topic("site/hall2/data")
            .qos(QoS::AtLeastOnce)
            .buffer_count(4)
            .filled_queue_depth(2)
            .reconnect_timeout_ms(None)
            .publish_retries(3);

        assert_eq!(config.device_id, "hall2");
        assert_eq!(config.filled_depth(), 2);
        assert_eq!(config.reconnect_timeout(), None);
        assert_eq!(config.send_timeout(), Duration::from_millis(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn json_overrides_only_named_keys() {
        let config = PipelineConfig::from_json(
            r#"{ "device_id": "lab", "qos": "AtLeastOnce", "reconnect_timeout_ms": null }"#,
        )
        .unwrap();

        assert_eq!(config.device_id, "lab");
        assert_eq!(config.qos, QoS::AtLeastOnce);
        assert_eq!(config.reconnect_timeout_ms, None);
        assert_eq!(config.buffer_count, DEFAULT_BUFFER_COUNT);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cases = [
            (PipelineConfig::new(""), "device_id"),
            (PipelineConfig::default().buffer_count(0), "buffer_count"),
            (PipelineConfig::default().filled_queue_depth(5), "filled_queue_depth"),
            (PipelineConfig::default().overhead_coefficient(0.5), "overhead_coefficient"),
            (PipelineConfig::default().max_payloads_per_message(0), "max_payloads_per_message"),
            (PipelineConfig::default().max_message_size(32), "max_message_size"),
        ];

        for (config, expected) in cases {
            match config.validate() {
                Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected {expected} to be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = PipelineConfig::from_json("{ buffer_count: 3 }").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
