//! Core telemetry pipeline for SensorLink
//!
//! Collects readings from independent sensor tasks, batches them into
//! compact CBOR messages and hands those to a network transport.
//! Designed for small devices with a fixed memory budget.
//!
//! Key constraints:
//! - Bounded everything: payload queue, buffer pool, per-payload fields
//! - Message buffers are allocated once and recycled, never reallocated
//! - A slow or broken network loses data, it never stalls a sensor
//!
//! The payload model and the CBOR encoder are `no_std`; the queues, tasks
//! and transports need the `std` feature.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sensorlink_core::{MemoryTransport, PayloadBuilder, Pipeline, PipelineConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let pipeline = Arc::new(Pipeline::new(PipelineConfig::new("clock1")).unwrap());
//! let handle = pipeline.spawn(MemoryTransport::new());
//!
//! let reading = PayloadBuilder::new("tsl2591", 1_700_000_000_000_000)
//!     .float("lux", 312.5)
//!     .uint("ir", 88)
//!     .build()
//!     .unwrap();
//! pipeline.producer().report(reading).await.ok();
//!
//! handle.shutdown().await;
//! # }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod constants;
pub mod encoder;
pub mod errors;
pub mod payload;
pub mod time;

#[cfg(feature = "std")]
pub mod aggregator;
#[cfg(feature = "std")]
pub mod buffer;
#[cfg(feature = "std")]
pub mod config;
#[cfg(feature = "std")]
pub mod decode;
#[cfg(feature = "std")]
pub mod pipeline;
#[cfg(feature = "std")]
pub mod producer;
#[cfg(feature = "std")]
pub mod queue;
#[cfg(feature = "std")]
pub mod sender;
#[cfg(feature = "std")]
pub mod stats;
#[cfg(feature = "std")]
pub mod transport;

// Public API
pub use encoder::{encode_batch, encode_payload, BatchWriter};
pub use errors::{EncodeError, PayloadError, QueueError};
pub use payload::{FieldType, FieldValue, PayloadBuilder, SensorField, SensorPayload};
pub use time::{FixedTime, ReportSchedule, TimeSource, TimestampUs};

#[cfg(feature = "std")]
pub use config::PipelineConfig;
#[cfg(feature = "std")]
pub use errors::{ConfigError, DecodeError, TransportError};
#[cfg(feature = "std")]
pub use pipeline::{Pipeline, PipelineHandle};
#[cfg(feature = "std")]
pub use producer::{Producer, Sampler};
#[cfg(feature = "std")]
pub use time::BootClock;
#[cfg(feature = "std")]
pub use transport::{ConnectionEvent, ConnectionState, MemoryTransport, MessageId, QoS, Transport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}
