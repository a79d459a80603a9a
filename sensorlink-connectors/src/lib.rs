//! Network connectors for SensorLink
//!
//! ## Overview
//!
//! `sensorlink-core` hands sealed batch messages to anything implementing
//! [`Transport`]. This crate provides the implementations that talk to real
//! networks.
//!
//! ### MQTT
//!
//! **When to use:**
//! - Reliable networks (WiFi, Ethernet)
//! - A broker fans data out to several consumers
//! - Inbound control messages on a second topic
//!
//! **Characteristics:**
//! - Header overhead: 2-5 bytes minimum
//! - Persistent connection, reconnected by the client library
//! - QoS levels 0, 1 and 2 map onto [`QoS`]
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sensorlink_connectors::mqtt::{MqttConfig, MqttTransport};
//! use sensorlink_core::{Pipeline, PipelineConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = MqttTransport::start(MqttConfig::new("broker.local", 1883).client_id("clock1"))?;
//! let pipeline = Arc::new(Pipeline::new(PipelineConfig::new("clock1"))?);
//! let handle = pipeline.spawn(transport);
//! // ... report payloads through pipeline.producer() ...
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttConfig, MqttCredentials, MqttError, MqttTransport};

// Re-export the transport boundary so connector users need one import
#[cfg(feature = "std")]
pub use sensorlink_core::transport::{
    ConnectionEvent, ConnectionState, MessageId, QoS, RefusalReason, Transport,
};
#[cfg(feature = "std")]
pub use sensorlink_core::TransportError;
