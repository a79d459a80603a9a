//! Transport Boundary
//!
//! ## Overview
//!
//! The pipeline does not know how bytes leave the device. Everything it
//! needs from the network is behind [`Transport`]: publish one message,
//! and wait for the link to come back after a disconnect.
//!
//! ```text
//! Sender ──publish()──→ Transport ──→ broker / endpoint
//!        ←─Disconnected─┘
//!        ──reconnect()─→
//! ```
//!
//! ## Connection State
//!
//! Connection status is modeled as an explicit state machine. A transport
//! feeds [`ConnectionEvent`]s from its client library into
//! [`ConnectionState::on_event`] and keeps the result; the sender only ever
//! reads it.
//!
//! ```text
//!                 BeforeConnect            Connected
//! Disconnected ─────────────────→ Connecting ──────────→ Connected
//!      ↑                              │                     │
//!      │          Refused(reason)     ↓                     │ Disconnected
//!      └────────────────────────── Refused(_)               ↓
//!                                                     ConnectionLost
//! ```
//!
//! `TransportFailure` is reachable from every state and means the socket
//! itself failed (DNS, TLS, TCP reset).
//!
//! ## Implementations
//!
//! - [`MemoryTransport`]: in-process, records everything, scriptable failures
//! - `sensorlink-connectors::mqtt::MqttTransport`: MQTT over `rumqttc`

use core::fmt;
use core::time::Duration;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::TransportError;

mod memory;

pub use memory::{MemoryTransport, PublishedMessage, TransportCall};

/// Delivery guarantee requested for a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QoS {
    /// Fire and forget
    #[default]
    AtMostOnce,
    /// Acknowledged, may duplicate
    AtLeastOnce,
    /// Acknowledged, no duplicates
    ExactlyOnce,
}

/// Identifier a transport assigns to an accepted message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u32);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why the remote end refused a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalReason {
    /// Protocol version not supported
    BadProtocol,
    /// Client identifier rejected
    BadClientId,
    /// Server temporarily unavailable
    ServiceUnavailable,
    /// Username or password rejected
    BadCredentials,
    /// Client not authorized
    NotAuthorized,
}

/// Link status as seen by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected and not trying
    #[default]
    Disconnected,
    /// Connect in progress
    Connecting,
    /// Ready to publish
    Connected,
    /// Was connected, link dropped
    ConnectionLost,
    /// Remote end refused the connection
    Refused(RefusalReason),
    /// Underlying socket or TLS failure
    TransportFailure,
}

/// Something that happened to the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connect attempt is starting
    BeforeConnect,
    /// Connect acknowledged
    Connected,
    /// Link closed
    Disconnected,
    /// Connect refused
    Refused(RefusalReason),
    /// Socket-level error
    TransportFailure,
}

impl ConnectionState {
    /// Next state after `event`
    pub fn on_event(self, event: ConnectionEvent) -> Self {
        match (self, event) {
            (_, ConnectionEvent::BeforeConnect) => Self::Connecting,
            (_, ConnectionEvent::Connected) => Self::Connected,
            (Self::Connected | Self::ConnectionLost, ConnectionEvent::Disconnected) => {
                Self::ConnectionLost
            }
            (_, ConnectionEvent::Disconnected) => Self::Disconnected,
            (_, ConnectionEvent::Refused(reason)) => Self::Refused(reason),
            (_, ConnectionEvent::TransportFailure) => Self::TransportFailure,
        }
    }

    /// Whether a publish can go out now
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Outbound message transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish `payload` on `topic`
    ///
    /// Must fail with [`TransportError::Disconnected`] when the link is
    /// down, so the caller knows a reconnect may help.
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, TransportError>;

    /// Wait for the link to come back, up to `timeout` or indefinitely
    async fn reconnect(&self, timeout: Option<Duration>) -> Result<(), TransportError>;

    /// Current link status
    fn state(&self) -> ConnectionState;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, TransportError> {
        (**self).publish(topic, payload, qos, retain).await
    }

    async fn reconnect(&self, timeout: Option<Duration>) -> Result<(), TransportError> {
        (**self).reconnect(timeout).await
    }

    fn state(&self) -> ConnectionState {
        (**self).state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_sequence() {
        let state = ConnectionState::default()
            .on_event(ConnectionEvent::BeforeConnect)
            .on_event(ConnectionEvent::Connected);
        assert!(state.is_connected());
    }

    #[test]
    fn dropping_an_established_link_is_connection_lost() {
        let state = ConnectionState::Connected.on_event(ConnectionEvent::Disconnected);
        assert_eq!(state, ConnectionState::ConnectionLost);
        assert_eq!(state.on_event(ConnectionEvent::Disconnected), ConnectionState::ConnectionLost);
        assert_eq!(
            ConnectionState::Connecting.on_event(ConnectionEvent::Disconnected),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn refusal_and_failure_are_not_connected() {
        let refused = ConnectionState::Connecting
            .on_event(ConnectionEvent::Refused(RefusalReason::BadCredentials));
        assert_eq!(refused, ConnectionState::Refused(RefusalReason::BadCredentials));
        assert!(!refused.is_connected());

        let failed = ConnectionState::Connected.on_event(ConnectionEvent::TransportFailure);
        assert_eq!(failed, ConnectionState::TransportFailure);
        assert!(failed.on_event(ConnectionEvent::Connected).is_connected());
    }

    #[test]
    fn qos_defaults_to_at_most_once() {
        assert_eq!(QoS::default(), QoS::AtMostOnce);
        assert_eq!(MessageId(7).to_string(), "#7");
    }
}
