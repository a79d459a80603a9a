//! MQTT transport for SensorLink
//!
//! Publishes sealed batches to an MQTT broker through `rumqttc`.
//!
//! ## Connection Handling
//!
//! `rumqttc` splits a connection into a cloneable [`AsyncClient`] that
//! enqueues requests and an [`EventLoop`] that must be polled to make
//! progress. [`MqttTransport::start`] moves the event loop onto its own task.
//! That task turns every network event into a [`ConnectionEvent`], folds it
//! into the link state and publishes the result on a `watch` channel:
//!
//! ```text
//! EventLoop::poll ─→ ConnAck / Disconnect / error ─→ ConnectionEvent
//!                                                       │ on_event
//!                                                       ↓
//!                     publish() ←── watch<ConnectionState> ──→ reconnect()
//! ```
//!
//! The client library reconnects on its own on the next poll after a
//! failure, so [`Transport::reconnect`] only waits for the state to become
//! `Connected` again.
//!
//! ## Publishing
//!
//! While the link is down `publish` fails immediately with
//! [`TransportError::Disconnected`] instead of queueing inside the client,
//! which lets the sender decide whether to reconnect or drop.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sensorlink_connectors::mqtt::{MqttConfig, MqttTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MqttConfig::new("broker.local", 1883)
//!     .client_id("clock1")
//!     .credentials("monitor", "secret")
//!     .control_topic("/IoT-Clock-RoomMonitor/DEVICE_IN/CONTROL");
//!
//! let transport = MqttTransport::start(config)?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use sensorlink_core::errors::TransportError;
use sensorlink_core::transport::{
    ConnectionEvent, ConnectionState, MessageId, QoS, RefusalReason, Transport,
};

/// Shortest keep-alive the client library accepts
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// MQTT-specific errors
#[derive(Debug, Error)]
pub enum MqttError {
    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request could not be handed to the client
    #[error("Client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Broker login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttCredentials {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

/// MQTT connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host name or address
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Client identifier
    pub client_id: String,
    /// Optional login
    pub credentials: Option<MqttCredentials>,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,
    /// Start with a clean session
    pub clean_session: bool,
    /// Depth of the client's request channel
    pub channel_capacity: usize,
    /// Pause after a failed poll before the client tries again, in milliseconds
    pub retry_delay_ms: u64,
    /// Topic to subscribe to for inbound control messages
    pub control_topic: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: format!("sensorlink-{}", env!("CARGO_PKG_VERSION")),
            credentials: None,
            keep_alive_secs: 60,
            clean_session: true,
            channel_capacity: 10,
            retry_delay_ms: 1000,
            control_topic: None,
        }
    }
}

impl MqttConfig {
    /// Settings for the broker at `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Set the client identifier
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    /// Log in with user name and password
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(MqttCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Set the keep-alive interval in seconds
    pub fn keep_alive_secs(mut self, secs: u64) -> Self {
        self.keep_alive_secs = secs;
        self
    }

    /// Choose between a clean and a persistent session
    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Set the request channel depth
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the pause between failed connection attempts
    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.retry_delay_ms = ms;
        self
    }

    /// Subscribe to `topic` for inbound control messages
    pub fn control_topic(mut self, topic: impl Into<String>) -> Self {
        self.control_topic = Some(topic.into());
        self
    }

    /// Check the settings before connecting
    pub fn validate(&self) -> Result<(), MqttError> {
        if self.host.is_empty() {
            return Err(MqttError::Config("host must not be empty".into()));
        }
        if self.client_id.is_empty() {
            return Err(MqttError::Config("client_id must not be empty".into()));
        }
        if self.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(MqttError::Config(format!(
                "keep_alive_secs must be at least {}",
                MIN_KEEP_ALIVE_SECS
            )));
        }
        if self.channel_capacity == 0 {
            return Err(MqttError::Config("channel_capacity must be at least 1".into()));
        }
        if matches!(&self.control_topic, Some(topic) if topic.is_empty()) {
            return Err(MqttError::Config("control_topic must not be empty".into()));
        }
        Ok(())
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options
            .set_keep_alive(Duration::from_secs(self.keep_alive_secs))
            .set_clean_session(self.clean_session);
        if let Some(creds) = &self.credentials {
            options.set_credentials(&creds.username, &creds.password);
        }
        options
    }
}

/// [`Transport`] over an MQTT broker connection
pub struct MqttTransport {
    client: AsyncClient,
    state: watch::Receiver<ConnectionState>,
    next_id: AtomicU32,
    driver: JoinHandle<()>,
}

impl MqttTransport {
    /// Connect to the broker in `config` and start driving the connection
    ///
    /// Returns as soon as the event loop task is running; the link comes up
    /// in the background. Must be called within a Tokio runtime.
    pub fn start(config: MqttConfig) -> Result<Self, MqttError> {
        config.validate()?;

        let (client, eventloop) = AsyncClient::new(config.options(), config.channel_capacity);
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        info!(
            "MQTT client {} connecting to {}:{}",
            config.client_id, config.host, config.port
        );

        let driver = tokio::spawn(drive(eventloop, client.clone(), state_tx, config));

        Ok(Self {
            client,
            state,
            next_id: AtomicU32::new(0),
            driver,
        })
    }

    /// Ask the broker to close the session cleanly
    pub async fn disconnect(&self) -> Result<(), MqttError> {
        self.client.disconnect().await?;
        Ok(())
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, TransportError> {
        if !self.state().is_connected() {
            return Err(TransportError::Disconnected);
        }

        self.client
            .publish(topic, to_mqtt_qos(qos), retain, payload.to_vec())
            .await
            .map_err(|err| TransportError::Failed(err.to_string()))?;

        let id = MessageId(self.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1));
        debug!("Enqueued {} bytes on {} as {}", payload.len(), topic, id);
        Ok(id)
    }

    async fn reconnect(&self, timeout: Option<Duration>) -> Result<(), TransportError> {
        let mut state = self.state.clone();
        let connected = async move { state.wait_for(ConnectionState::is_connected).await.is_ok() };

        let connected = match timeout {
            Some(limit) => tokio::time::timeout(limit, connected)
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => connected.await,
        };

        if connected {
            Ok(())
        } else {
            Err(TransportError::Failed("MQTT event loop stopped".into()))
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

/// Map a pipeline QoS onto the client library's
pub fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn connack_event(code: ConnectReturnCode) -> ConnectionEvent {
    let reason = match code {
        ConnectReturnCode::Success => return ConnectionEvent::Connected,
        ConnectReturnCode::RefusedProtocolVersion => RefusalReason::BadProtocol,
        ConnectReturnCode::BadClientId => RefusalReason::BadClientId,
        ConnectReturnCode::ServiceUnavailable => RefusalReason::ServiceUnavailable,
        ConnectReturnCode::BadUserNamePassword => RefusalReason::BadCredentials,
        ConnectReturnCode::NotAuthorized => RefusalReason::NotAuthorized,
    };
    ConnectionEvent::Refused(reason)
}

fn error_event(err: &ConnectionError, state: ConnectionState) -> ConnectionEvent {
    match err {
        ConnectionError::ConnectionRefused(code) => connack_event(*code),
        _ if state.is_connected() => ConnectionEvent::Disconnected,
        _ => ConnectionEvent::TransportFailure,
    }
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    state: watch::Sender<ConnectionState>,
    config: MqttConfig,
) {
    let apply = |event: ConnectionEvent| {
        state.send_modify(|s| *s = s.on_event(event));
        *state.borrow()
    };

    loop {
        let current = *state.borrow();
        if !matches!(current, ConnectionState::Connected | ConnectionState::Connecting) {
            apply(ConnectionEvent::BeforeConnect);
        }

        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let now = apply(connack_event(ack.code));
                info!("MQTT link {:?}", now);
                if let (true, Some(topic)) = (now.is_connected(), &config.control_topic) {
                    if let Err(err) = client.try_subscribe(topic.as_str(), rumqttc::QoS::AtMostOnce) {
                        warn!("Subscribing to {} failed: {}", topic, err);
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(message))) => {
                if config.control_topic.as_deref() == Some(message.topic.as_str()) {
                    info!(
                        "Control message on {}: {} bytes",
                        message.topic,
                        message.payload.len()
                    );
                } else {
                    debug!("Ignoring message on {}", message.topic);
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) | Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                let now = apply(ConnectionEvent::Disconnected);
                info!("MQTT link {:?}", now);
            }
            Ok(_) => {}
            Err(ConnectionError::RequestsDone) => {
                info!("MQTT client dropped, event loop stopping");
                apply(ConnectionEvent::Disconnected);
                break;
            }
            Err(err) => {
                let before = *state.borrow();
                let now = apply(error_event(&err, before));
                warn!("MQTT connection error: {} (link {:?})", err, now);
                tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_codes_map_to_refusals() {
        assert_eq!(connack_event(ConnectReturnCode::Success), ConnectionEvent::Connected);
        assert_eq!(
            connack_event(ConnectReturnCode::BadUserNamePassword),
            ConnectionEvent::Refused(RefusalReason::BadCredentials)
        );
        assert_eq!(
            connack_event(ConnectReturnCode::RefusedProtocolVersion),
            ConnectionEvent::Refused(RefusalReason::BadProtocol)
        );
    }

    #[test]
    fn losing_an_established_link_is_a_disconnect() {
        let err = ConnectionError::NetworkTimeout;
        assert_eq!(error_event(&err, ConnectionState::Connected), ConnectionEvent::Disconnected);
        assert_eq!(
            error_event(&err, ConnectionState::Connecting),
            ConnectionEvent::TransportFailure
        );
        assert_eq!(
            error_event(
                &ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized),
                ConnectionState::Connecting
            ),
            ConnectionEvent::Refused(RefusalReason::NotAuthorized)
        );
    }

    #[test]
    fn qos_maps_one_to_one() {
        assert_eq!(to_mqtt_qos(QoS::AtMostOnce), rumqttc::QoS::AtMostOnce);
        assert_eq!(to_mqtt_qos(QoS::AtLeastOnce), rumqttc::QoS::AtLeastOnce);
        assert_eq!(to_mqtt_qos(QoS::ExactlyOnce), rumqttc::QoS::ExactlyOnce);
    }

    #[test]
    fn config_validation() {
        assert!(MqttConfig::new("broker.local", 1883).validate().is_ok());
        assert!(MqttConfig::new("", 1883).validate().is_err());
        assert!(MqttConfig::default().keep_alive_secs(1).validate().is_err());
        assert!(MqttConfig::default().channel_capacity(0).validate().is_err());
        assert!(MqttConfig::default().control_topic("").validate().is_err());
    }

    #[test]
    fn config_from_json_keeps_defaults() {
        let config: MqttConfig =
            serde_json::from_str(r#"{ "host": "10.0.0.2", "client_id": "clock1" }"#).unwrap();
        assert_eq!(config.host, "10.0.0.2");
        assert_eq!(config.port, 1883);
        assert_eq!(config.keep_alive_secs, 60);
        assert!(config.credentials.is_none());
    }

    #[tokio::test]
    async fn publish_fails_fast_without_broker() {
        // nothing listens on port 1
        let config = MqttConfig::new("127.0.0.1", 1).retry_delay_ms(50);
        let transport = MqttTransport::start(config).unwrap();

        let err = transport
            .publish("t", b"batch", QoS::AtMostOnce, false)
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Disconnected);

        let err = transport
            .reconnect(Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Timeout);
        assert!(!transport.state().is_connected());
    }
}
