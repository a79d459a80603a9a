//! In-process transport
//!
//! Keeps every published message in memory and logs every call, so the
//! pipeline can run without a broker. Failures can be scripted per call or
//! made permanent.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{ConnectionEvent, ConnectionState, MessageId, QoS, Transport};
use crate::errors::TransportError;

/// A message accepted by [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Assigned identifier
    pub id: MessageId,
    /// Topic it was published on
    pub topic: String,
    /// Message bytes
    pub payload: Vec<u8>,
    /// Requested QoS
    pub qos: QoS,
    /// Retain flag
    pub retain: bool,
}

/// One call made on a [`MemoryTransport`], in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCall {
    /// `publish` was called
    Publish,
    /// `reconnect` was called
    Reconnect,
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    fail_always: Option<TransportError>,
    fail_next: VecDeque<TransportError>,
    refuse_reconnects: bool,
    messages: Vec<PublishedMessage>,
    calls: Vec<TransportCall>,
    next_id: u32,
}

/// Transport that publishes into memory
#[derive(Default)]
pub struct MemoryTransport {
    inner: Mutex<Inner>,
    activity: Notify,
}

impl MemoryTransport {
    /// A connected transport
    pub fn new() -> Self {
        let transport = Self::default();
        transport.lock().state = ConnectionState::Connected;
        transport
    }

    /// A transport that starts disconnected; `reconnect` connects it
    pub fn disconnected() -> Self {
        Self::default()
    }

    /// Fail every publish with `err` until cleared
    pub fn fail_always(&self, err: Option<TransportError>) {
        self.lock().fail_always = err;
    }

    /// Fail the next publish with `err`; queued failures apply in order
    pub fn fail_next(&self, err: TransportError) {
        self.lock().fail_next.push_back(err);
    }

    /// Make `reconnect` time out instead of connecting
    pub fn refuse_reconnects(&self, refuse: bool) {
        self.lock().refuse_reconnects = refuse;
    }

    /// Feed a link event, as a client library would
    pub fn apply(&self, event: ConnectionEvent) {
        let mut inner = self.lock();
        inner.state = inner.state.on_event(event);
    }

    /// Messages accepted so far
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.lock().messages.clone()
    }

    /// Calls made so far
    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    /// Wait until at least `count` messages were accepted
    pub async fn wait_for_messages(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |inner| inner.messages.len() >= count).await
    }

    /// Wait until at least `count` calls were made
    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |inner| inner.calls.len() >= count).await
    }

    async fn wait_until(&self, timeout: Duration, done: impl Fn(&Inner) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.activity.notified();
            if done(&self.lock()) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<MessageId, TransportError> {
        let result = {
            let mut inner = self.lock();
            inner.calls.push(TransportCall::Publish);

            if let Some(err) = inner.fail_always.clone() {
                Err(err)
            } else if let Some(err) = inner.fail_next.pop_front() {
                Err(err)
            } else if !inner.state.is_connected() {
                Err(TransportError::Disconnected)
            } else {
                inner.next_id = inner.next_id.wrapping_add(1);
                let id = MessageId(inner.next_id);
                inner.messages.push(PublishedMessage {
                    id,
                    topic: topic.to_owned(),
                    payload: payload.to_vec(),
                    qos,
                    retain,
                });
                Ok(id)
            }
        };
        self.activity.notify_waiters();
        result
    }

    async fn reconnect(&self, _timeout: Option<Duration>) -> Result<(), TransportError> {
        let result = {
            let mut inner = self.lock();
            inner.calls.push(TransportCall::Reconnect);
            if inner.refuse_reconnects {
                Err(TransportError::Timeout)
            } else {
                inner.state = inner
                    .state
                    .on_event(ConnectionEvent::BeforeConnect)
                    .on_event(ConnectionEvent::Connected);
                Ok(())
            }
        };
        self.activity.notify_waiters();
        result
    }

    fn state(&self) -> ConnectionState {
        self.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_published_messages() {
        let transport = MemoryTransport::new();
        let id = transport
            .publish("t/data", &[1, 2, 3], QoS::AtLeastOnce, true)
            .await
            .unwrap();

        let messages = transport.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, id);
        assert_eq!(messages[0].topic, "t/data");
        assert_eq!(messages[0].payload, [1, 2, 3]);
        assert!(messages[0].retain);
    }

    #[tokio::test]
    async fn disconnected_until_reconnect() {
        let transport = MemoryTransport::disconnected();
        let err = transport.publish("t", b"x", QoS::AtMostOnce, false).await.unwrap_err();
        assert_eq!(err, TransportError::Disconnected);

        transport.reconnect(None).await.unwrap();
        assert!(transport.state().is_connected());
        transport.publish("t", b"x", QoS::AtMostOnce, false).await.unwrap();
        assert_eq!(
            transport.calls(),
            [TransportCall::Publish, TransportCall::Reconnect, TransportCall::Publish]
        );
    }

    #[tokio::test]
    async fn scripted_failures_apply_in_order() {
        let transport = MemoryTransport::new();
        transport.fail_next(TransportError::Timeout);
        transport.fail_next(TransportError::Failed("rejected".into()));

        let first = transport.publish("t", b"", QoS::AtMostOnce, false).await;
        let second = transport.publish("t", b"", QoS::AtMostOnce, false).await;
        let third = transport.publish("t", b"", QoS::AtMostOnce, false).await;
        assert_eq!(first, Err(TransportError::Timeout));
        assert_eq!(second, Err(TransportError::Failed("rejected".into())));
        assert!(third.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_gives_up_after_timeout() {
        let transport = MemoryTransport::new();
        assert!(!transport.wait_for_messages(1, Duration::from_millis(100)).await);
        assert!(transport.wait_for_calls(0, Duration::from_millis(100)).await);
    }
}
