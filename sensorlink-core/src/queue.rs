//! Bounded Payload Queue
//!
//! ## Overview
//!
//! The payload queue is the only point where producer tasks meet the
//! aggregator. Any number of producers push [`SensorPayload`] values; a
//! single consumer pops them in arrival order.
//!
//! ```text
//! sound ──┐
//! light ──┼──→ [ PayloadQueue (bounded) ] ──→ Aggregator
//! sntp  ──┘
//! ```
//!
//! ## Semantics
//!
//! - Payloads are moved in by value; nothing is shared after the push.
//! - `push` waits up to a timeout for room. On expiry the reading is dropped
//!   and the producer carries on: a stalled consumer costs data, never
//!   producer liveness.
//! - `pop` waits up to a timeout, or indefinitely when none is given.
//! - FIFO order holds across the merged stream of all producers.
//!
//! ## Implementation
//!
//! A `tokio::sync::mpsc` bounded channel carries the payloads. The receiver
//! sits behind an async mutex so the queue can be shared by reference from
//! one `Pipeline` object; in practice only the aggregator ever locks it.
//! Both waits are cancel-safe, so a consumer can race `pop` against a
//! shutdown signal without losing a payload.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use core::time::Duration;

use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio::sync::Mutex;

use crate::errors::QueueError;
use crate::payload::SensorPayload;

/// Bounded multi-producer, single-consumer queue of sensor payloads
pub struct PayloadQueue {
    tx: mpsc::Sender<SensorPayload>,
    rx: Mutex<mpsc::Receiver<SensorPayload>>,
    capacity: usize,
    stats: QueueStats,
}

/// Queue statistics
///
/// Track queue health without impacting performance
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Total payloads pushed
    pub pushed: AtomicU32,
    /// Total payloads popped
    pub popped: AtomicU32,
    /// Payloads dropped because the queue stayed full
    pub dropped: AtomicU32,
    /// Maximum queue depth seen
    pub max_depth: AtomicU32,
}

impl QueueStats {
    /// Update max depth if current is higher
    fn update_max_depth(&self, current: u32) {
        let mut max = self.max_depth.load(Ordering::Relaxed);
        while current > max {
            match self.max_depth.compare_exchange_weak(
                max,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => max = actual,
            }
        }
    }
}

impl PayloadQueue {
    /// Create a queue holding at most `capacity` payloads (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
            stats: QueueStats::default(),
        }
    }

    /// Push a payload, waiting up to `timeout` for room
    ///
    /// Returns `Err(Full)` if the queue stayed full; the payload is dropped.
    pub async fn push(&self, payload: SensorPayload, timeout: Duration) -> Result<(), QueueError> {
        match self.tx.send_timeout(payload, timeout).await {
            Ok(()) => {
                self.record_push();
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(QueueError::Full)
            }
            Err(SendTimeoutError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    /// Push without waiting
    pub fn try_push(&self, payload: SensorPayload) -> Result<(), QueueError> {
        match self.tx.try_send(payload) {
            Ok(()) => {
                self.record_push();
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(QueueError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    /// Pop the oldest payload
    ///
    /// Waits up to `timeout`, or indefinitely when `timeout` is `None`.
    pub async fn pop(&self, timeout: Option<Duration>) -> Result<SensorPayload, QueueError> {
        let mut rx = self.rx.lock().await;
        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx.recv())
                .await
                .map_err(|_| QueueError::Timeout)?,
            None => rx.recv().await,
        };

        let payload = received.ok_or(QueueError::Closed)?;
        self.stats.popped.fetch_add(1, Ordering::Relaxed);
        Ok(payload)
    }

    /// Payloads currently queued
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue is full
    pub fn is_full(&self) -> bool {
        self.tx.capacity() == 0
    }

    /// Maximum number of queued payloads
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue statistics
    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    fn record_push(&self) {
        self.stats.pushed.fetch_add(1, Ordering::Relaxed);
        self.stats.update_max_depth(self.len() as u32);
    }
}

impl fmt::Debug for PayloadQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
