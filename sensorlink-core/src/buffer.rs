//! Message Buffer Pool
//!
//! ## Overview
//!
//! All message memory is allocated once, when the pool is built, and then
//! cycled between the aggregator and the sender for the life of the
//! pipeline. Ownership of a buffer is the [`MessageBuffer`] value itself:
//! it is not `Clone`, and the only way to move one between tasks is through
//! the pool's two queues.
//!
//! ```text
//!            acquire_free                publish_filled
//!   ┌──────┐ ──────────→ Aggregator ─────────────────→ ┌────────┐
//!   │ free │                                            │ filled │
//!   └──────┘ ←────────── Sender ←───────────────────── └────────┘
//!      ↑     release_free          consume_filled
//!      └──── release_free (backpressure drop, encode abort)
//! ```
//!
//! ## Invariant
//!
//! Every buffer is, at every instant, in exactly one place: the free queue,
//! the filled queue, or held by one task. [`BufferPool::snapshot`] reports
//! the three counts, and they always sum to the buffer count, even while
//! tasks are moving buffers.
//!
//! ## Recycling
//!
//! [`release_free`](BufferPool::release_free) zeroes the buffer before
//! returning it, so stale batch bytes never leak into the next message.
//! Releasing never blocks: the free queue is sized to hold every buffer.

use core::fmt;
use core::time::Duration;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::error;
use thiserror_no_std::Error;
use tokio::sync::Notify;

use crate::encoder::BatchWriter;
use crate::errors::{EncodeResult, QueueError};

/// One fixed-size message buffer
///
/// Holding a `MessageBuffer` means owning it exclusively.
pub struct MessageBuffer {
    id: usize,
    data: Box<[u8]>,
    len: usize,
}

impl MessageBuffer {
    fn new(id: usize, size: usize) -> Self {
        Self {
            id,
            data: vec![0; size].into_boxed_slice(),
            len: 0,
        }
    }

    /// Stable index of this buffer within its pool
    pub fn id(&self) -> usize {
        self.id
    }

    /// Total bytes available
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Valid bytes of the current message
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no message is held
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The current message
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Start a batch for `device_id` over the whole buffer
    ///
    /// Any previous message is discarded. The length is only set again by
    /// [`seal`](Self::seal).
    pub fn begin_batch(&mut self, device_id: &str) -> EncodeResult<BatchWriter<'_>> {
        self.len = 0;
        BatchWriter::open(&mut self.data, device_id)
    }

    /// Record a sealed batch of `len` bytes
    pub fn seal(&mut self, len: usize) {
        self.len = len.min(self.data.len());
    }

    /// Zero the contents and forget the message
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.len = 0;
    }

    #[cfg(test)]
    pub(crate) fn fill_for_test(&mut self, byte: u8, len: usize) {
        self.data[..len].fill(byte);
        self.len = len;
    }
}

impl fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBuffer")
            .field("id", &self.id)
            .field("capacity", &self.data.len())
            .field("len", &self.len)
            .finish()
    }
}

/// A buffer the filled queue would not take
///
/// Carries the buffer back so the caller can recycle it.
#[derive(Error, Debug)]
#[error("Filled queue rejected buffer: {kind}")]
pub struct Rejected {
    /// Why the buffer was rejected
    pub kind: QueueError,
    /// The buffer, still owned by the caller
    pub buffer: MessageBuffer,
}

/// Where the pool's buffers are at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Buffers waiting in the free queue
    pub free: usize,
    /// Sealed batches waiting in the filled queue
    pub filled: usize,
    /// Buffers held by a task
    pub in_flight: usize,
}

impl PoolSnapshot {
    /// Sum of all three locations
    pub fn total(&self) -> usize {
        self.free + self.filled + self.in_flight
    }
}

/// The pool's queues and its held count, moved together under one lock
struct Slots {
    free: VecDeque<MessageBuffer>,
    filled: VecDeque<MessageBuffer>,
    in_flight: usize,
}

impl Slots {
    fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            free: self.free.len(),
            filled: self.filled.len(),
            in_flight: self.in_flight,
        }
    }
}

#[derive(Clone, Copy)]
enum Side {
    Free,
    Filled,
}

/// Fixed pool of message buffers with free and filled queues
///
/// Every transfer updates the queue and the held count in the same critical
/// section, so [`snapshot`](Self::snapshot) always totals the buffer count.
pub struct BufferPool {
    slots: Mutex<Slots>,
    free_ready: Notify,
    filled_ready: Notify,
    filled_space: Notify,
    buffer_count: usize,
    buffer_size: usize,
    filled_depth: usize,
}

impl BufferPool {
    /// Allocate `buffer_count` buffers of `buffer_size` bytes, all free
    pub fn new(buffer_count: usize, buffer_size: usize) -> Self {
        Self::with_filled_depth(buffer_count, buffer_size, buffer_count)
    }

    /// Like [`new`](Self::new) with a shallower filled queue
    ///
    /// `filled_depth` is clamped to `1..=buffer_count`.
    pub fn with_filled_depth(buffer_count: usize, buffer_size: usize, filled_depth: usize) -> Self {
        let buffer_count = buffer_count.max(1);
        let filled_depth = filled_depth.clamp(1, buffer_count);

        let free = (0..buffer_count)
            .map(|id| MessageBuffer::new(id, buffer_size))
            .collect();

        Self {
            slots: Mutex::new(Slots {
                free,
                filled: VecDeque::with_capacity(filled_depth),
                in_flight: 0,
            }),
            free_ready: Notify::new(),
            filled_ready: Notify::new(),
            filled_space: Notify::new(),
            buffer_count,
            buffer_size,
            filled_depth,
        }
    }

    /// Take a free buffer, waiting up to `timeout` (or indefinitely)
    ///
    /// Cancel-safe: dropping the future never loses a buffer.
    pub async fn acquire_free(&self, timeout: Option<Duration>) -> Result<MessageBuffer, QueueError> {
        self.take(Side::Free, timeout).await
    }

    /// Hand a sealed buffer to the sender side, waiting up to `timeout`
    ///
    /// On failure the buffer comes back inside [`Rejected`]; the caller
    /// must not retry and should [`release_free`](Self::release_free) it.
    pub async fn publish_filled(&self, buffer: MessageBuffer, timeout: Duration) -> Result<(), Rejected> {
        let mut pending = Some(buffer);
        let _ = tokio::time::timeout(timeout, async {
            loop {
                let space = self.filled_space.notified();
                if self.try_publish(&mut pending) {
                    return;
                }
                space.await;
            }
        })
        .await;

        match pending {
            None => Ok(()),
            Some(buffer) => Err(Rejected {
                kind: QueueError::Full,
                buffer,
            }),
        }
    }

    /// Take the oldest sealed buffer, waiting up to `timeout` (or indefinitely)
    ///
    /// Cancel-safe like [`acquire_free`](Self::acquire_free).
    pub async fn consume_filled(&self, timeout: Option<Duration>) -> Result<MessageBuffer, QueueError> {
        self.take(Side::Filled, timeout).await
    }

    /// Zero a buffer and return it to the free queue; never blocks
    pub fn release_free(&self, mut buffer: MessageBuffer) {
        buffer.clear();
        let mut slots = self.lock();
        if slots.free.len() >= self.buffer_count || slots.in_flight == 0 {
            error!("Free queue refused buffer {}: not held from this pool; buffer lost", buffer.id);
            return;
        }
        slots.free.push_back(buffer);
        slots.in_flight -= 1;
        drop(slots);
        self.free_ready.notify_waiters();
    }

    /// Buffers waiting in the free queue
    pub fn free_count(&self) -> usize {
        self.lock().free.len()
    }

    /// Sealed batches waiting in the filled queue
    pub fn filled_count(&self) -> usize {
        self.lock().filled.len()
    }

    /// Buffers currently held by a task
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Where every buffer is right now, read atomically
    pub fn snapshot(&self) -> PoolSnapshot {
        self.lock().snapshot()
    }

    /// Total buffers owned by the pool
    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    /// Size of each buffer in bytes
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Depth of the filled queue
    pub fn filled_depth(&self) -> usize {
        self.filled_depth
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // every update is one push or pop plus its count, so a poisoned lock is still whole
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ready(&self, side: Side) -> &Notify {
        match side {
            Side::Free => &self.free_ready,
            Side::Filled => &self.filled_ready,
        }
    }

    fn try_take(&self, side: Side) -> Option<MessageBuffer> {
        let mut slots = self.lock();
        let buffer = match side {
            Side::Free => slots.free.pop_front(),
            Side::Filled => slots.filled.pop_front(),
        }?;
        slots.in_flight += 1;
        drop(slots);

        if let Side::Filled = side {
            self.filled_space.notify_waiters();
        }
        Some(buffer)
    }

    fn try_publish(&self, pending: &mut Option<MessageBuffer>) -> bool {
        let mut slots = self.lock();
        if slots.filled.len() >= self.filled_depth {
            return false;
        }
        if let Some(buffer) = pending.take() {
            slots.filled.push_back(buffer);
            slots.in_flight -= 1;
        }
        drop(slots);
        self.filled_ready.notify_waiters();
        true
    }

    async fn take(&self, side: Side, timeout: Option<Duration>) -> Result<MessageBuffer, QueueError> {
        let wait = async {
            loop {
                let ready = self.ready(side).notified();
                if let Some(buffer) = self.try_take(side) {
                    return buffer;
                }
                ready.await;
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| QueueError::Timeout),
            None => Ok(wait.await),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_count", &self.buffer_count)
            .field("buffer_size", &self.buffer_size)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
