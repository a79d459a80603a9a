//! Telemetry Pipeline
//!
//! ## Overview
//!
//! A [`Pipeline`] owns the shared state that connects sensor producers to
//! the network: the bounded payload queue, the message buffer pool and the
//! running counters. It is built once from a [`PipelineConfig`] and shared
//! behind an `Arc` by every task that touches it.
//!
//! ## Architecture
//!
//! ```text
//!  Producer ─┐                                                 ┌─ free ←─────────────┐
//!  Producer ─┼─ push → PayloadQueue → Aggregator ─ acquire ────┘                     │
//!  Producer ─┘                           │                                           │
//!                                        └─ publish_filled → filled → Sender ─ release_free
//!                                                                       │
//!                                                                   Transport
//! ```
//!
//! - **Producers** hand over finished payloads with a bounded wait and keep
//!   sampling when the queue stays full.
//! - **Aggregator** is the only consumer of the payload queue. It encodes up
//!   to `max_payloads_per_message` payloads into one buffer, seals it and
//!   forwards it (see [`aggregator`](crate::aggregator)).
//! - **Sender** is the only consumer of the filled queue. It publishes each
//!   batch, reconnecting once on a lost link, and always returns the buffer
//!   (see [`sender`](crate::sender)).
//!
//! Every buffer is at all times in exactly one place: the free queue, the
//! filled queue, or held by one task.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use sensorlink_core::config::PipelineConfig;
//! use sensorlink_core::payload::PayloadBuilder;
//! use sensorlink_core::pipeline::Pipeline;
//! use sensorlink_core::transport::MemoryTransport;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let pipeline = Arc::new(Pipeline::new(PipelineConfig::new("hall2")).unwrap());
//! let handle = pipeline.spawn(MemoryTransport::new());
//!
//! let producer = pipeline.producer();
//! let reading = PayloadBuilder::new("sound", 1_700_000_000_000_000)
//!     .float("db", 42.5)
//!     .build()
//!     .unwrap();
//! producer.report(reading).await.unwrap();
//!
//! handle.shutdown().await;
//! # }
//! ```

use std::sync::Arc;

use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::aggregator::Aggregator;
use crate::buffer::BufferPool;
use crate::config::PipelineConfig;
use crate::encoder::worst_case_batch_len;
use crate::errors::ConfigError;
use crate::producer::Producer;
use crate::queue::PayloadQueue;
use crate::sender::Sender;
use crate::stats::PipelineStats;
use crate::transport::Transport;

/// Shared state of one telemetry pipeline
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    queue: PayloadQueue,
    pool: BufferPool,
    stats: PipelineStats,
}

impl Pipeline {
    /// Validate `config` and allocate the queue and buffer pool
    ///
    /// Warns when a buffer may be too small for a full batch of worst-case
    /// payloads; such batches are aborted at runtime.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let buffer_size = config.buffer_size();
        let worst_case = worst_case_batch_len(&config.device_id, config.max_payloads_per_message);
        if buffer_size < worst_case {
            warn!(
                "Buffer size {} below worst-case batch of {} bytes for {} payloads",
                buffer_size, worst_case, config.max_payloads_per_message
            );
        }

        let queue = PayloadQueue::new(config.payload_queue_capacity);
        let pool = BufferPool::with_filled_depth(config.buffer_count, buffer_size, config.filled_depth());

        info!(
            "Pipeline for {}: queue {}, {} buffers of {} bytes, {} payloads per message",
            config.device_id,
            config.payload_queue_capacity,
            config.buffer_count,
            buffer_size,
            config.max_payloads_per_message
        );

        Ok(Self {
            config,
            queue,
            pool,
            stats: PipelineStats::default(),
        })
    }

    /// Configuration the pipeline was built with
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Shared payload queue
    pub fn queue(&self) -> &PayloadQueue {
        &self.queue
    }

    /// Message buffer pool
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Running counters
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// A handle producers use to report payloads
    pub fn producer(self: &Arc<Self>) -> Producer {
        Producer::new(Arc::clone(self))
    }

    /// Start the aggregator and sender tasks on the current runtime
    pub fn spawn<T: Transport + 'static>(self: &Arc<Self>, transport: T) -> PipelineHandle {
        let shutdown = CancellationToken::new();
        let aggregator = Aggregator::new(Arc::clone(self), shutdown.child_token());
        let sender = Sender::new(Arc::clone(self), transport, shutdown.child_token());

        PipelineHandle {
            shutdown,
            aggregator: tokio::spawn(aggregator.run()),
            sender: tokio::spawn(sender.run()),
        }
    }
}

/// Running aggregator and sender tasks of a pipeline
#[derive(Debug)]
pub struct PipelineHandle {
    shutdown: CancellationToken,
    aggregator: JoinHandle<()>,
    sender: JoinHandle<()>,
}

impl PipelineHandle {
    /// Token that stops both tasks when cancelled
    ///
    /// Hand it to sampler tasks so one cancel stops everything.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop both tasks and wait for them to return their buffers
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for (name, task) in [("aggregator", self.aggregator), ("sender", self.sender)] {
            if let Err(err) = task.await {
                warn!("Pipeline {} task ended abnormally: {}", name, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PoolSnapshot;
    use crate::payload::PayloadBuilder;
    use crate::transport::MemoryTransport;
    use core::time::Duration;

    #[test]
    fn rejects_invalid_config() {
        let err = Pipeline::new(PipelineConfig::default().buffer_count(0)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "buffer_count", .. }));
    }

    #[test]
    fn sizes_pool_from_config() {
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        assert_eq!(pipeline.pool().buffer_count(), 3);
        assert_eq!(pipeline.pool().buffer_size(), 2457);
        assert_eq!(pipeline.pool().filled_depth(), 3);
        assert_eq!(pipeline.queue().capacity(), 20);
    }

    #[tokio::test]
    async fn delivers_full_batch_end_to_end() {
        let pipeline = Arc::new(Pipeline::new(PipelineConfig::default().max_payloads_per_message(2)).unwrap());
        let transport = Arc::new(MemoryTransport::new());
        let handle = pipeline.spawn(transport.clone());

        let producer = pipeline.producer();
        for t in 1..=2 {
            let payload = PayloadBuilder::new("light", t).float("lux", 120.0).build().unwrap();
            producer.report(payload).await.unwrap();
        }

        assert!(transport.wait_for_messages(1, Duration::from_secs(5)).await);
        handle.shutdown().await;

        assert_eq!(pipeline.stats().snapshot().messages_published, 1);
        assert_eq!(pipeline.pool().snapshot(), PoolSnapshot { free: 3, filled: 0, in_flight: 0 });
    }

    #[tokio::test]
    async fn shutdown_returns_every_buffer() {
        let pipeline = Arc::new(Pipeline::new(PipelineConfig::default()).unwrap());
        let handle = pipeline.spawn(MemoryTransport::new());

        // one payload leaves the aggregator holding a partial batch
        let payload = PayloadBuilder::new("sntp", 7).bool("synced", true).build().unwrap();
        pipeline.producer().report(payload).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        handle.shutdown().await;
        assert_eq!(pipeline.pool().free_count(), 3);
    }
}
