//! Batch Aggregator
//!
//! ## Overview
//!
//! The aggregator is the single consumer of the payload queue. It owns at
//! most one message buffer at a time and turns a run of payloads into one
//! sealed batch message.
//!
//! ## State Machine
//!
//! ```text
//!          acquire_free                    count == max
//!   Idle ──────────────→ Encoding ─────────────────────→ Sealed
//!    ↑                    │  ↑ │                            │
//!    │                    │  └─┘ pop + encode_payload       │ publish_filled
//!    │      encode error  ↓                                 │  Ok   → forwarded
//!    │                 Aborted                              │  Full → dropped
//!    │                    │ release_free                    │         release_free
//!    └────────────────────┴─────────────────────────────────┘
//! ```
//!
//! - A batch is sealed the moment it holds `max_payloads_per_message`
//!   payloads; the next payload is left in the queue for the next batch.
//! - Under backpressure the whole sealed batch is dropped and its buffer
//!   recycled. The aggregator never blocks on the sender for longer than the
//!   send timeout.
//! - An encoding failure abandons the batch; nothing partial is forwarded.
//!
//! ## Shutdown
//!
//! The shutdown token is raced against every indefinite wait (free buffer,
//! next payload). A buffer held when shutdown fires goes back to the free
//! queue before the cycle returns, so the pool stays whole.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::buffer::MessageBuffer;
use crate::errors::{EncodeError, QueueError};
use crate::pipeline::Pipeline;
use crate::stats::PipelineStats;

/// Where the aggregator is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    /// Waiting for a free buffer
    Idle,
    /// Filling a batch
    Encoding,
    /// Batch closed, being handed to the sender
    Sealed,
    /// Batch abandoned after an encoding failure
    Aborted,
}

/// Result of one aggregation cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Batch is in the filled queue
    Forwarded {
        /// Buffer carrying the batch
        buffer_id: usize,
        /// Payloads in the batch
        payloads: usize,
        /// Encoded length in bytes
        len: usize,
    },
    /// Filled queue stayed full; batch dropped and buffer recycled
    Dropped {
        /// Buffer that was recycled
        buffer_id: usize,
        /// Payloads lost with the batch
        payloads: usize,
    },
    /// Encoding failed; batch abandoned and buffer recycled
    Aborted {
        /// Buffer that was recycled
        buffer_id: usize,
        /// Payloads taken from the queue for this batch, including the one that failed
        payloads: usize,
        /// What went wrong
        error: EncodeError,
    },
    /// Shutdown was requested
    Stopped,
}

enum Fill {
    Sealed { payloads: usize, len: usize },
    Interrupted { payloads: usize },
}

enum FillError {
    Encode { error: EncodeError, payloads: usize },
    Queue(QueueError),
}

/// Drains the payload queue into sealed batch messages
pub struct Aggregator {
    pipeline: Arc<Pipeline>,
    shutdown: CancellationToken,
    state: AggregatorState,
}

impl Aggregator {
    /// Create an aggregator for `pipeline` that stops when `shutdown` fires
    pub fn new(pipeline: Arc<Pipeline>, shutdown: CancellationToken) -> Self {
        Self {
            pipeline,
            shutdown,
            state: AggregatorState::Idle,
        }
    }

    /// Current state
    pub fn state(&self) -> AggregatorState {
        self.state
    }

    /// Run cycles until shutdown
    pub async fn run(mut self) {
        info!(
            "Aggregator started: {} payloads per batch for device {}",
            self.pipeline.config().max_payloads_per_message,
            self.pipeline.config().device_id
        );

        loop {
            match self.run_cycle().await {
                Ok(CycleOutcome::Stopped) => break,
                Ok(_) => {}
                Err(err) => {
                    error!("Aggregator stopping: {}", err);
                    break;
                }
            }
        }

        info!("Aggregator stopped");
    }

    /// Build, seal and hand off one batch
    ///
    /// Only fails if a queue was closed underneath the aggregator.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, QueueError> {
        self.state = AggregatorState::Idle;
        let pipeline = Arc::clone(&self.pipeline);
        let pool = pipeline.pool();
        let stats = pipeline.stats();

        let mut buffer = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Ok(CycleOutcome::Stopped),
            acquired = pool.acquire_free(None) => acquired?,
        };
        let buffer_id = buffer.id();

        self.state = AggregatorState::Encoding;
        let filled = Self::fill(&pipeline, &self.shutdown, &mut buffer).await;

        let outcome = match filled {
            Ok(Fill::Sealed { payloads, len }) => {
                self.state = AggregatorState::Sealed;
                PipelineStats::bump(&stats.batches_sealed);
                debug!("Sealed batch in buffer {}: {} payloads, {} bytes", buffer_id, payloads, len);

                match pool.publish_filled(buffer, pipeline.config().send_timeout()).await {
                    Ok(()) => {
                        PipelineStats::bump(&stats.batches_forwarded);
                        CycleOutcome::Forwarded { buffer_id, payloads, len }
                    }
                    Err(rejected) => {
                        warn!("Filled queue full, dropping batch of {} payloads", payloads);
                        PipelineStats::bump(&stats.batches_dropped);
                        PipelineStats::add(&stats.batch_payloads_lost, payloads);
                        pool.release_free(rejected.buffer);
                        CycleOutcome::Dropped { buffer_id, payloads }
                    }
                }
            }
            Ok(Fill::Interrupted { payloads }) => {
                if payloads > 0 {
                    info!("Discarding partial batch of {} payloads on shutdown", payloads);
                }
                pool.release_free(buffer);
                CycleOutcome::Stopped
            }
            Err(FillError::Encode { error, payloads }) => {
                self.state = AggregatorState::Aborted;
                error!(
                    "Encoding batch in buffer {} failed after {} payloads: {}",
                    buffer_id, payloads, error
                );
                PipelineStats::bump(&stats.batches_aborted);
                PipelineStats::add(&stats.batch_payloads_lost, payloads);
                pool.release_free(buffer);
                CycleOutcome::Aborted { buffer_id, payloads, error }
            }
            Err(FillError::Queue(err)) => {
                pool.release_free(buffer);
                self.state = AggregatorState::Idle;
                return Err(err);
            }
        };

        self.state = AggregatorState::Idle;
        Ok(outcome)
    }

    async fn fill(
        pipeline: &Pipeline,
        shutdown: &CancellationToken,
        buffer: &mut MessageBuffer,
    ) -> Result<Fill, FillError> {
        let max = pipeline.config().max_payloads_per_message;
        let mut writer = buffer
            .begin_batch(&pipeline.config().device_id)
            .map_err(|error| FillError::Encode { error, payloads: 0 })?;

        while writer.payload_count() < max {
            let payload = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    return Ok(Fill::Interrupted { payloads: writer.payload_count() });
                }
                popped = pipeline.queue().pop(None) => popped.map_err(FillError::Queue)?,
            };

            if let Err(error) = writer.push(&payload) {
                return Err(FillError::Encode {
                    error,
                    payloads: writer.payload_count() + 1,
                });
            }
        }

        let payloads = writer.payload_count();
        let len = writer
            .seal()
            .map_err(|error| FillError::Encode { error, payloads })?;
        buffer.seal(len);
        Ok(Fill::Sealed { payloads, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PoolSnapshot;
    use crate::config::PipelineConfig;
    use crate::decode::decode_batch;
    use crate::payload::{PayloadBuilder, SensorPayload};
    use core::time::Duration;

    fn pipeline(config: PipelineConfig) -> Arc<Pipeline> {
        Arc::new(Pipeline::new(config).unwrap())
    }

    fn reading(n: u64) -> SensorPayload {
        PayloadBuilder::new("thermo", n).uint("n", n).build().unwrap()
    }

    #[tokio::test]
    async fn seals_at_exact_limit_without_draining_more() {
        let pipeline = pipeline(PipelineConfig::default().max_payloads_per_message(3));
        for n in 0..4 {
            pipeline.queue().try_push(reading(n)).unwrap();
        }

        let mut aggregator = Aggregator::new(pipeline.clone(), CancellationToken::new());
        let outcome = aggregator.run_cycle().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Forwarded { payloads: 3, .. }));
        assert_eq!(aggregator.state(), AggregatorState::Idle);
        assert_eq!(pipeline.queue().len(), 1);

        let buffer = pipeline.pool().consume_filled(Some(Duration::from_millis(100))).await.unwrap();
        let batch = decode_batch(buffer.as_bytes()).unwrap();
        let timestamps: Vec<u64> = batch.payloads.iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, [0, 1, 2]);
        pipeline.pool().release_free(buffer);
    }

    #[tokio::test(start_paused = true)]
    async fn backpressure_drops_batch_and_recycles_buffer() {
        let config = PipelineConfig::default()
            .max_payloads_per_message(1)
            .buffer_count(3)
            .filled_queue_depth(1);
        let pipeline = pipeline(config);
        let mut aggregator = Aggregator::new(pipeline.clone(), CancellationToken::new());

        pipeline.queue().try_push(reading(1)).unwrap();
        let first = aggregator.run_cycle().await.unwrap();
        assert!(matches!(first, CycleOutcome::Forwarded { .. }));
        let before = pipeline.pool().free_count();

        pipeline.queue().try_push(reading(2)).unwrap();
        let second = aggregator.run_cycle().await.unwrap();
        assert!(matches!(second, CycleOutcome::Dropped { payloads: 1, .. }));
        assert_eq!(pipeline.pool().free_count(), before);
        assert_eq!(pipeline.pool().snapshot(), PoolSnapshot { free: 2, filled: 1, in_flight: 0 });

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.batches_sealed, 2);
        assert_eq!(stats.batches_forwarded, 1);
        assert_eq!(stats.batches_dropped, 1);
        assert_eq!(stats.batch_payloads_lost, 1);
    }

    #[tokio::test]
    async fn oversized_batch_is_aborted() {
        // envelope plus two of these fill 300 bytes exactly; the third overflows
        let config = PipelineConfig::default()
            .max_message_size(300)
            .overhead_coefficient(1.0)
            .max_payloads_per_message(5);
        let pipeline = pipeline(config);

        for n in 0..3 {
            let mut builder = PayloadBuilder::new("abcdefghijklmnop", u64::MAX - n);
            for name in ["field_number_one", "field_number_two", "field_number_thr"] {
                builder = builder.uint(name, u64::MAX);
            }
            pipeline.queue().try_push(builder.build().unwrap()).unwrap();
        }

        let mut aggregator = Aggregator::new(pipeline.clone(), CancellationToken::new());
        let outcome = aggregator.run_cycle().await.unwrap();
        assert!(matches!(
            outcome,
            CycleOutcome::Aborted { payloads: 3, error: EncodeError::CapacityExceeded, .. }
        ));
        assert_eq!(pipeline.pool().snapshot(), PoolSnapshot { free: 3, filled: 0, in_flight: 0 });
        assert_eq!(pipeline.queue().len(), 0);
        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.batches_aborted, 1);
        assert_eq!(stats.batch_payloads_lost, 3);
    }

    #[tokio::test]
    async fn shutdown_mid_batch_returns_the_buffer() {
        let pipeline = pipeline(PipelineConfig::default());
        pipeline.queue().try_push(reading(1)).unwrap();

        let shutdown = CancellationToken::new();
        let mut aggregator = Aggregator::new(pipeline.clone(), shutdown.clone());
        let cycle = tokio::spawn(async move { aggregator.run_cycle().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        assert_eq!(cycle.await.unwrap().unwrap(), CycleOutcome::Stopped);
        assert_eq!(pipeline.pool().snapshot(), PoolSnapshot { free: 3, filled: 0, in_flight: 0 });
    }
}
