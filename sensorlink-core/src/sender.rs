//! Message Sender
//!
//! Drains the filled queue and publishes each sealed batch through the
//! [`Transport`]. Whatever happens to the publish, the buffer goes back to
//! the free queue afterwards.
//!
//! ```text
//!        consume_filled         publish
//!  Idle ───────────────→ Sending ───────→ Ok ──────────────────────┐
//!   ↑                      │                                        │
//!   │                      └─→ Disconnected → reconnect → publish ──┤
//!   │                      └─→ other error ─────────────────────────┤
//!   │                                                  release_free │
//!   └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! A disconnect triggers one reconnect and one retry per configured
//! `publish_retries`; after that the message is dropped. There is no
//! persistent retry queue.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::errors::{QueueError, TransportError};
use crate::pipeline::Pipeline;
use crate::stats::PipelineStats;
use crate::transport::{MessageId, Transport};

/// Where the sender is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// Waiting for a sealed batch
    Idle,
    /// Publishing a batch
    Sending,
}

/// Result of one send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Accepted on the first attempt
    Delivered {
        /// Buffer that carried the batch
        buffer_id: usize,
        /// Identifier assigned by the transport
        message_id: MessageId,
    },
    /// Accepted after reconnecting
    DeliveredAfterReconnect {
        /// Buffer that carried the batch
        buffer_id: usize,
        /// Identifier assigned by the transport
        message_id: MessageId,
        /// Reconnects it took
        reconnects: u8,
    },
    /// Given up on
    Dropped {
        /// Buffer that carried the batch
        buffer_id: usize,
        /// Last error from the transport
        error: TransportError,
    },
    /// Shutdown was requested
    Stopped,
}

/// Publishes sealed batches through a transport
pub struct Sender<T> {
    pipeline: Arc<Pipeline>,
    transport: T,
    shutdown: CancellationToken,
    state: SenderState,
}

impl<T: Transport> Sender<T> {
    /// Create a sender for `pipeline` publishing through `transport`
    pub fn new(pipeline: Arc<Pipeline>, transport: T, shutdown: CancellationToken) -> Self {
        Self {
            pipeline,
            transport,
            shutdown,
            state: SenderState::Idle,
        }
    }

    /// Current state
    pub fn state(&self) -> SenderState {
        self.state
    }

    /// The transport in use
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send until shutdown
    pub async fn run(mut self) {
        info!("Sender started on topic {}", self.pipeline.config().data_topic);

        loop {
            match self.run_once().await {
                Ok(SendOutcome::Stopped) => break,
                Ok(_) => {}
                Err(err) => {
                    error!("Sender stopping: {}", err);
                    break;
                }
            }
        }

        info!("Sender stopped");
    }

    /// Take one sealed batch, publish it, recycle its buffer
    ///
    /// Only fails if the filled queue was closed.
    pub async fn run_once(&mut self) -> Result<SendOutcome, QueueError> {
        self.state = SenderState::Idle;
        let pipeline = Arc::clone(&self.pipeline);
        let pool = pipeline.pool();

        let buffer = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Ok(SendOutcome::Stopped),
            consumed = pool.consume_filled(None) => consumed?,
        };

        self.state = SenderState::Sending;
        let buffer_id = buffer.id();
        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => SendOutcome::Stopped,
            outcome = deliver(&pipeline, &self.transport, buffer.as_bytes(), buffer_id) => outcome,
        };

        pool.release_free(buffer);
        self.state = SenderState::Idle;
        Ok(outcome)
    }
}

async fn deliver<T: Transport>(
    pipeline: &Pipeline,
    transport: &T,
    message: &[u8],
    buffer_id: usize,
) -> SendOutcome {
    let config = pipeline.config();
    let stats = pipeline.stats();
    let publish = || transport.publish(&config.data_topic, message, config.qos, config.retain);

    let mut result = publish().await;
    let mut reconnects = 0u8;

    while let Err(err) = &result {
        if !err.is_disconnected() || reconnects >= config.publish_retries {
            break;
        }
        reconnects += 1;
        PipelineStats::bump(&stats.reconnects);
        warn!(
            "Transport {:?}, reconnecting before retry {} of buffer {}",
            transport.state(),
            reconnects,
            buffer_id
        );
        if let Err(err) = transport.reconnect(config.reconnect_timeout()).await {
            warn!("Reconnect failed: {}", err);
        }
        result = publish().await;
    }

    match result {
        Ok(message_id) if reconnects == 0 => {
            PipelineStats::bump(&stats.messages_published);
            debug!("Published {} bytes from buffer {} as {}", message.len(), buffer_id, message_id);
            SendOutcome::Delivered { buffer_id, message_id }
        }
        Ok(message_id) => {
            PipelineStats::bump(&stats.messages_published);
            info!("Published buffer {} as {} after reconnecting", buffer_id, message_id);
            SendOutcome::DeliveredAfterReconnect {
                buffer_id,
                message_id,
                reconnects,
            }
        }
        Err(error) => {
            PipelineStats::bump(&stats.messages_failed);
            warn!("Dropping message in buffer {}: {}", buffer_id, error);
            SendOutcome::Dropped { buffer_id, error }
        }
    }
}
