//! Error Types for the Telemetry Pipeline
//!
//! ## Design Philosophy
//!
//! Errors on the hot path (queue handoff, encoding, payload construction) are
//! small `Copy` enums with no heap data, so they can be returned from
//! producer tasks and matched without allocation. Errors that only occur at
//! the edges of the system (transport, configuration, decoding) carry a
//! `String` and are only available with `std`.
//!
//! ## Recovery Policy
//!
//! No error in this module is fatal to the pipeline:
//!
//! | Error | Raised by | Response |
//! |-------|-----------|----------|
//! | `QueueError::Full` | producer push, filled-queue publish | drop the reading or batch, recycle, continue |
//! | `QueueError::Timeout` | bounded consumer waits | caller decides, usually retry |
//! | `EncodeError::CapacityExceeded` | encoder | abort the batch, recycle the buffer |
//! | `TransportError::Disconnected` | transport publish | reconnect, retry once, then drop |
//! | `TransportError::Failed` | transport publish | drop the message |
//!
//! ```rust
//! use sensorlink_core::errors::QueueError;
//!
//! fn on_push(result: Result<(), QueueError>) {
//!     match result {
//!         Ok(()) => {}
//!         Err(QueueError::Full) => {
//!             // Reading dropped, try again next period
//!         }
//!         Err(_) => {
//!             // Pipeline torn down
//!         }
//!     }
//! }
//! ```

use thiserror_no_std::Error;

/// Result type for payload construction
pub type PayloadResult<T> = Result<T, PayloadError>;

/// Result type for encoding operations
pub type EncodeResult<T> = Result<T, EncodeError>;

/// Errors from the bounded queues (payload queue, free and filled queues)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// No room became available before the timeout expired
    #[error("Queue full")]
    Full,

    /// Nothing arrived before the timeout expired
    #[error("Timed out waiting on queue")]
    Timeout,

    /// The other side of the queue is gone
    #[error("Queue closed")]
    Closed,
}

/// Errors while serializing payloads into a message buffer
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// The buffer ran out of space mid-write; its contents are unusable
    #[error("Encoded message exceeds buffer capacity")]
    CapacityExceeded,
}

/// Errors while building a sensor payload
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadError {
    /// Sensor or field name does not fit the inline storage
    #[error("Name of {len} bytes exceeds limit of {max}")]
    NameTooLong {
        /// Length of the rejected name in bytes
        len: usize,
        /// Maximum accepted length in bytes
        max: usize,
    },

    /// Payload already carries the maximum number of fields
    #[error("Payload already holds {max} fields")]
    TooManyFields {
        /// Field limit per payload
        max: usize,
    },
}

#[cfg(feature = "defmt")]
impl defmt::Format for QueueError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::Full => defmt::write!(fmt, "Queue full"),
            Self::Timeout => defmt::write!(fmt, "Queue timeout"),
            Self::Closed => defmt::write!(fmt, "Queue closed"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for EncodeError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::CapacityExceeded => defmt::write!(fmt, "Encode capacity exceeded"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for PayloadError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::NameTooLong { len, max } => defmt::write!(fmt, "Name {} > {} bytes", len, max),
            Self::TooManyFields { max } => defmt::write!(fmt, "More than {} fields", max),
        }
    }
}

/// Errors reported by a [`Transport`](crate::transport::Transport)
#[cfg(feature = "std")]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The link is down; a reconnect may help
    #[error("Transport not connected")]
    Disconnected,

    /// The operation did not complete in time
    #[error("Transport operation timed out")]
    Timeout,

    /// Any other failure; retrying the same message will not help
    #[error("Transport failure: {0}")]
    Failed(String),
}

#[cfg(feature = "std")]
impl TransportError {
    /// Whether this error means "not connected" and warrants a reconnect
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

/// Configuration errors
#[cfg(feature = "std")]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A field holds a value the pipeline cannot run with
    #[error("Invalid {field}: {reason}")]
    Invalid {
        /// Name of the offending field
        field: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },

    /// The configuration document could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Errors while decoding a batch message
#[cfg(feature = "std")]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The bytes are not well-formed CBOR
    #[error("Malformed CBOR: {0}")]
    Malformed(String),

    /// A required key is absent
    #[error("Missing key `{0}`")]
    MissingKey(&'static str),

    /// A value has a type the batch schema does not allow
    #[error("Unexpected value for `{key}`")]
    UnexpectedType {
        /// Key whose value was rejected
        key: &'static str,
    },
}

#[cfg(feature = "std")]
impl From<minicbor::decode::Error> for DecodeError {
    fn from(err: minicbor::decode::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}
