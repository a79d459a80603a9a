//! Buffer Sizes and Memory Constraints
//!
//! Defaults sized for a single-core microcontroller class device with a few
//! hundred kilobytes of RAM, publishing over Wi-Fi.

// ===== PAYLOAD SHAPE =====

/// Maximum sensor name length in bytes.
///
/// Names are stored inline in a `heapless::String`, so this bounds the
/// per-payload footprint regardless of what a producer passes in.
pub const SENSOR_NAME_MAX_LEN: usize = 16;

/// Maximum field name length in bytes.
pub const FIELD_NAME_MAX_LEN: usize = 16;

/// Maximum number of fields carried by one payload.
///
/// The widest producer (sound level) reports four summary fields.
pub const MAX_FIELDS_PER_PAYLOAD: usize = 5;

// ===== QUEUES =====

/// Default depth of the payload queue shared by all producers.
///
/// - 20 payloads × ~200 bytes = ~4KB
/// - Covers several seconds of aggregator stall at the default report rates
///
/// Source: room monitor firmware deployment
pub const DEFAULT_PAYLOAD_QUEUE_CAPACITY: usize = 20;

/// Default number of message buffers in the pool.
///
/// Three buffers lets one batch be encoded while another is in flight and a
/// third waits in the filled queue.
pub const DEFAULT_BUFFER_COUNT: usize = 3;

// ===== MESSAGE SIZING =====

/// Default maximum size of one published message in bytes.
///
/// Source: broker client outbound buffer size on the reference device
pub const DEFAULT_MAX_MESSAGE_SIZE_BYTES: usize = 2048;

/// Default headroom multiplier applied on top of the message size.
///
/// Accounts for CBOR framing overhead (keys, container headers, breaks).
pub const DEFAULT_OVERHEAD_COEFFICIENT: f32 = 1.2;

/// Default number of payloads sealed into one batch message.
pub const DEFAULT_MAX_PAYLOADS_PER_MESSAGE: usize = 15;
