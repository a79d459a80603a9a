//! Time-Related Constants
//!
//! Timeouts for the blocking points of the pipeline and the report periods
//! of the reference room-monitor producers.

// ===== TIME UNIT CONVERSIONS =====

/// Microseconds per millisecond.
pub const US_PER_MS: u64 = 1000;

/// Microseconds per second.
pub const US_PER_SECOND: u64 = 1_000_000;

// ===== PIPELINE TIMEOUTS =====

/// How long a producer waits for room in the payload queue (milliseconds).
///
/// A producer that times out drops its reading and carries on with the next
/// period.
pub const DEFAULT_PRODUCER_TIMEOUT_MS: u64 = 1000;

/// How long the aggregator waits for room in the filled queue (milliseconds).
///
/// On expiry the whole sealed batch is dropped and its buffer recycled.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 1000;

/// How long the sender waits for the transport to come back (milliseconds).
///
/// Matches the initial broker connect timeout of the reference firmware.
pub const DEFAULT_RECONNECT_TIMEOUT_MS: u64 = 15_000;

// ===== REPORT PERIODS =====

/// Sound level summary report period (milliseconds).
pub const SOUND_REPORT_PERIOD_MS: u64 = 4000;

/// Ambient light summary report period (milliseconds).
pub const LIGHT_REPORT_PERIOD_MS: u64 = 2800;

/// Network time report period (milliseconds).
pub const SNTP_REPORT_PERIOD_MS: u64 = 30_000;
