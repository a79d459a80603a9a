//! Time management for producers
//!
//! Payload timestamps are microseconds. A device boots without wall-clock
//! time, so timestamps start boot-relative and become UTC once network time
//! is known:
//!
//! ```text
//! timestamp_us = uptime_us + utc_offset_us
//!                            └── 0 until the first time sync
//! ```
//!
//! [`BootClock`] implements that, [`FixedTime`] is for tests, and
//! [`ReportSchedule`] decides when a producer's report period has elapsed.

use crate::constants::US_PER_MS;

/// Timestamp in microseconds since epoch (or device boot before time sync)
pub type TimestampUs = u64;

/// Source of time for producers
pub trait TimeSource {
    /// Get current timestamp in microseconds
    fn now_us(&self) -> TimestampUs;

    /// Check if this source provides wall clock time (vs boot-relative)
    fn is_wall_clock(&self) -> bool;
}

/// Fixed time source for testing
#[derive(Debug, Clone)]
pub struct FixedTime {
    timestamp: TimestampUs,
}

impl FixedTime {
    /// Start at `timestamp` microseconds
    pub fn new(timestamp: TimestampUs) -> Self {
        Self { timestamp }
    }

    /// Jump to `timestamp`
    pub fn set(&mut self, timestamp: TimestampUs) {
        self.timestamp = timestamp;
    }

    /// Move forward by `ms` milliseconds
    pub fn advance_ms(&mut self, ms: u64) {
        self.timestamp += ms * US_PER_MS;
    }
}

impl TimeSource for FixedTime {
    fn now_us(&self) -> TimestampUs {
        self.timestamp
    }

    fn is_wall_clock(&self) -> bool {
        false
    }
}

/// Monotonic uptime plus a UTC offset learned at time sync
#[cfg(feature = "std")]
#[derive(Debug)]
pub struct BootClock {
    boot: std::time::Instant,
    utc_offset_us: core::sync::atomic::AtomicU64,
    synced: core::sync::atomic::AtomicBool,
}

#[cfg(feature = "std")]
impl BootClock {
    /// Start counting from now
    pub fn new() -> Self {
        Self {
            boot: std::time::Instant::now(),
            utc_offset_us: core::sync::atomic::AtomicU64::new(0),
            synced: core::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Microseconds since the clock was created
    pub fn uptime_us(&self) -> TimestampUs {
        self.boot.elapsed().as_micros() as TimestampUs
    }

    /// Record the wall-clock time (microseconds since epoch) observed right now
    pub fn sync_to(&self, utc_now_us: TimestampUs) {
        use core::sync::atomic::Ordering;

        let offset = utc_now_us.saturating_sub(self.uptime_us());
        self.utc_offset_us.store(offset, Ordering::Relaxed);
        self.synced.store(true, Ordering::Release);
    }

    /// Sync against the host's system clock
    pub fn sync_to_system(&self) {
        use std::time::{SystemTime, UNIX_EPOCH};

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as TimestampUs;
        self.sync_to(now);
    }

    /// Offset added to uptime, zero before the first sync
    pub fn utc_offset_us(&self) -> TimestampUs {
        self.utc_offset_us.load(core::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(feature = "std")]
impl Default for BootClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl TimeSource for BootClock {
    fn now_us(&self) -> TimestampUs {
        self.uptime_us() + self.utc_offset_us()
    }

    fn is_wall_clock(&self) -> bool {
        self.synced.load(core::sync::atomic::Ordering::Acquire)
    }
}

/// Tracks when a producer last reported
///
/// The first check is always due; afterwards a report is due once at least
/// `period` has passed since the previous one.
#[derive(Debug, Clone)]
pub struct ReportSchedule {
    period_us: u64,
    last_us: Option<TimestampUs>,
}

impl ReportSchedule {
    /// Report every `period_ms` milliseconds
    pub fn every_ms(period_ms: u64) -> Self {
        Self {
            period_us: period_ms * US_PER_MS,
            last_us: None,
        }
    }

    /// Whether a report is due at `now_us`; marks it as done if so
    pub fn due(&mut self, now_us: TimestampUs) -> bool {
        match self.last_us {
            Some(last) if now_us.saturating_sub(last) < self.period_us => false,
            _ => {
                self.last_us = Some(now_us);
                true
            }
        }
    }
}
