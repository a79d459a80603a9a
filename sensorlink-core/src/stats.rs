//! Pipeline counters
//!
//! Lock-free counters shared by every task of a pipeline. Relaxed ordering
//! throughout: the counters are for monitoring, nothing synchronizes on them.

use core::sync::atomic::{AtomicU64, Ordering};

/// Running totals for one pipeline
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Readings producers could not enqueue
    pub payloads_dropped: AtomicU64,
    /// Batches closed at the payload limit
    pub batches_sealed: AtomicU64,
    /// Sealed batches handed to the sender
    pub batches_forwarded: AtomicU64,
    /// Sealed batches dropped because the filled queue stayed full
    pub batches_dropped: AtomicU64,
    /// Batches abandoned because encoding failed
    pub batches_aborted: AtomicU64,
    /// Payloads lost inside dropped or aborted batches
    pub batch_payloads_lost: AtomicU64,
    /// Messages the transport accepted
    pub messages_published: AtomicU64,
    /// Messages given up on
    pub messages_failed: AtomicU64,
    /// Reconnects requested by the sender
    pub reconnects: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// See [`PipelineStats::payloads_dropped`]
    pub payloads_dropped: u64,
    /// See [`PipelineStats::batches_sealed`]
    pub batches_sealed: u64,
    /// See [`PipelineStats::batches_forwarded`]
    pub batches_forwarded: u64,
    /// See [`PipelineStats::batches_dropped`]
    pub batches_dropped: u64,
    /// See [`PipelineStats::batches_aborted`]
    pub batches_aborted: u64,
    /// See [`PipelineStats::batch_payloads_lost`]
    pub batch_payloads_lost: u64,
    /// See [`PipelineStats::messages_published`]
    pub messages_published: u64,
    /// See [`PipelineStats::messages_failed`]
    pub messages_failed: u64,
    /// See [`PipelineStats::reconnects`]
    pub reconnects: u64,
}

impl PipelineStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Copy all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            payloads_dropped: get(&self.payloads_dropped),
            batches_sealed: get(&self.batches_sealed),
            batches_forwarded: get(&self.batches_forwarded),
            batches_dropped: get(&self.batches_dropped),
            batches_aborted: get(&self.batches_aborted),
            batch_payloads_lost: get(&self.batch_payloads_lost),
            messages_published: get(&self.messages_published),
            messages_failed: get(&self.messages_failed),
            reconnects: get(&self.reconnects),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_copies_counters() {
        let stats = PipelineStats::default();
        PipelineStats::bump(&stats.batches_sealed);
        PipelineStats::bump(&stats.batches_sealed);
        PipelineStats::add(&stats.batch_payloads_lost, 15);

        let snap = stats.snapshot();
        assert_eq!(snap.batches_sealed, 2);
        assert_eq!(snap.batch_payloads_lost, 15);
        assert_eq!(snap.messages_published, 0);
    }
}
