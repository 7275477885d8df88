// Correlator metrics
//
// Counters are atomics so a handle can be read from another task while the
// owning task keeps ingesting.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Reason an update was discarded before it reached the ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Transport status, kind or cardinality was wrong
    Rejected,

    /// Timestamp carried the bad-fiducial marker
    InvalidTick,

    /// Same source already wrote this slot for this second
    Duplicate,
}

/// Counters describing correlator activity
#[derive(Debug, Default)]
pub struct CorrelatorMetrics {
    /// Updates recorded into the ring
    pub updates_accepted: AtomicU64,

    /// Updates rejected by validation
    pub updates_rejected: AtomicU64,

    /// Updates carrying the invalid tick marker
    pub invalid_ticks: AtomicU64,

    /// Duplicate deliveries that invalidated a slot
    pub duplicates: AtomicU64,

    /// Slots taken over by a newer timestamp
    pub slot_resets: AtomicU64,

    /// Slots filled from a continuous source's last value
    pub slots_backfilled: AtomicU64,

    /// Rows handed to the sink
    pub rows_emitted: AtomicU64,

    /// Occupied slots that aged out without completing
    pub slots_dropped: AtomicU64,
}

impl CorrelatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_accepted(&self) {
        self.updates_accepted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_drop(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Rejected => &self.updates_rejected,
            DropReason::InvalidTick => &self.invalid_ticks,
            DropReason::Duplicate => &self.duplicates,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_slot_reset(&self) {
        self.slot_resets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_backfill(&self, slots: u64) {
        if slots > 0 {
            self.slots_backfilled.fetch_add(slots, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_row(&self) {
        self.rows_emitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_slot_dropped(&self) {
        self.slots_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            updates_accepted: self.updates_accepted.load(Ordering::Relaxed),
            updates_rejected: self.updates_rejected.load(Ordering::Relaxed),
            invalid_ticks: self.invalid_ticks.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            slot_resets: self.slot_resets.load(Ordering::Relaxed),
            slots_backfilled: self.slots_backfilled.load(Ordering::Relaxed),
            rows_emitted: self.rows_emitted.load(Ordering::Relaxed),
            slots_dropped: self.slots_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of correlator metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub updates_accepted: u64,
    pub updates_rejected: u64,
    pub invalid_ticks: u64,
    pub duplicates: u64,
    pub slot_resets: u64,
    pub slots_backfilled: u64,
    pub rows_emitted: u64,
    pub slots_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_reasons_hit_separate_counters() {
        let metrics = CorrelatorMetrics::new();
        metrics.record_drop(DropReason::Rejected);
        metrics.record_drop(DropReason::Duplicate);
        metrics.record_drop(DropReason::Duplicate);
        metrics.record_drop(DropReason::InvalidTick);

        let snap = metrics.snapshot();
        assert_eq!(snap.updates_rejected, 1);
        assert_eq!(snap.duplicates, 2);
        assert_eq!(snap.invalid_ticks, 1);
        assert_eq!(snap.updates_accepted, 0);
    }

    #[test]
    fn test_backfill_ignores_zero() {
        let metrics = CorrelatorMetrics::new();
        metrics.record_backfill(0);
        metrics.record_backfill(5);
        assert_eq!(metrics.snapshot().slots_backfilled, 5);
    }
}
