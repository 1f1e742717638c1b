//! Capture pipeline statistics
//!
//! Single-writer (the processing loop), multi-reader counters. Atomic
//! operations only; health-check code may snapshot concurrently while the
//! loop increments.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use pulse_common::RING_CAPACITY_BYTES;

/// Monotonically increasing pipeline counters.
#[derive(Debug, Default)]
pub struct CaptureStats {
    events_processed: AtomicU64,
    events_dropped: AtomicU64,
    processing_errors: AtomicU64,
    programs_attached: AtomicUsize,
}

impl CaptureStats {
    /// An event made it through decode, filter and the output channel.
    pub fn record_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// An event was discarded at any stage: decode failure, filter
    /// rejection, or a full output channel.
    pub fn record_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// A structural processing problem that did not map to a single record.
    pub fn record_error(&self) {
        self.processing_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_programs_attached(&self, count: usize) {
        self.programs_attached.store(count, Ordering::Relaxed);
    }

    /// Point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            processing_errors: self.processing_errors.load(Ordering::Relaxed),
            programs_attached: self.programs_attached.load(Ordering::Relaxed),
            ring_capacity_bytes: RING_CAPACITY_BYTES,
        }
    }
}

/// A consistent-enough view of the counters at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub events_processed: u64,
    pub events_dropped: u64,
    pub processing_errors: u64,
    pub programs_attached: usize,
    /// Static transport capacity, for rate-of-drop context.
    pub ring_capacity_bytes: u32,
}

/// Kernel-side per-CPU counters summed across CPUs. Read on demand from the
/// `COUNTERS` map; complements the userspace counters with what the kernel
/// programs saw before any userspace processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KernelCounters {
    pub events_processed: u64,
    pub events_dropped: u64,
    pub exec_calls: u64,
    pub connect_calls: u64,
    pub http_requests: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_increments() {
        let stats = CaptureStats::default();
        stats.record_processed();
        stats.record_processed();
        stats.record_dropped();
        stats.record_error();
        stats.set_programs_attached(4);

        let snap = stats.snapshot();
        assert_eq!(snap.events_processed, 2);
        assert_eq!(snap.events_dropped, 1);
        assert_eq!(snap.processing_errors, 1);
        assert_eq!(snap.programs_attached, 4);
        assert_eq!(snap.ring_capacity_bytes, RING_CAPACITY_BYTES);
    }

    #[test]
    fn test_snapshot_is_point_in_time() {
        let stats = CaptureStats::default();
        let before = stats.snapshot();
        stats.record_dropped();
        let after = stats.snapshot();
        assert_eq!(before.events_dropped, 0);
        assert_eq!(after.events_dropped, 1);
    }
}
