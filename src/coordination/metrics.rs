//! Per-key lock bookkeeping counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of a key's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LockMetrics {
    pub acquired: u64,
    pub timeout: u64,
    pub queued: u64,
    pub released: u64,
    pub version_conflict: u64,
}

impl LockMetrics {
    /// Fraction of acquisitions that had to wait first
    pub fn contention_ratio(&self) -> f64 {
        if self.acquired == 0 {
            0.0
        } else {
            self.queued as f64 / self.acquired as f64
        }
    }

    pub fn combine(self, other: Self) -> Self {
        Self {
            acquired: self.acquired + other.acquired,
            timeout: self.timeout + other.timeout,
            queued: self.queued + other.queued,
            released: self.released + other.released,
            version_conflict: self.version_conflict + other.version_conflict,
        }
    }
}

/// Live counters; monotonic until an administrative reset
#[derive(Debug, Default)]
pub(crate) struct MetricCounters {
    acquired: AtomicU64,
    timeout: AtomicU64,
    queued: AtomicU64,
    released: AtomicU64,
    version_conflict: AtomicU64,
}

impl MetricCounters {
    pub(crate) fn record_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeout.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_version_conflict(&self) {
        self.version_conflict.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> LockMetrics {
        LockMetrics {
            acquired: self.acquired.load(Ordering::Relaxed),
            timeout: self.timeout.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            version_conflict: self.version_conflict.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        self.acquired.store(0, Ordering::Relaxed);
        self.timeout.store(0, Ordering::Relaxed);
        self.queued.store(0, Ordering::Relaxed);
        self.released.store(0, Ordering::Relaxed);
        self.version_conflict.store(0, Ordering::Relaxed);
    }
}
