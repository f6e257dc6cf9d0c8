//! Acquisition counters

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

#[derive(Default)]
struct Counters {
    interrupts: AtomicU64,
    captures: AtomicU64,
    published: AtomicU64,
    suppressed: AtomicU64,
    bus_errors: AtomicU64,
    repeated: AtomicU64,
    stale: AtomicU64,
    timeouts: AtomicU64,
}

/// Lock-free counters shared by the interrupt path, the worker and the gate.
/// Every increment is mirrored to the `metrics` facade.
#[derive(Default)]
pub struct AcquisitionStats {
    counters: CachePadded<Counters>,
}

/// Point-in-time copy of [`AcquisitionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub interrupts: u64,
    pub captures: u64,
    pub published: u64,
    pub suppressed: u64,
    pub bus_errors: u64,
    pub repeated: u64,
    pub stale: u64,
    pub timeouts: u64,
}

impl AcquisitionStats {
    pub fn record_interrupt(&self) {
        self.counters.interrupts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("touchframe_interrupts").increment(1);
    }

    pub fn record_capture(&self) {
        self.counters.captures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("touchframe_frames_published").increment(1);
    }

    pub fn record_suppressed(&self) {
        self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("touchframe_frames_suppressed").increment(1);
    }

    pub fn record_bus_error(&self) {
        self.counters.bus_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("touchframe_bus_errors").increment(1);
    }

    pub fn record_repeated(&self) {
        self.counters.repeated.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("touchframe_frames_repeated").increment(1);
    }

    pub fn record_stale(&self) {
        self.counters.stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("touchframe_timeouts").increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        StatsSnapshot {
            interrupts: c.interrupts.load(Ordering::Relaxed),
            captures: c.captures.load(Ordering::Relaxed),
            published: c.published.load(Ordering::Relaxed),
            suppressed: c.suppressed.load(Ordering::Relaxed),
            bus_errors: c.bus_errors.load(Ordering::Relaxed),
            repeated: c.repeated.load(Ordering::Relaxed),
            stale: c.stale.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
        }
    }
}
