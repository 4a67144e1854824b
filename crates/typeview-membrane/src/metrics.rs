//! Atomic counters for membrane observability.
//!
//! All counters use relaxed ordering. They are diagnostic only and never
//! synchronize anything.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global membrane operation counters.
pub struct MembraneMetrics {
    /// Foreign heap allocations.
    pub allocations: AtomicU64,
    /// Foreign heap frees.
    pub frees: AtomicU64,
    /// Allocations handed out as fixed (foreign-owned) memory.
    pub fixed_allocations: AtomicU64,
    /// Fixed windows re-resolved after linear memory was invalidated.
    pub restores: AtomicU64,
    /// Linear memory growth events.
    pub grows: AtomicU64,
    /// Block copies performed between windows.
    pub block_copies: AtomicU64,
    /// Block resets (zero fills) performed on windows.
    pub block_resets: AtomicU64,
    /// Call contexts opened.
    pub contexts_opened: AtomicU64,
    /// Call contexts closed.
    pub contexts_closed: AtomicU64,
    /// Objects pinned for the duration of a call.
    pub pins: AtomicU64,
    /// Shadow copies placed in foreign memory.
    pub shadow_copies: AtomicU64,
    /// Foreign invocations.
    pub calls: AtomicU64,
    /// Invocations deferred until the module became ready.
    pub deferred_calls: AtomicU64,
}

impl MembraneMetrics {
    /// All counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            fixed_allocations: AtomicU64::new(0),
            restores: AtomicU64::new(0),
            grows: AtomicU64::new(0),
            block_copies: AtomicU64::new(0),
            block_resets: AtomicU64::new(0),
            contexts_opened: AtomicU64::new(0),
            contexts_closed: AtomicU64::new(0),
            pins: AtomicU64::new(0),
            shadow_copies: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            deferred_calls: AtomicU64::new(0),
        }
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allocations: Self::get(&self.allocations),
            frees: Self::get(&self.frees),
            fixed_allocations: Self::get(&self.fixed_allocations),
            restores: Self::get(&self.restores),
            grows: Self::get(&self.grows),
            block_copies: Self::get(&self.block_copies),
            block_resets: Self::get(&self.block_resets),
            contexts_opened: Self::get(&self.contexts_opened),
            contexts_closed: Self::get(&self.contexts_closed),
            pins: Self::get(&self.pins),
            shadow_copies: Self::get(&self.shadow_copies),
            calls: Self::get(&self.calls),
            deferred_calls: Self::get(&self.deferred_calls),
        }
    }
}

impl Default for MembraneMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all membrane counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub allocations: u64,
    pub frees: u64,
    pub fixed_allocations: u64,
    pub restores: u64,
    pub grows: u64,
    pub block_copies: u64,
    pub block_resets: u64,
    pub contexts_opened: u64,
    pub contexts_closed: u64,
    pub pins: u64,
    pub shadow_copies: u64,
    pub calls: u64,
    pub deferred_calls: u64,
}

static GLOBAL_METRICS: MembraneMetrics = MembraneMetrics::new();

/// Process-wide counters shared by every heap, window and call.
#[must_use]
pub fn global_metrics() -> &'static MembraneMetrics {
    &GLOBAL_METRICS
}
