//! Allocation metadata registry.
//!
//! Every region handed out by the foreign heap is tracked here together with
//! its ownership tag and temporal state, so a pointer into freed memory can be
//! refused instead of read.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Who is responsible for the lifetime of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Shadow storage owned by the host for the duration of a call.
    Host,
    /// Foreign-owned, address-stable memory.
    Fixed,
}

/// Temporal state of a tracked region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemporalState {
    /// Region has no known metadata.
    Unknown,
    /// Region is currently live.
    Valid,
    /// Region has been freed.
    Freed,
}

/// Metadata for a tracked allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationMeta {
    /// Base address of the tracked allocation.
    pub base: usize,
    /// Allocation length in bytes.
    pub len: usize,
    /// Requested alignment.
    pub align: usize,
    /// Generation counter for temporal safety modeling.
    pub generation: u64,
    pub state: TemporalState,
    pub ownership: Ownership,
}

impl AllocationMeta {
    /// Returns true if `addr` lies inside `[base, base + len)`.
    #[must_use]
    pub fn contains(self, addr: usize) -> bool {
        let end = self.base.saturating_add(self.len.max(1));
        (self.base..end).contains(&addr)
    }

    /// Remaining bytes from `addr` to end of allocation.
    #[must_use]
    pub fn remaining(self, addr: usize) -> Option<usize> {
        if !self.contains(addr) {
            return None;
        }
        Some(self.base.saturating_add(self.len).saturating_sub(addr))
    }
}

/// Derived facts about an arbitrary address according to registry metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressFacts {
    pub addr: usize,
    pub temporal: TemporalState,
    /// Remaining in-bounds bytes if known.
    pub remaining: Option<usize>,
    pub ownership: Option<Ownership>,
}

impl AddressFacts {
    /// Address facts for unknown metadata.
    #[must_use]
    pub fn unknown(addr: usize) -> Self {
        Self {
            addr,
            temporal: TemporalState::Unknown,
            remaining: None,
            ownership: None,
        }
    }

    /// False only for addresses known to point into freed memory.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !matches!(self.temporal, TemporalState::Freed)
    }
}

/// Allocation metadata registry keyed by base address.
#[derive(Debug, Default)]
pub struct AllocationRegistry {
    allocations: RwLock<BTreeMap<usize, AllocationMeta>>,
    next_generation: AtomicU64,
}

impl AllocationRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh allocation and return its generation.
    pub fn register(&self, base: usize, len: usize, align: usize, ownership: Ownership) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = AllocationMeta {
            base,
            len,
            align,
            generation,
            state: TemporalState::Valid,
            ownership,
        };
        self.allocations.write().insert(base, entry);
        generation
    }

    /// Mark allocation as freed. Returns false when `base` was never registered.
    pub fn mark_freed(&self, base: usize) -> bool {
        match self.allocations.write().get_mut(&base) {
            Some(meta) => {
                meta.state = TemporalState::Freed;
                meta.generation = meta.generation.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Drop the record for `base` once the address range is recycled.
    pub fn forget(&self, base: usize) {
        self.allocations.write().remove(&base);
    }

    /// Exact lookup by base address.
    #[must_use]
    pub fn lookup(&self, base: usize) -> Option<AllocationMeta> {
        self.allocations.read().get(&base).copied()
    }

    /// Look up metadata containing `addr` if any.
    #[must_use]
    pub fn lookup_containing(&self, addr: usize) -> Option<AllocationMeta> {
        let allocations = self.allocations.read();
        allocations
            .range(..=addr)
            .next_back()
            .map(|(_, meta)| *meta)
            .filter(|meta| meta.contains(addr))
    }

    /// Classify an arbitrary address under registry facts.
    #[must_use]
    pub fn classify(&self, addr: usize) -> AddressFacts {
        if addr == 0 {
            return AddressFacts::unknown(0);
        }
        match self.lookup_containing(addr) {
            Some(meta) => AddressFacts {
                addr,
                temporal: meta.state,
                remaining: meta.remaining(addr),
                ownership: Some(meta.ownership),
            },
            None => AddressFacts::unknown(addr),
        }
    }

    /// Number of live allocations.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.allocations
            .read()
            .values()
            .filter(|meta| meta.state == TemporalState::Valid)
            .count()
    }
}
