//! Foreign heap allocator.
//!
//! First-fit free list over linear memory with a bump region above it. Freed
//! blocks coalesce with their neighbours; a block that borders the bump
//! pointer is returned to it. Every allocation is registered with the
//! [`AllocationRegistry`] so fixed windows can detect use-after-free.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::MemoryError;
use crate::lifecycle::{LifecycleLog, LifecycleRecord, LogLevel};
use crate::linear::LinearMemory;
use crate::metrics::{MembraneMetrics, global_metrics};
use crate::registry::{AllocationRegistry, Ownership};

/// Lowest address handed out; keeps the null page unused.
pub const HEAP_BASE: usize = 0x100;

/// Allocation granule.
const GRANULE: usize = 8;

#[derive(Debug, Clone, Copy)]
struct AllocationRecord {
    /// Usable size requested by caller.
    size: usize,
    /// Size actually carved out of the heap.
    block: usize,
    ownership: Ownership,
}

#[derive(Debug)]
struct HeapState {
    /// Free blocks (start -> length), coalesced.
    free: BTreeMap<usize, usize>,
    active: HashMap<usize, AllocationRecord>,
    next_offset: usize,
    total_allocated: usize,
    log: LifecycleLog,
}

/// Allocator over a [`LinearMemory`].
#[derive(Debug)]
pub struct ForeignHeap {
    memory: Arc<LinearMemory>,
    registry: Arc<AllocationRegistry>,
    state: Mutex<HeapState>,
}

const fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

impl ForeignHeap {
    #[must_use]
    pub fn new(memory: Arc<LinearMemory>, registry: Arc<AllocationRegistry>) -> Self {
        Self::with_base(memory, registry, HEAP_BASE)
    }

    /// Heap whose first block starts at or above `base`.
    #[must_use]
    pub fn with_base(
        memory: Arc<LinearMemory>,
        registry: Arc<AllocationRegistry>,
        base: usize,
    ) -> Self {
        Self {
            memory,
            registry,
            state: Mutex::new(HeapState {
                free: BTreeMap::new(),
                active: HashMap::new(),
                next_offset: base.max(GRANULE),
                total_allocated: 0,
                log: LifecycleLog::default(),
            }),
        }
    }

    #[must_use]
    pub fn memory(&self) -> &Arc<LinearMemory> {
        &self.memory
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<AllocationRegistry> {
        &self.registry
    }

    /// Allocate `size` zeroed bytes aligned to `align`.
    pub fn allocate(
        &self,
        size: usize,
        align: usize,
        ownership: Ownership,
    ) -> Result<usize, MemoryError> {
        if align == 0 || !align.is_power_of_two() {
            return Err(MemoryError::InvalidAlignment { align });
        }
        let align = align.max(GRANULE);
        let block = round_up(size.max(1), GRANULE);
        let mut state = self.state.lock();

        let (address, path) = match take_first_fit(&mut state.free, block, align) {
            Some(address) => (address, "free_list"),
            None => {
                let address = round_up(state.next_offset, align);
                let end = address
                    .checked_add(block)
                    .ok_or(MemoryError::OutOfMemory { size })?;
                if let Err(err) = self.memory.ensure_size(end) {
                    state.log.record(
                        LogLevel::Error,
                        "allocate",
                        "alloc",
                        None,
                        Some(size),
                        "out_of_memory",
                        err.to_string(),
                    );
                    return Err(MemoryError::OutOfMemory { size });
                }
                let gap_start = state.next_offset;
                if address > gap_start {
                    insert_coalesced(&mut state.free, gap_start, address - gap_start);
                }
                state.next_offset = end;
                (address, "bump")
            }
        };

        self.memory.fill(address, block, 0)?;
        state.active.insert(
            address,
            AllocationRecord {
                size,
                block,
                ownership,
            },
        );
        state.total_allocated += size;
        self.registry.register(address, size, align, ownership);

        let metrics = global_metrics();
        MembraneMetrics::inc(&metrics.allocations);
        if ownership == Ownership::Fixed {
            MembraneMetrics::inc(&metrics.fixed_allocations);
        }
        state.log.record(
            LogLevel::Trace,
            "allocate",
            "alloc",
            Some(address),
            Some(size),
            "success",
            format!("path={path} align={align} ownership={ownership:?}"),
        );
        Ok(address)
    }

    /// Release the block starting at `address`. Null is a no-op.
    pub fn free(&self, address: usize) -> Result<(), MemoryError> {
        if address == 0 {
            return Ok(());
        }
        let mut state = self.state.lock();
        let Some(record) = state.active.remove(&address) else {
            state.log.record(
                LogLevel::Warn,
                "free",
                "free",
                Some(address),
                None,
                "unknown_allocation",
                "",
            );
            return Err(MemoryError::UnknownAllocation { address });
        };
        state.total_allocated -= record.size;
        insert_coalesced(&mut state.free, address, record.block);
        // Give a trailing free block back to the bump region.
        let top = state
            .free
            .iter()
            .next_back()
            .map(|(start, len)| (*start, *len));
        if let Some((start, len)) = top
            && start + len == state.next_offset
        {
            state.free.remove(&start);
            state.next_offset = start;
        }
        self.registry.mark_freed(address);
        MembraneMetrics::inc(&global_metrics().frees);
        state.log.record(
            LogLevel::Trace,
            "free",
            "free",
            Some(address),
            Some(record.size),
            "success",
            format!("ownership={:?}", record.ownership),
        );
        Ok(())
    }

    /// Requested size of the live block at `address`.
    #[must_use]
    pub fn size_of(&self, address: usize) -> Option<usize> {
        self.state.lock().active.get(&address).map(|r| r.size)
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    #[must_use]
    pub fn total_allocated(&self) -> usize {
        self.state.lock().total_allocated
    }

    /// Drains the heap's lifecycle records.
    pub fn drain_logs(&self) -> Vec<LifecycleRecord> {
        self.state.lock().log.drain()
    }
}

fn take_first_fit(free: &mut BTreeMap<usize, usize>, block: usize, align: usize) -> Option<usize> {
    let (start, len, address) = free.iter().find_map(|(&start, &len)| {
        let address = round_up(start, align);
        (address + block <= start + len).then_some((start, len, address))
    })?;
    free.remove(&start);
    if address > start {
        free.insert(start, address - start);
    }
    let tail = address + block;
    if tail < start + len {
        free.insert(tail, start + len - tail);
    }
    Some(address)
}

fn insert_coalesced(free: &mut BTreeMap<usize, usize>, mut start: usize, mut len: usize) {
    let prev = free
        .range(..start)
        .next_back()
        .map(|(s, l)| (*s, *l));
    if let Some((prev_start, prev_len)) = prev
        && prev_start + prev_len == start
    {
        free.remove(&prev_start);
        start = prev_start;
        len += prev_len;
    }
    if let Some(next_len) = free.remove(&(start + len)) {
        len += next_len;
    }
    free.insert(start, len);
}
