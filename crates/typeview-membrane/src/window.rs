//! Byte windows: the storage handles views read and write through.
//!
//! A window is either host-owned (a private buffer, exclusively owned by the
//! view tree that created it) or fixed (a range of foreign linear memory,
//! address-stable, owned by the foreign side). Fixed windows never hold bytes
//! directly. Every access re-validates the cached linear memory buffer and
//! transparently re-resolves it from `(memory, address, len)` after growth.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::copy::{block_copy, block_fill, copy_within};
use crate::error::MemoryError;
use crate::linear::{LinearMemory, MemoryBuffer};
use crate::metrics::{MembraneMetrics, global_metrics};
use crate::registry::{AllocationRegistry, TemporalState};

/// Host-owned byte storage.
#[derive(Debug)]
pub struct HostBuffer {
    bytes: RwLock<Vec<u8>>,
    align: usize,
}

impl HostBuffer {
    #[must_use]
    pub fn align(&self) -> usize {
        self.align
    }
}

/// A foreign-owned region of linear memory.
#[derive(Debug)]
pub struct FixedRegion {
    memory: Arc<LinearMemory>,
    registry: Option<Arc<AllocationRegistry>>,
    /// Generation of the allocation the region was opened over.
    generation: Option<u64>,
    address: usize,
    len: usize,
    cached: Mutex<Arc<MemoryBuffer>>,
}

impl FixedRegion {
    fn new(
        memory: Arc<LinearMemory>,
        registry: Option<Arc<AllocationRegistry>>,
        address: usize,
        len: usize,
    ) -> Self {
        let cached = Mutex::new(memory.buffer());
        let generation = registry
            .as_ref()
            .and_then(|registry| registry.lookup_containing(address))
            .map(|meta| meta.generation);
        Self {
            memory,
            registry,
            generation,
            address,
            len,
            cached,
        }
    }

    #[must_use]
    pub fn address(&self) -> usize {
        self.address
    }

    #[must_use]
    pub fn memory(&self) -> &Arc<LinearMemory> {
        &self.memory
    }

    /// False once the allocation under the region was freed, even if its
    /// address has since been handed out again.
    #[must_use]
    pub fn is_live(&self) -> bool {
        let Some(registry) = &self.registry else {
            return true;
        };
        match (registry.lookup_containing(self.address), self.generation) {
            (Some(meta), _) if meta.state == TemporalState::Freed => false,
            (Some(meta), Some(generation)) => meta.generation == generation,
            (None, Some(_)) => false,
            (_, None) => true,
        }
    }

    /// Live buffer backing this region, re-resolved if the cached one went stale.
    pub fn resolve(&self) -> Result<Arc<MemoryBuffer>, MemoryError> {
        if !self.is_live() {
            return Err(MemoryError::Freed {
                address: self.address,
            });
        }
        let mut cached = self.cached.lock();
        if cached.generation() != self.memory.generation() || cached.is_detached() {
            *cached = self.memory.buffer();
            MembraneMetrics::inc(&global_metrics().restores);
        }
        let size = cached.len();
        match self.address.checked_add(self.len) {
            Some(end) if end <= size => Ok(Arc::clone(&cached)),
            _ => Err(MemoryError::OutOfBounds {
                address: self.address,
                len: self.len,
                size,
            }),
        }
    }
}

#[derive(Debug, Clone)]
enum Backing {
    Host(Arc<HostBuffer>),
    Fixed(Arc<FixedRegion>),
}

/// A `(storage, offset, len)` window.
#[derive(Debug, Clone)]
pub struct ByteWindow {
    backing: Backing,
    offset: usize,
    len: usize,
}

impl ByteWindow {
    /// Fresh zeroed host-owned window.
    #[must_use]
    pub fn host(len: usize, align: usize) -> Self {
        Self::host_from(vec![0; len], align)
    }

    /// Host-owned window taking ownership of `bytes`.
    #[must_use]
    pub fn host_from(bytes: Vec<u8>, align: usize) -> Self {
        let len = bytes.len();
        Self {
            backing: Backing::Host(Arc::new(HostBuffer {
                bytes: RwLock::new(bytes),
                align: align.max(1),
            })),
            offset: 0,
            len,
        }
    }

    /// Window over foreign memory at `address`.
    #[must_use]
    pub fn fixed(memory: Arc<LinearMemory>, address: usize, len: usize) -> Self {
        Self::fixed_region(FixedRegion::new(memory, None, address, len))
    }

    /// Window over foreign memory whose liveness is checked against `registry`.
    #[must_use]
    pub fn fixed_tracked(
        memory: Arc<LinearMemory>,
        registry: Arc<AllocationRegistry>,
        address: usize,
        len: usize,
    ) -> Self {
        Self::fixed_region(FixedRegion::new(memory, Some(registry), address, len))
    }

    fn fixed_region(region: FixedRegion) -> Self {
        let len = region.len;
        Self {
            backing: Backing::Fixed(Arc::new(region)),
            offset: 0,
            len,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn is_fixed(&self) -> bool {
        matches!(self.backing, Backing::Fixed(_))
    }

    /// Host storage is always live; fixed storage until its allocation is freed.
    #[must_use]
    pub fn is_live(&self) -> bool {
        match &self.backing {
            Backing::Host(_) => true,
            Backing::Fixed(region) => region.is_live(),
        }
    }

    /// Foreign address of the first byte, for fixed windows.
    #[must_use]
    pub fn address(&self) -> Option<usize> {
        match &self.backing {
            Backing::Host(_) => None,
            Backing::Fixed(region) => Some(region.address + self.offset),
        }
    }

    /// Alignment the storage was requested with.
    #[must_use]
    pub fn align(&self) -> usize {
        match &self.backing {
            Backing::Host(buffer) => buffer.align,
            Backing::Fixed(region) => {
                let address = region.address + self.offset;
                if address == 0 {
                    1
                } else {
                    1 << address.trailing_zeros().min(12)
                }
            }
        }
    }

    /// Stable identity of the first byte: storage key plus absolute offset.
    ///
    /// Two windows over the same bytes report equal identities, whichever way
    /// they were obtained.
    #[must_use]
    pub fn identity(&self) -> (usize, usize) {
        match &self.backing {
            Backing::Host(buffer) => (Arc::as_ptr(buffer) as usize, self.offset),
            Backing::Fixed(region) => (
                Arc::as_ptr(&region.memory) as usize,
                region.address + self.offset,
            ),
        }
    }

    /// True when both windows address the same underlying storage.
    #[must_use]
    pub fn same_storage(&self, other: &Self) -> bool {
        match (&self.backing, &other.backing) {
            (Backing::Host(a), Backing::Host(b)) => Arc::ptr_eq(a, b),
            (Backing::Fixed(a), Backing::Fixed(b)) => Arc::ptr_eq(&a.memory, &b.memory),
            _ => false,
        }
    }

    /// Narrower window at `offset..offset + len`.
    pub fn sub(&self, offset: usize, len: usize) -> Result<Self, MemoryError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(Self {
                backing: self.backing.clone(),
                offset: self.offset + offset,
                len,
            }),
            _ => Err(MemoryError::WindowOverrun {
                offset,
                sub_len: len,
                len: self.len,
            }),
        }
    }

    /// Run `f` over the window's bytes.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, MemoryError> {
        match &self.backing {
            Backing::Host(buffer) => {
                let bytes = buffer.bytes.read();
                Ok(f(&bytes[self.offset..self.offset + self.len]))
            }
            Backing::Fixed(region) => {
                let live = region.resolve()?;
                let bytes = live.bytes.read();
                let start = region.address + self.offset;
                Ok(f(&bytes[start..start + self.len]))
            }
        }
    }

    /// Run `f` over the window's bytes mutably.
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, MemoryError> {
        match &self.backing {
            Backing::Host(buffer) => {
                let mut bytes = buffer.bytes.write();
                Ok(f(&mut bytes[self.offset..self.offset + self.len]))
            }
            Backing::Fixed(region) => {
                let live = region.resolve()?;
                let mut bytes = live.bytes.write();
                let start = region.address + self.offset;
                Ok(f(&mut bytes[start..start + self.len]))
            }
        }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, MemoryError> {
        self.read(<[u8]>::to_vec)
    }

    /// Copy `src` into this window, clamped to the shorter of the two.
    ///
    /// Copies between windows on the same storage happen under a single lock
    /// and tolerate overlap; copying a window onto itself is a no-op.
    pub fn copy_from(&self, src: &Self) -> Result<usize, MemoryError> {
        MembraneMetrics::inc(&global_metrics().block_copies);
        if self.same_storage(src) {
            let (_, dest_at) = self.identity();
            let (_, src_at) = src.identity();
            let len = self.len.min(src.len);
            return match &self.backing {
                Backing::Host(buffer) => {
                    let mut bytes = buffer.bytes.write();
                    Ok(copy_within(&mut bytes, src_at, dest_at, len))
                }
                Backing::Fixed(region) => {
                    let live = region.resolve()?;
                    if let Backing::Fixed(src_region) = &src.backing {
                        src_region.resolve()?;
                    }
                    let mut bytes = live.bytes.write();
                    Ok(copy_within(&mut bytes, src_at, dest_at, len))
                }
            };
        }
        let data = src.to_vec()?;
        self.write(|dest| block_copy(dest, &data))
    }

    /// Copy raw bytes into the window, clamped to its length.
    pub fn copy_from_slice(&self, data: &[u8]) -> Result<usize, MemoryError> {
        MembraneMetrics::inc(&global_metrics().block_copies);
        self.write(|dest| block_copy(dest, data))
    }

    /// Zero the window.
    pub fn reset(&self) -> Result<(), MemoryError> {
        self.fill(0)
    }

    pub fn fill(&self, value: u8) -> Result<(), MemoryError> {
        MembraneMetrics::inc(&global_metrics().block_resets);
        self.write(|dest| {
            block_fill(dest, value);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Ownership;

    #[test]
    fn host_window_reads_and_writes() {
        let window = ByteWindow::host(8, 4);
        window.write(|b| b[2] = 7).expect("write");
        assert_eq!(window.to_vec().expect("read"), vec![0, 0, 7, 0, 0, 0, 0, 0]);
        assert!(!window.is_fixed());
        assert_eq!(window.address(), None);
        assert_eq!(window.align(), 4);
    }

    #[test]
    fn sub_windows_share_storage() {
        let window = ByteWindow::host_from(vec![1, 2, 3, 4, 5, 6], 1);
        let tail = window.sub(2, 3).expect("sub");
        tail.write(|b| b[0] = 30).expect("write");
        assert_eq!(window.to_vec().expect("read"), vec![1, 2, 30, 4, 5, 6]);
        assert!(window.same_storage(&tail));
        assert!(matches!(
            window.sub(4, 4),
            Err(MemoryError::WindowOverrun { offset: 4, sub_len: 4, len: 6 })
        ));
    }

    #[test]
    fn fixed_window_survives_growth() {
        let memory = Arc::new(LinearMemory::new(1, 64));
        memory.write(16, &[9, 8, 7, 6]).expect("seed");
        let window = ByteWindow::fixed(Arc::clone(&memory), 16, 4);
        assert_eq!(window.to_vec().expect("read"), vec![9, 8, 7, 6]);
        memory.grow(2).expect("grow");
        window.write(|b| b[0] = 1).expect("write after grow");
        assert_eq!(memory.read(16, 1).expect("raw"), vec![1]);
        assert_eq!(window.address(), Some(16));
    }

    #[test]
    fn fixed_window_rejects_freed_region() {
        let memory = Arc::new(LinearMemory::new(1, 64));
        let registry = Arc::new(AllocationRegistry::new());
        registry.register(32, 8, 8, Ownership::Fixed);
        let window = ByteWindow::fixed_tracked(Arc::clone(&memory), Arc::clone(&registry), 32, 8);
        assert!(window.to_vec().is_ok());
        registry.mark_freed(32);
        assert_eq!(window.to_vec(), Err(MemoryError::Freed { address: 32 }));
    }

    #[test]
    fn fixed_window_stays_stale_after_address_reuse() {
        let memory = Arc::new(LinearMemory::new(1, 64));
        let registry = Arc::new(AllocationRegistry::new());
        registry.register(32, 8, 8, Ownership::Fixed);
        let old = ByteWindow::fixed_tracked(Arc::clone(&memory), Arc::clone(&registry), 36, 4);
        registry.mark_freed(32);
        registry.register(32, 8, 8, Ownership::Fixed);
        let fresh = ByteWindow::fixed_tracked(Arc::clone(&memory), Arc::clone(&registry), 36, 4);

        assert!(!old.is_live());
        assert_eq!(old.to_vec(), Err(MemoryError::Freed { address: 36 }));
        assert!(fresh.is_live());
        assert_eq!(fresh.to_vec().expect("live"), vec![0; 4]);

        registry.forget(32);
        assert!(!fresh.is_live());
        assert!(ByteWindow::fixed(memory, 36, 4).is_live());
    }

    #[test]
    fn copy_between_windows() {
        let a = ByteWindow::host_from(vec![1, 2, 3, 4], 1);
        let b = ByteWindow::host(4, 1);
        assert_eq!(b.copy_from(&a).expect("copy"), 4);
        assert_eq!(b.to_vec().expect("read"), vec![1, 2, 3, 4]);
        assert_eq!(a.copy_from(&a).expect("self copy"), 4);
        assert_eq!(a.to_vec().expect("read"), vec![1, 2, 3, 4]);
    }

    #[test]
    fn overlapping_copy_in_fixed_memory() {
        let memory = Arc::new(LinearMemory::new(1, 64));
        memory.write(0, &[1, 2, 3, 4, 5, 6]).expect("seed");
        let dest = ByteWindow::fixed(Arc::clone(&memory), 2, 4);
        let src = ByteWindow::fixed(Arc::clone(&memory), 0, 4);
        dest.copy_from(&src).expect("copy");
        assert_eq!(memory.read(0, 6).expect("raw"), vec![1, 2, 1, 2, 3, 4]);
        assert_eq!(src.identity().0, dest.identity().0);
    }

    #[test]
    fn reset_clears_window_only() {
        let window = ByteWindow::host_from(vec![0xFF; 6], 1);
        window.sub(1, 3).expect("sub").reset().expect("reset");
        assert_eq!(window.to_vec().expect("read"), vec![0xFF, 0, 0, 0, 0xFF, 0xFF]);
    }
}
