//! Foreign linear memory.
//!
//! The foreign side sees one contiguous, growable address space. Growing it
//! replaces the backing buffer and detaches the previous one (its bytes are
//! dropped), the same way a sandboxed runtime invalidates outstanding views of
//! its memory. Holders of an old [`MemoryBuffer`] detect the detachment and
//! re-resolve through [`LinearMemory::buffer`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::MemoryError;
use crate::metrics::{MembraneMetrics, global_metrics};

/// One generation of linear memory backing storage.
#[derive(Debug)]
pub struct MemoryBuffer {
    pub(crate) bytes: RwLock<Vec<u8>>,
    generation: u64,
}

impl MemoryBuffer {
    fn new(bytes: Vec<u8>, generation: u64) -> Self {
        Self {
            bytes: RwLock::new(bytes),
            generation,
        }
    }

    /// True once the linear memory moved to a newer buffer.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.bytes.read().is_empty()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Growable foreign address space.
#[derive(Debug)]
pub struct LinearMemory {
    current: RwLock<Arc<MemoryBuffer>>,
    generation: AtomicU64,
    page_size: usize,
    max_pages: Option<usize>,
}

impl LinearMemory {
    /// Create a memory with `initial_pages` zeroed pages.
    #[must_use]
    pub fn new(initial_pages: usize, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let bytes = vec![0_u8; initial_pages.max(1) * page_size];
        Self {
            current: RwLock::new(Arc::new(MemoryBuffer::new(bytes, 1))),
            generation: AtomicU64::new(1),
            page_size,
            max_pages: None,
        }
    }

    /// Cap growth at `max_pages`.
    #[must_use]
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Current size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.current.read().len()
    }

    /// Generation of the live backing buffer; bumps on every growth.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// The live backing buffer.
    #[must_use]
    pub fn buffer(&self) -> Arc<MemoryBuffer> {
        Arc::clone(&self.current.read())
    }

    /// Grow by `additional_pages`, returning the previous page count.
    ///
    /// The previous buffer is detached: anyone still holding it must
    /// re-resolve before touching bytes.
    pub fn grow(&self, additional_pages: usize) -> Result<usize, MemoryError> {
        let mut current = self.current.write();
        let old_len = current.len();
        let old_pages = old_len / self.page_size;
        let new_pages = old_pages + additional_pages;
        if let Some(max_pages) = self.max_pages
            && new_pages > max_pages
        {
            return Err(MemoryError::GrowthLimit { max_pages });
        }
        if additional_pages == 0 {
            return Ok(old_pages);
        }
        let mut bytes = std::mem::take(&mut *current.bytes.write());
        bytes.resize(new_pages * self.page_size, 0);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *current = Arc::new(MemoryBuffer::new(bytes, generation));
        MembraneMetrics::inc(&global_metrics().grows);
        Ok(old_pages)
    }

    /// Grow until at least `size` bytes are addressable.
    pub fn ensure_size(&self, size: usize) -> Result<(), MemoryError> {
        let current = self.size();
        if size <= current {
            return Ok(());
        }
        let missing = size - current;
        let pages = missing.div_ceil(self.page_size);
        self.grow(pages).map(|_| ())
    }

    fn check(&self, address: usize, len: usize, size: usize) -> Result<(), MemoryError> {
        match address.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => Err(MemoryError::OutOfBounds { address, len, size }),
        }
    }

    /// Copy `dst.len()` bytes starting at `address` into `dst`.
    pub fn read_into(&self, address: usize, dst: &mut [u8]) -> Result<(), MemoryError> {
        let buffer = self.buffer();
        let bytes = buffer.bytes.read();
        self.check(address, dst.len(), bytes.len())?;
        dst.copy_from_slice(&bytes[address..address + dst.len()]);
        Ok(())
    }

    /// Read `len` bytes starting at `address`.
    pub fn read(&self, address: usize, len: usize) -> Result<Vec<u8>, MemoryError> {
        let mut out = vec![0_u8; len];
        self.read_into(address, &mut out)?;
        Ok(out)
    }

    /// Write `src` at `address`.
    pub fn write(&self, address: usize, src: &[u8]) -> Result<(), MemoryError> {
        let buffer = self.buffer();
        let mut bytes = buffer.bytes.write();
        self.check(address, src.len(), bytes.len())?;
        bytes[address..address + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Fill `len` bytes at `address` with `value`.
    pub fn fill(&self, address: usize, len: usize, value: u8) -> Result<(), MemoryError> {
        let buffer = self.buffer();
        let mut bytes = buffer.bytes.write();
        self.check(address, len, bytes.len())?;
        bytes[address..address + len].fill(value);
        Ok(())
    }

    /// Read an unsigned address-sized word.
    pub fn read_word(
        &self,
        address: usize,
        size: usize,
        little_endian: bool,
    ) -> Result<u64, MemoryError> {
        let raw = self.read(address, size.min(8))?;
        Ok(word_from_bytes(&raw, little_endian))
    }

    /// Write an unsigned address-sized word.
    pub fn write_word(
        &self,
        address: usize,
        size: usize,
        value: u64,
        little_endian: bool,
    ) -> Result<(), MemoryError> {
        let raw = word_to_bytes(value, size.min(8), little_endian);
        self.write(address, &raw)
    }
}

/// Decode an unsigned word of up to 8 bytes.
#[must_use]
pub fn word_from_bytes(raw: &[u8], little_endian: bool) -> u64 {
    let mut value = 0_u64;
    if little_endian {
        for (i, byte) in raw.iter().take(8).enumerate() {
            value |= u64::from(*byte) << (8 * i);
        }
    } else {
        for byte in raw.iter().take(8) {
            value = (value << 8) | u64::from(*byte);
        }
    }
    value
}

/// Encode an unsigned word into `size` bytes (truncating high bytes).
#[must_use]
pub fn word_to_bytes(value: u64, size: usize, little_endian: bool) -> Vec<u8> {
    let le = value.to_le_bytes();
    let mut out: Vec<u8> = le.iter().take(size.min(8)).copied().collect();
    out.resize(size, 0);
    if !little_endian {
        out.reverse();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_detaches_previous_buffer() {
        let memory = LinearMemory::new(1, 64);
        memory.write(8, &[1, 2, 3]).expect("write");
        let old = memory.buffer();
        assert_eq!(memory.grow(1).expect("grow"), 1);
        assert!(old.is_detached());
        assert_eq!(memory.size(), 128);
        assert_eq!(memory.read(8, 3).expect("read"), vec![1, 2, 3]);
        assert!(memory.generation() > old.generation());
    }

    #[test]
    fn growth_limit_is_enforced() {
        let memory = LinearMemory::new(1, 16).with_max_pages(2);
        assert!(memory.grow(1).is_ok());
        assert_eq!(
            memory.grow(1),
            Err(MemoryError::GrowthLimit { max_pages: 2 })
        );
    }

    #[test]
    fn out_of_bounds_access_is_rejected() {
        let memory = LinearMemory::new(1, 16);
        assert!(matches!(
            memory.read(12, 8),
            Err(MemoryError::OutOfBounds { address: 12, len: 8, size: 16 })
        ));
        assert!(memory.write(usize::MAX, &[1]).is_err());
    }

    #[test]
    fn words_round_trip_in_both_orders() {
        let memory = LinearMemory::new(1, 32);
        memory.write_word(0, 4, 0x1234_5678, true).expect("le");
        assert_eq!(memory.read(0, 4).expect("read"), vec![0x78, 0x56, 0x34, 0x12]);
        memory.write_word(4, 4, 0x1234_5678, false).expect("be");
        assert_eq!(memory.read(4, 4).expect("read"), vec![0x12, 0x34, 0x56, 0x78]);
        assert_eq!(memory.read_word(4, 4, false).expect("word"), 0x1234_5678);
    }

    #[test]
    fn ensure_size_rounds_up_to_pages() {
        let memory = LinearMemory::new(1, 16);
        memory.ensure_size(40).expect("ensure");
        assert_eq!(memory.size(), 48);
    }
}
