//! Cross-process shared memory abstraction (spec Design Notes, §9).
//!
//! Grounded on the teacher's `sab::SafeSAB` (bounds-checked read/write plus an
//! atomics-mediated "barrier view") but reshaped around a host-agnostic trait
//! instead of a `SharedArrayBuffer`, so the same kernel core runs against an
//! in-process test buffer, a native mmap'd file, or (when embedded) a buffer
//! the host process already owns.

use crate::error::LayoutError;
use std::sync::atomic::{AtomicU32, Ordering};

/// `{size, read_at, write_at, atomic_load_u32, atomic_store_u32, atomic_add_u32, close}`
/// as named in the spec's Design Notes. Atomic operations require 4-byte alignment.
pub trait MemoryProvider: Send + Sync {
    fn size(&self) -> usize;
    fn read_at(&self, offset: usize, len: usize) -> Result<Vec<u8>, LayoutError>;
    fn write_at(&self, offset: usize, data: &[u8]) -> Result<(), LayoutError>;
    fn atomic_load_u32(&self, offset: usize) -> Result<u32, LayoutError>;
    fn atomic_store_u32(&self, offset: usize, value: u32) -> Result<(), LayoutError>;
    fn atomic_add_u32(&self, offset: usize, delta: u32) -> Result<u32, LayoutError>;
    fn atomic_cas_u32(&self, offset: usize, expected: u32, new: u32) -> Result<u32, LayoutError>;
    fn close(&self) -> Result<(), LayoutError>;
}

fn bounds_check(len: usize, offset: usize, size: usize) -> Result<(), LayoutError> {
    if offset.checked_add(size).map_or(true, |end| end > len) {
        return Err(LayoutError::OffsetOutOfBounds {
            offset,
            size,
            arena_size: len,
        });
    }
    Ok(())
}

fn align_check(offset: usize) -> Result<(), LayoutError> {
    if offset % 4 != 0 {
        return Err(LayoutError::Misaligned {
            offset,
            alignment: 4,
        });
    }
    Ok(())
}

/// A plain heap buffer. Used by tests and by any embedder that wants the
/// kernel's arena to live entirely inside this process without a real mmap.
///
/// Synchronization is deliberately absent here: the spec's concurrency model
/// (§5) puts region ownership in [`crate::guard::RegionGuard`] and epoch
/// ordering in [`crate::epoch`]; `MemoryProvider` only has to give callers
/// raw, bounds-checked access to bytes they already know they're allowed to
/// touch, exactly as the teacher's `SafeSAB::read`/`write` did.
pub struct InProcessMemory {
    data: Box<[u8]>,
}

// SAFETY: all mutation goes through bounds-checked raw-pointer writes; callers
// coordinate exclusive access via region guards and epochs, not via `&mut`.
unsafe impl Send for InProcessMemory {}
unsafe impl Sync for InProcessMemory {}

impl InProcessMemory {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    fn base_ptr(&self) -> *mut u8 {
        self.data.as_ptr() as *mut u8
    }
}

impl MemoryProvider for InProcessMemory {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn read_at(&self, offset: usize, len: usize) -> Result<Vec<u8>, LayoutError> {
        bounds_check(self.size(), offset, len)?;
        let slice = unsafe { std::slice::from_raw_parts(self.base_ptr().add(offset), len) };
        Ok(slice.to_vec())
    }

    fn write_at(&self, offset: usize, data: &[u8]) -> Result<(), LayoutError> {
        bounds_check(self.size(), offset, data.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.base_ptr().add(offset), data.len());
        }
        Ok(())
    }

    fn atomic_load_u32(&self, offset: usize) -> Result<u32, LayoutError> {
        bounds_check(self.size(), offset, 4)?;
        align_check(offset)?;
        let word = unsafe { &*(self.base_ptr().add(offset) as *const AtomicU32) };
        Ok(word.load(Ordering::Acquire))
    }

    fn atomic_store_u32(&self, offset: usize, value: u32) -> Result<(), LayoutError> {
        bounds_check(self.size(), offset, 4)?;
        align_check(offset)?;
        let word = unsafe { &*(self.base_ptr().add(offset) as *const AtomicU32) };
        word.store(value, Ordering::Release);
        Ok(())
    }

    fn atomic_add_u32(&self, offset: usize, delta: u32) -> Result<u32, LayoutError> {
        bounds_check(self.size(), offset, 4)?;
        align_check(offset)?;
        let word = unsafe { &*(self.base_ptr().add(offset) as *const AtomicU32) };
        Ok(word.fetch_add(delta, Ordering::AcqRel))
    }

    fn atomic_cas_u32(&self, offset: usize, expected: u32, new: u32) -> Result<u32, LayoutError> {
        bounds_check(self.size(), offset, 4)?;
        align_check(offset)?;
        let word = unsafe { &*(self.base_ptr().add(offset) as *const AtomicU32) };
        match word.compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire) {
            Ok(v) | Err(v) => Ok(v),
        }
    }

    fn close(&self) -> Result<(), LayoutError> {
        Ok(())
    }
}

/// Native host-process backing: an mmap'd file, so the arena can be shared
/// with a sibling process or survive a supervisor restart (spec §3
/// Lifecycle: "epoch counters persist across supervisor restarts").
pub struct MmapMemory {
    mmap: memmap2::MmapMut,
}

unsafe impl Send for MmapMemory {}
unsafe impl Sync for MmapMemory {}

impl MmapMemory {
    pub fn create(file: &std::fs::File, size: usize) -> std::io::Result<Self> {
        file.set_len(size as u64)?;
        let mmap = unsafe { memmap2::MmapMut::map_mut(file)? };
        Ok(Self { mmap })
    }

    fn base_ptr(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }
}

impl MemoryProvider for MmapMemory {
    fn size(&self) -> usize {
        self.mmap.len()
    }

    fn read_at(&self, offset: usize, len: usize) -> Result<Vec<u8>, LayoutError> {
        bounds_check(self.size(), offset, len)?;
        let slice = unsafe { std::slice::from_raw_parts(self.base_ptr().add(offset), len) };
        Ok(slice.to_vec())
    }

    fn write_at(&self, offset: usize, data: &[u8]) -> Result<(), LayoutError> {
        bounds_check(self.size(), offset, data.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.base_ptr().add(offset), data.len());
        }
        Ok(())
    }

    fn atomic_load_u32(&self, offset: usize) -> Result<u32, LayoutError> {
        bounds_check(self.size(), offset, 4)?;
        align_check(offset)?;
        let word = unsafe { &*(self.base_ptr().add(offset) as *const AtomicU32) };
        Ok(word.load(Ordering::Acquire))
    }

    fn atomic_store_u32(&self, offset: usize, value: u32) -> Result<(), LayoutError> {
        bounds_check(self.size(), offset, 4)?;
        align_check(offset)?;
        let word = unsafe { &*(self.base_ptr().add(offset) as *const AtomicU32) };
        word.store(value, Ordering::Release);
        Ok(())
    }

    fn atomic_add_u32(&self, offset: usize, delta: u32) -> Result<u32, LayoutError> {
        bounds_check(self.size(), offset, 4)?;
        align_check(offset)?;
        let word = unsafe { &*(self.base_ptr().add(offset) as *const AtomicU32) };
        Ok(word.fetch_add(delta, Ordering::AcqRel))
    }

    fn atomic_cas_u32(&self, offset: usize, expected: u32, new: u32) -> Result<u32, LayoutError> {
        bounds_check(self.size(), offset, 4)?;
        align_check(offset)?;
        let word = unsafe { &*(self.base_ptr().add(offset) as *const AtomicU32) };
        match word.compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire) {
            Ok(v) | Err(v) => Ok(v),
        }
    }

    fn close(&self) -> Result<(), LayoutError> {
        self.mmap.flush().map_err(|_| LayoutError::OffsetOutOfBounds {
            offset: 0,
            size: 0,
            arena_size: self.size(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_round_trip() {
        let mem = InProcessMemory::new(1024);
        mem.write_at(16, &[1, 2, 3, 4]).unwrap();
        assert_eq!(mem.read_at(16, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn atomics_are_visible_across_handles() {
        let mem = InProcessMemory::new(1024);
        assert_eq!(mem.atomic_load_u32(0).unwrap(), 0);
        assert_eq!(mem.atomic_add_u32(0, 1).unwrap(), 0);
        assert_eq!(mem.atomic_load_u32(0).unwrap(), 1);
        assert_eq!(mem.atomic_cas_u32(0, 1, 5).unwrap(), 1);
        assert_eq!(mem.atomic_load_u32(0).unwrap(), 5);
    }

    #[test]
    fn out_of_bounds_is_rejected() {
        let mem = InProcessMemory::new(16);
        assert!(mem.read_at(12, 8).is_err());
        assert!(mem.atomic_load_u32(15).is_err());
    }
}
