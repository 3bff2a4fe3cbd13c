//! Size-routed allocator combining the slab and buddy allocators
//! (spec §4.6): requests of 256 bytes or less go to the slab allocator,
//! requests under 4KiB get a whole page from the buddy allocator, and
//! anything 4KiB or larger goes straight to the buddy allocator sized to
//! the request. Naming (`HybridAllocator`, `allocate`/`free`) follows the
//! teacher's `arena::ArenaAllocator`, which played the same "one call site,
//! routed underneath" role for the browser-side RPC allocator.

use super::buddy::{BuddyAllocator, MIN_BLOCK_SIZE};
use super::slab::{PageSource, SlabAllocator, SIZE_CLASSES};
use crate::error::AllocError;
use crate::memory::MemoryProvider;
use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;

const SLAB_MAX_SIZE: usize = 256;
const PAGE_THRESHOLD: usize = MIN_BLOCK_SIZE;

bitflags::bitflags! {
    /// Allocation hints (spec §4.6). `Zeroed` is honored directly by this
    /// allocator; `Persistent` and `Shared` describe properties already
    /// implied by the chosen [`MemoryProvider`] (an mmap'd file vs. a plain
    /// heap buffer) and `Guarded` is reserved for callers that want a
    /// canary-checked allocation layered on top, not yet implemented.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AllocFlags: u8 {
        const ZEROED = 0b0001;
        const PERSISTENT = 0b0010;
        const SHARED = 0b0100;
        const GUARDED = 0b1000;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AllocKind {
    Slab,
    Buddy,
}

struct BuddyPageSource {
    buddy: Arc<BuddyAllocator>,
}

impl PageSource for BuddyPageSource {
    fn acquire_page(&self) -> Result<usize, AllocError> {
        self.buddy.alloc(MIN_BLOCK_SIZE)
    }
    fn release_page(&self, offset: usize) -> Result<(), AllocError> {
        self.buddy.free(offset)
    }
}

pub struct HybridAllocator {
    mem: Arc<dyn MemoryProvider>,
    buddy: Arc<BuddyAllocator>,
    slab: SlabAllocator,
    allocations: Mutex<HashMap<usize, AllocKind>>,
}

impl HybridAllocator {
    pub fn new(mem: Arc<dyn MemoryProvider>, base: usize, total_size: usize) -> Self {
        let buddy = Arc::new(BuddyAllocator::new(mem.clone(), base, total_size));
        let page_source = Arc::new(BuddyPageSource { buddy: buddy.clone() });
        let slab = SlabAllocator::new(mem.clone(), page_source);
        Self {
            mem,
            buddy,
            slab,
            allocations: Mutex::new(HashMap::new()),
        }
    }

    pub fn allocate(&self, size: usize) -> Result<usize, AllocError> {
        self.allocate_with_flags(size, AllocFlags::empty())
    }

    pub fn allocate_with_flags(&self, size: usize, flags: AllocFlags) -> Result<usize, AllocError> {
        let (offset, kind) = if size <= SLAB_MAX_SIZE {
            (self.slab.alloc(size)?, AllocKind::Slab)
        } else if size < PAGE_THRESHOLD {
            (self.buddy.alloc(PAGE_THRESHOLD)?, AllocKind::Buddy)
        } else {
            (self.buddy.alloc(size)?, AllocKind::Buddy)
        };

        if flags.contains(AllocFlags::ZEROED) {
            let zeros = vec![0u8; size];
            let _ = self.mem.write_at(offset, &zeros);
        }

        self.allocations.lock().insert(offset, kind);
        Ok(offset)
    }

    pub fn free(&self, offset: usize) -> Result<(), AllocError> {
        let kind = self
            .allocations
            .lock()
            .remove(&offset)
            .ok_or(AllocError::InvalidOffset(offset))?;
        match kind {
            AllocKind::Slab => self.slab.free(offset),
            AllocKind::Buddy => self.buddy.free(offset),
        }
    }

    /// Number of size classes the slab side understands; exposed for the
    /// fragmentation-probing end-to-end test in spec §8.
    pub fn slab_class_count() -> usize {
        SIZE_CLASSES.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InProcessMemory;

    fn hybrid(total_size: usize) -> HybridAllocator {
        HybridAllocator::new(Arc::new(InProcessMemory::new(total_size)), 0, total_size)
    }

    #[test]
    fn small_allocation_goes_to_slab() {
        let h = hybrid(2 * 1024 * 1024);
        let a = h.allocate(16).unwrap();
        let b = h.allocate(16).unwrap();
        assert!((a as i64 - b as i64).abs() < 4096);
    }

    #[test]
    fn sub_page_allocation_reserves_a_whole_page() {
        let h = hybrid(2 * 1024 * 1024);
        let a = h.allocate(1000).unwrap();
        let b = h.allocate(1000).unwrap();
        assert!((a as i64 - b as i64).unsigned_abs() as usize >= 4096);
    }

    #[test]
    fn large_allocation_round_trips() {
        let h = hybrid(4 * 1024 * 1024);
        let a = h.allocate(500_000).unwrap();
        h.free(a).unwrap();
        let b = h.allocate(500_000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zeroed_flag_clears_memory() {
        let h = hybrid(1024 * 1024);
        let offset = h.allocate(64).unwrap();
        h.mem.write_at(offset, &[0xFF; 64]).unwrap();
        h.free(offset).unwrap();
        let offset2 = h.allocate_with_flags(64, AllocFlags::ZEROED).unwrap();
        assert_eq!(h.mem.read_at(offset2, 64).unwrap(), vec![0u8; 64]);
    }

    #[test]
    fn freeing_unknown_offset_errors() {
        let h = hybrid(1024 * 1024);
        assert!(matches!(h.free(12345), Err(AllocError::InvalidOffset(_))));
    }
}
