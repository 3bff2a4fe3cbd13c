//! Epoch index allocator for the dynamic supervisor pool (spec §4.8).
//!
//! 128 epoch indices (64-191) are handed out to supervisors as they join.
//! A bitmap plus a round-robin `next_index` hint track which indices are
//! free, in the same "bitmap over a fixed table" idiom as the slab
//! allocator's per-page free words and the registry's inline-slot
//! resolution. Claiming an index and publishing the supervisor's header
//! entry are journaled as one step: if the header write fails, the bitmap
//! claim is rolled back so the index isn't leaked.

use crate::error::AllocError;
use crate::layout::{
    OFFSET_EPOCH_ALLOCATOR_TABLE, OFFSET_SUPERVISOR_HEADERS, SUPERVISOR_POOL_BASE,
    SUPERVISOR_POOL_SIZE,
};
use crate::memory::MemoryProvider;
use std::sync::Arc;
use parking_lot::Mutex;

pub const SUPERVISOR_HEADER_SIZE: usize = 128;
const BITMAP_WORD_COUNT: usize = (SUPERVISOR_POOL_SIZE as usize).div_ceil(32);
const NEXT_INDEX_HINT_OFFSET: usize = OFFSET_EPOCH_ALLOCATOR_TABLE + BITMAP_WORD_COUNT * 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorHeader {
    pub epoch_index: u32,
    pub status: u8,
}

pub const SUPERVISOR_STATUS_FREE: u8 = 0;
pub const SUPERVISOR_STATUS_ACTIVE: u8 = 1;

pub struct EpochAllocator {
    mem: Arc<dyn MemoryProvider>,
    claim_lock: Mutex<()>,
}

impl EpochAllocator {
    pub fn new(mem: Arc<dyn MemoryProvider>) -> Self {
        Self {
            mem,
            claim_lock: Mutex::new(()),
        }
    }

    fn bit_is_set(&self, index: usize) -> bool {
        let word_offset = OFFSET_EPOCH_ALLOCATOR_TABLE + (index / 32) * 4;
        let bit = index % 32;
        let word = self.mem.atomic_load_u32(word_offset).unwrap_or(0);
        word & (1 << bit) != 0
    }

    fn set_bit(&self, index: usize) {
        let word_offset = OFFSET_EPOCH_ALLOCATOR_TABLE + (index / 32) * 4;
        let bit = index % 32;
        loop {
            let current = self.mem.atomic_load_u32(word_offset).unwrap_or(0);
            let updated = current | (1 << bit);
            if self.mem.atomic_cas_u32(word_offset, current, updated).unwrap_or(current) == current {
                break;
            }
        }
    }

    fn clear_bit(&self, index: usize) {
        let word_offset = OFFSET_EPOCH_ALLOCATOR_TABLE + (index / 32) * 4;
        let bit = index % 32;
        loop {
            let current = self.mem.atomic_load_u32(word_offset).unwrap_or(0);
            let updated = current & !(1 << bit);
            if self.mem.atomic_cas_u32(word_offset, current, updated).unwrap_or(current) == current {
                break;
            }
        }
    }

    /// Claims a free supervisor slot, writes its header entry as
    /// [`SUPERVISOR_STATUS_ACTIVE`], and returns the absolute epoch index
    /// (in `64..192`). Rolls back the bitmap claim if the header write
    /// fails, so a mid-write crash never leaks the index permanently.
    pub fn claim(&self) -> Result<u32, AllocError> {
        let _guard = self.claim_lock.lock();
        let hint = self.mem.atomic_load_u32(NEXT_INDEX_HINT_OFFSET).unwrap_or(0) as usize;

        for probe in 0..SUPERVISOR_POOL_SIZE as usize {
            let index = (hint + probe) % SUPERVISOR_POOL_SIZE as usize;
            if !self.bit_is_set(index) {
                self.set_bit(index);
                let epoch_index = SUPERVISOR_POOL_BASE + index as u32;

                let header = SupervisorHeader {
                    epoch_index,
                    status: SUPERVISOR_STATUS_ACTIVE,
                };
                if let Err(e) = write_header(self.mem.as_ref(), index, &header) {
                    self.clear_bit(index);
                    return Err(e);
                }

                let _ = self
                    .mem
                    .atomic_store_u32(NEXT_INDEX_HINT_OFFSET, ((index + 1) % SUPERVISOR_POOL_SIZE as usize) as u32);
                return Ok(epoch_index);
            }
        }

        Err(AllocError::OutOfMemory {
            requested: 1,
        })
    }

    pub fn release(&self, epoch_index: u32) -> Result<(), AllocError> {
        if epoch_index < SUPERVISOR_POOL_BASE || epoch_index >= SUPERVISOR_POOL_BASE + SUPERVISOR_POOL_SIZE {
            return Err(AllocError::InvalidOffset(epoch_index as usize));
        }
        let index = (epoch_index - SUPERVISOR_POOL_BASE) as usize;
        let header = SupervisorHeader {
            epoch_index,
            status: SUPERVISOR_STATUS_FREE,
        };
        write_header(self.mem.as_ref(), index, &header)?;
        self.clear_bit(index);
        Ok(())
    }
}

fn write_header(mem: &dyn MemoryProvider, index: usize, header: &SupervisorHeader) -> Result<(), AllocError> {
    let offset = OFFSET_SUPERVISOR_HEADERS + index * SUPERVISOR_HEADER_SIZE;
    let mut bytes = [0u8; SUPERVISOR_HEADER_SIZE];
    bytes[0..4].copy_from_slice(&header.epoch_index.to_le_bytes());
    bytes[4] = header.status;
    mem.write_at(offset, &bytes).map_err(|_| AllocError::InvalidOffset(offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ARENA_SIZE_DEFAULT;
    use crate::memory::InProcessMemory;

    fn allocator() -> EpochAllocator {
        EpochAllocator::new(Arc::new(InProcessMemory::new(ARENA_SIZE_DEFAULT)))
    }

    #[test]
    fn claims_distinct_indices() {
        let a = allocator();
        let i1 = a.claim().unwrap();
        let i2 = a.claim().unwrap();
        assert_ne!(i1, i2);
        assert!((SUPERVISOR_POOL_BASE..SUPERVISOR_POOL_BASE + SUPERVISOR_POOL_SIZE).contains(&i1));
    }

    #[test]
    fn released_index_is_reclaimed() {
        let a = allocator();
        let i1 = a.claim().unwrap();
        a.release(i1).unwrap();
        let mut seen = false;
        for _ in 0..SUPERVISOR_POOL_SIZE {
            if a.claim().unwrap() == i1 {
                seen = true;
                break;
            }
        }
        assert!(seen);
    }

    #[test]
    fn pool_exhaustion_is_reported() {
        let a = allocator();
        for _ in 0..SUPERVISOR_POOL_SIZE {
            a.claim().unwrap();
        }
        assert!(matches!(a.claim(), Err(AllocError::OutOfMemory { .. })));
    }
}
