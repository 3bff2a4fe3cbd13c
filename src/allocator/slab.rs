//! Slab allocator for the ten small fixed size classes (spec §4.4).
//!
//! Each size class carves 4KiB pages (supplied by a [`PageSource`], which
//! `hybrid` backs with the buddy allocator) into fixed-size slots tracked by
//! a bitmap of 64-bit words, one bit per slot, `1` meaning free. This mirrors
//! the teacher's bitmap-over-fixed-record idiom used for inline registry
//! slots in `registry.rs`, applied here to raw byte slots instead of
//! 96-byte module entries.

use crate::error::AllocError;
use crate::memory::MemoryProvider;
use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;

pub const SIZE_CLASSES: [usize; 10] = [8, 16, 24, 32, 48, 64, 96, 128, 192, 256];
pub const PAGE_SIZE: usize = 4096;

pub trait PageSource: Send + Sync {
    fn acquire_page(&self) -> Result<usize, AllocError>;
    fn release_page(&self, offset: usize) -> Result<(), AllocError>;
}

fn class_index_for(size: usize) -> Option<usize> {
    SIZE_CLASSES.iter().position(|&class_size| class_size >= size)
}

struct Page {
    base: usize,
    free_words: Vec<u64>,
    slot_count: usize,
}

impl Page {
    fn new(base: usize, class_size: usize) -> Self {
        let slot_count = PAGE_SIZE / class_size;
        let word_count = slot_count.div_ceil(64);
        let mut free_words = vec![u64::MAX; word_count];
        // Clear any trailing bits beyond slot_count in the last word.
        let used_bits_in_last_word = slot_count - (word_count - 1) * 64;
        if used_bits_in_last_word < 64 {
            let mask = (1u64 << used_bits_in_last_word) - 1;
            *free_words.last_mut().unwrap() &= mask;
        }
        Self {
            base,
            free_words,
            slot_count,
        }
    }

    fn take_free_slot(&mut self) -> Option<usize> {
        for (word_idx, word) in self.free_words.iter_mut().enumerate() {
            if *word != 0 {
                let bit = word.trailing_zeros() as usize;
                *word &= !(1 << bit);
                return Some(word_idx * 64 + bit);
            }
        }
        None
    }

    fn return_slot(&mut self, slot_idx: usize) -> Result<(), AllocError> {
        let word_idx = slot_idx / 64;
        let bit = slot_idx % 64;
        let word = &mut self.free_words[word_idx];
        if *word & (1 << bit) != 0 {
            return Err(AllocError::DoubleFree(self.base + slot_idx));
        }
        *word |= 1 << bit;
        Ok(())
    }

    fn is_fully_free(&self) -> bool {
        self.free_words.iter().enumerate().all(|(i, w)| {
            if i + 1 == self.free_words.len() {
                let used_bits = self.slot_count - i * 64;
                let mask = if used_bits >= 64 { u64::MAX } else { (1u64 << used_bits) - 1 };
                *w & mask == mask
            } else {
                *w == u64::MAX
            }
        })
    }
}

struct SizeClass {
    size: usize,
    pages: Vec<Page>,
}

pub struct SlabAllocator {
    page_source: Arc<dyn PageSource>,
    classes: Mutex<Vec<SizeClass>>,
    page_to_class: Mutex<HashMap<usize, usize>>,
}

impl SlabAllocator {
    pub fn new(_mem: Arc<dyn MemoryProvider>, page_source: Arc<dyn PageSource>) -> Self {
        let classes = SIZE_CLASSES
            .iter()
            .map(|&size| SizeClass { size, pages: Vec::new() })
            .collect();
        Self {
            page_source,
            classes: Mutex::new(classes),
            page_to_class: Mutex::new(HashMap::new()),
        }
    }

    pub fn alloc(&self, size: usize) -> Result<usize, AllocError> {
        let class_idx = class_index_for(size).ok_or(AllocError::OutOfMemory { requested: size })?;
        let mut classes = self.classes.lock();
        let class = &mut classes[class_idx];

        for page in class.pages.iter_mut() {
            if let Some(slot) = page.take_free_slot() {
                return Ok(page.base + slot * class.size);
            }
        }

        let page_base = self.page_source.acquire_page()?;
        let mut page = Page::new(page_base, class.size);
        let slot = page.take_free_slot().expect("a fresh page always has a free slot");
        class.pages.push(page);
        self.page_to_class.lock().insert(page_base, class_idx);
        Ok(page_base + slot * class.size)
    }

    pub fn free(&self, offset: usize) -> Result<(), AllocError> {
        let page_to_class = self.page_to_class.lock();
        let page_base = *page_to_class
            .keys()
            .find(|&&base| offset >= base && offset < base + PAGE_SIZE)
            .ok_or(AllocError::InvalidOffset(offset))?;
        let class_idx = page_to_class[&page_base];
        drop(page_to_class);

        let mut classes = self.classes.lock();
        let class = &mut classes[class_idx];
        let page = class
            .pages
            .iter_mut()
            .find(|p| p.base == page_base)
            .ok_or(AllocError::InvalidOffset(offset))?;
        let slot_idx = (offset - page_base) / class.size;
        page.return_slot(slot_idx)?;

        if page.is_fully_free() {
            let class_size = class.size;
            class.pages.retain(|p| p.base != page_base);
            self.page_to_class.lock().remove(&page_base);
            let _ = class_size;
            let _ = self.page_source.release_page(page_base);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InProcessMemory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct LinearPageSource {
        mem_size: usize,
        next: AtomicUsize,
    }

    impl PageSource for LinearPageSource {
        fn acquire_page(&self) -> Result<usize, AllocError> {
            let offset = self.next.fetch_add(PAGE_SIZE, Ordering::SeqCst);
            if offset + PAGE_SIZE > self.mem_size {
                return Err(AllocError::OutOfMemory { requested: PAGE_SIZE });
            }
            Ok(offset)
        }
        fn release_page(&self, _offset: usize) -> Result<(), AllocError> {
            Ok(())
        }
    }

    fn slab(mem_size: usize) -> SlabAllocator {
        let mem: Arc<dyn MemoryProvider> = Arc::new(InProcessMemory::new(mem_size));
        let source = Arc::new(LinearPageSource {
            mem_size,
            next: AtomicUsize::new(0),
        });
        SlabAllocator::new(mem, source)
    }

    #[test]
    fn allocates_distinct_slots_in_same_page() {
        let slab = slab(PAGE_SIZE * 2);
        let a = slab.alloc(8).unwrap();
        let b = slab.alloc(8).unwrap();
        assert_ne!(a, b);
        assert_eq!(a / PAGE_SIZE, b / PAGE_SIZE);
    }

    #[test]
    fn frees_and_reuses_a_slot() {
        let slab = slab(PAGE_SIZE * 2);
        let a = slab.alloc(16).unwrap();
        slab.free(a).unwrap();
        let b = slab.alloc(16).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn double_free_is_rejected() {
        let slab = slab(PAGE_SIZE * 2);
        let a = slab.alloc(32).unwrap();
        slab.free(a).unwrap();
        assert!(matches!(slab.free(a), Err(AllocError::DoubleFree(_))));
    }

    #[test]
    fn exhausting_a_page_acquires_a_new_one() {
        let slab = slab(PAGE_SIZE * 4);
        let slots_per_page = PAGE_SIZE / 256;
        let mut offsets = Vec::new();
        for _ in 0..slots_per_page + 1 {
            offsets.push(slab.alloc(256).unwrap());
        }
        let first_page = offsets[0] / PAGE_SIZE;
        let last_page = offsets.last().unwrap() / PAGE_SIZE;
        assert_ne!(first_page, last_page);
    }
}
