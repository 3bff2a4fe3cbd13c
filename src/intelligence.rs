//! Pattern exchange cache and advisory knowledge graph (spec §4.10).
//!
//! The fixed-record-over-raw-bytes parsing style follows `identity.rs`'s
//! `IdentityRegistry::get_entry` and `social_graph.rs`'s `SocialGraph::get_entry`:
//! a small struct laid out at a known stride, read and written directly
//! through the arena rather than deserialized. Entries are strictly
//! advisory: nothing in the kernel blocks on cache state, so a full or
//! stale cache degrades quality, not correctness.

use crate::layout::{OFFSET_PATTERN_EXCHANGE, PATTERN_ENTRY_SIZE, SIZE_PATTERN_EXCHANGE};
use crate::memory::MemoryProvider;
use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternEntry {
    pub id: u64,
    pub pattern_type: u16,
    pub confidence: u16,
    pub payload_offset: u32,
    pub payload_size: u32,
    pub last_used_epoch: u32,
}

impl PatternEntry {
    fn empty() -> Self {
        Self {
            id: 0,
            pattern_type: 0,
            confidence: 0,
            payload_offset: 0,
            payload_size: 0,
            last_used_epoch: 0,
        }
    }

    fn is_occupied(&self) -> bool {
        self.id != 0
    }

    fn encode(&self) -> [u8; PATTERN_ENTRY_SIZE] {
        let mut buf = [0u8; PATTERN_ENTRY_SIZE];
        buf[0..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8..10].copy_from_slice(&self.pattern_type.to_le_bytes());
        buf[10..12].copy_from_slice(&self.confidence.to_le_bytes());
        buf[12..16].copy_from_slice(&self.payload_offset.to_le_bytes());
        buf[16..20].copy_from_slice(&self.payload_size.to_le_bytes());
        buf[20..24].copy_from_slice(&self.last_used_epoch.to_le_bytes());
        buf
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            id: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            pattern_type: u16::from_le_bytes(bytes[8..10].try_into().unwrap()),
            confidence: u16::from_le_bytes(bytes[10..12].try_into().unwrap()),
            payload_offset: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            payload_size: u32::from_le_bytes(bytes[16..20].try_into().unwrap()),
            last_used_epoch: u32::from_le_bytes(bytes[20..24].try_into().unwrap()),
        }
    }
}

/// LRU-by-last-use-epoch store of [`PatternEntry`] records over the
/// PatternExchange region.
pub struct PatternCache {
    mem: Arc<dyn MemoryProvider>,
    capacity: usize,
}

impl PatternCache {
    pub fn new(mem: Arc<dyn MemoryProvider>) -> Self {
        Self {
            mem,
            capacity: SIZE_PATTERN_EXCHANGE / PATTERN_ENTRY_SIZE,
        }
    }

    fn slot_offset(&self, index: usize) -> usize {
        OFFSET_PATTERN_EXCHANGE + index * PATTERN_ENTRY_SIZE
    }

    fn read_slot(&self, index: usize) -> PatternEntry {
        self.mem
            .read_at(self.slot_offset(index), PATTERN_ENTRY_SIZE)
            .map(|bytes| PatternEntry::decode(&bytes))
            .unwrap_or_else(|_| PatternEntry::empty())
    }

    fn write_slot(&self, index: usize, entry: &PatternEntry) {
        let _ = self.mem.write_at(self.slot_offset(index), &entry.encode());
    }

    fn find_slot(&self, id: u64) -> Option<usize> {
        (0..self.capacity).find(|&i| self.read_slot(i).id == id)
    }

    /// Inserts or updates a pattern. Evicts the entry with the smallest
    /// `last_used_epoch` when the cache is full.
    pub fn insert(&self, entry: PatternEntry) {
        if let Some(slot) = self.find_slot(entry.id) {
            self.write_slot(slot, &entry);
            return;
        }
        for i in 0..self.capacity {
            if !self.read_slot(i).is_occupied() {
                self.write_slot(i, &entry);
                return;
            }
        }
        let lru_slot = (0..self.capacity)
            .min_by_key(|&i| self.read_slot(i).last_used_epoch)
            .expect("capacity is always > 0");
        self.write_slot(lru_slot, &entry);
    }

    pub fn touch(&self, id: u64, current_epoch: u32) {
        if let Some(slot) = self.find_slot(id) {
            let mut entry = self.read_slot(slot);
            entry.last_used_epoch = current_epoch;
            self.write_slot(slot, &entry);
        }
    }

    pub fn get(&self, id: u64) -> Option<PatternEntry> {
        self.find_slot(id).map(|slot| self.read_slot(slot))
    }

    pub fn len(&self) -> usize {
        (0..self.capacity).filter(|&i| self.read_slot(i).is_occupied()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Small advisory graph of pattern relationships. Lives entirely
/// in-process: losing it on restart only costs some recommendation
/// quality, never correctness, so it isn't persisted to the arena.
#[derive(Default)]
pub struct KnowledgeGraph {
    edges: Mutex<HashMap<u64, Vec<u64>>>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&self, from: u64, to: u64) {
        let mut edges = self.edges.lock();
        let neighbors = edges.entry(from).or_default();
        if !neighbors.contains(&to) {
            neighbors.push(to);
        }
    }

    pub fn related(&self, id: u64) -> Vec<u64> {
        self.edges.lock().get(&id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ARENA_SIZE_DEFAULT;
    use crate::memory::InProcessMemory;

    fn cache() -> PatternCache {
        PatternCache::new(Arc::new(InProcessMemory::new(ARENA_SIZE_DEFAULT)))
    }

    fn entry(id: u64, epoch: u32) -> PatternEntry {
        PatternEntry {
            id,
            pattern_type: 1,
            confidence: 9000,
            payload_offset: 0,
            payload_size: 0,
            last_used_epoch: epoch,
        }
    }

    #[test]
    fn insert_and_get_round_trip() {
        let cache = cache();
        cache.insert(entry(42, 1));
        assert_eq!(cache.get(42).unwrap().confidence, 9000);
    }

    #[test]
    fn touch_updates_last_used_epoch() {
        let cache = cache();
        cache.insert(entry(1, 1));
        cache.touch(1, 99);
        assert_eq!(cache.get(1).unwrap().last_used_epoch, 99);
    }

    #[test]
    fn knowledge_graph_tracks_related_patterns() {
        let graph = KnowledgeGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(1, 3);
        let related = graph.related(1);
        assert_eq!(related.len(), 2);
        assert!(graph.related(999).is_empty());
    }
}
