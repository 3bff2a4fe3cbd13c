//! Social graph: fixed 1248-byte records of owner/referrer DIDs plus up to
//! 15 "close" contacts (spec §4.9 ledger-shape Non-goal carve-out).
//!
//! Ported from the teacher's `social_graph.rs` record layout, generalized
//! from `SafeSAB` to [`MemoryProvider`] and reusing `identity.rs`'s
//! null-terminated string parser.

use crate::identity::parse_null_terminated;
use crate::layout::{OFFSET_SOCIAL_GRAPH, SOCIAL_ENTRY_SIZE};
use crate::memory::MemoryProvider;
use std::sync::Arc;

const MAX_CLOSE_IDS: usize = 15;
const DID_FIELD_SIZE: usize = 64;

pub struct SocialEntry {
    pub owner_did: String,
    pub referrer_did: String,
    pub close_ids: Vec<String>,
}

pub struct SocialGraph {
    mem: Arc<dyn MemoryProvider>,
}

impl SocialGraph {
    pub fn new(mem: Arc<dyn MemoryProvider>) -> Self {
        Self { mem }
    }

    fn slot_offset(&self, index: usize) -> usize {
        OFFSET_SOCIAL_GRAPH + index * SOCIAL_ENTRY_SIZE
    }

    pub fn get_entry(&self, index: usize) -> Result<SocialEntry, String> {
        let offset = self.slot_offset(index);
        let data = self
            .mem
            .read_at(offset, SOCIAL_ENTRY_SIZE)
            .map_err(|e| e.to_string())?;

        let owner_did = parse_null_terminated(&data[0..64]);
        let referrer_did = parse_null_terminated(&data[64..128]);

        let mut close_ids = Vec::new();
        for i in 0..MAX_CLOSE_IDS {
            let start = 128 + i * DID_FIELD_SIZE;
            let end = start + DID_FIELD_SIZE;
            let cid = parse_null_terminated(&data[start..end]);
            if !cid.is_empty() {
                close_ids.push(cid);
            }
        }

        Ok(SocialEntry {
            owner_did,
            referrer_did,
            close_ids,
        })
    }

    pub fn set_entry(&self, index: usize, entry: &SocialEntry) -> Result<(), String> {
        let offset = self.slot_offset(index);
        let mut data = vec![0u8; SOCIAL_ENTRY_SIZE];

        let owner_bytes = entry.owner_did.as_bytes();
        let owner_len = owner_bytes.len().min(DID_FIELD_SIZE - 1);
        data[0..owner_len].copy_from_slice(&owner_bytes[..owner_len]);

        let referrer_bytes = entry.referrer_did.as_bytes();
        let referrer_len = referrer_bytes.len().min(DID_FIELD_SIZE - 1);
        data[64..64 + referrer_len].copy_from_slice(&referrer_bytes[..referrer_len]);

        for (i, cid) in entry.close_ids.iter().take(MAX_CLOSE_IDS).enumerate() {
            let start = 128 + i * DID_FIELD_SIZE;
            let cid_bytes = cid.as_bytes();
            let cid_len = cid_bytes.len().min(DID_FIELD_SIZE - 1);
            data[start..start + cid_len].copy_from_slice(&cid_bytes[..cid_len]);
        }

        self.mem.write_at(offset, &data).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ARENA_SIZE_DEFAULT;
    use crate::memory::InProcessMemory;

    #[test]
    fn entry_round_trips_with_close_ids() {
        let mem: Arc<dyn MemoryProvider> = Arc::new(InProcessMemory::new(ARENA_SIZE_DEFAULT));
        let graph = SocialGraph::new(mem);
        let entry = SocialEntry {
            owner_did: "did:inos:owner".to_string(),
            referrer_did: "did:inos:referrer".to_string(),
            close_ids: vec!["did:inos:a".to_string(), "did:inos:b".to_string()],
        };
        graph.set_entry(0, &entry).unwrap();
        let read_back = graph.get_entry(0).unwrap();
        assert_eq!(read_back.owner_did, "did:inos:owner");
        assert_eq!(read_back.referrer_did, "did:inos:referrer");
        assert_eq!(read_back.close_ids, vec!["did:inos:a", "did:inos:b"]);
    }

    #[test]
    fn empty_close_id_slots_are_skipped() {
        let mem: Arc<dyn MemoryProvider> = Arc::new(InProcessMemory::new(ARENA_SIZE_DEFAULT));
        let graph = SocialGraph::new(mem);
        let entry = SocialEntry {
            owner_did: "did:inos:solo".to_string(),
            referrer_did: String::new(),
            close_ids: vec![],
        };
        graph.set_entry(1, &entry).unwrap();
        let read_back = graph.get_entry(1).unwrap();
        assert!(read_back.close_ids.is_empty());
        assert!(read_back.referrer_did.is_empty());
    }
}
