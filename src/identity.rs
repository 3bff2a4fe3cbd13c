//! Identity registry: fixed 128-byte DID records (spec §4.9 Non-goals list
//! identity as in-scope ledger shape; see `economics.rs` for the excluded
//! policy math).
//!
//! Ported from the teacher's `identity.rs` record layout and OnceCell-based
//! process identity globals, generalized from `SafeSAB` to
//! [`MemoryProvider`]. `init_identity_from_js` (which read JS globals
//! injected by a browser host) is replaced by [`init_identity`], which
//! takes the same three values as plain arguments since there's no JS
//! context to read them from natively.

use crate::layout::{IDENTITY_ENTRY_SIZE, OFFSET_IDENTITY_REGISTRY};
use crate::memory::MemoryProvider;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU32, Ordering};

static MODULE_ID: AtomicU32 = AtomicU32::new(0);
static NODE_ID: OnceCell<String> = OnceCell::new();
static DEVICE_ID: OnceCell<String> = OnceCell::new();
static DID: OnceCell<String> = OnceCell::new();

pub struct IdentityContext {
    node_id: String,
    module_id: u32,
}

impl IdentityContext {
    pub fn new(node_id: String, module_id: u32) -> Self {
        Self { node_id, module_id }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn module_id(&self) -> u32 {
        self.module_id
    }
}

#[derive(Debug, Clone)]
pub struct IdentityEntry {
    pub did: String,
    pub public_key: Vec<u8>,
    pub status: u8,
    pub account_offset: u32,
    pub social_offset: u32,
    pub recovery_threshold: u8,
    pub total_shares: u8,
    pub tier: u8,
    pub flags: u8,
}

pub struct IdentityRegistry {
    mem: std::sync::Arc<dyn MemoryProvider>,
}

impl IdentityRegistry {
    pub fn new(mem: std::sync::Arc<dyn MemoryProvider>) -> Self {
        Self { mem }
    }

    pub fn get_entry(&self, index: usize) -> Result<IdentityEntry, String> {
        let offset = OFFSET_IDENTITY_REGISTRY + index * IDENTITY_ENTRY_SIZE;
        let data = self
            .mem
            .read_at(offset, IDENTITY_ENTRY_SIZE)
            .map_err(|e| e.to_string())?;

        let did = parse_null_terminated(&data[0..64]);
        let public_key = data[64..97].to_vec();
        let status = data[97];
        let account_offset = u32::from_le_bytes([data[98], data[99], data[100], data[101]]);
        let social_offset = u32::from_le_bytes([data[102], data[103], data[104], data[105]]);
        let recovery_threshold = data[106];
        let total_shares = data[107];
        let tier = data[108];
        let flags = data[109];

        Ok(IdentityEntry {
            did,
            public_key,
            status,
            account_offset,
            social_offset,
            recovery_threshold,
            total_shares,
            tier,
            flags,
        })
    }

    pub fn set_entry(&self, index: usize, entry: &IdentityEntry) -> Result<(), String> {
        let offset = OFFSET_IDENTITY_REGISTRY + index * IDENTITY_ENTRY_SIZE;
        let mut data = [0u8; IDENTITY_ENTRY_SIZE];
        let did_bytes = entry.did.as_bytes();
        let did_len = did_bytes.len().min(63);
        data[0..did_len].copy_from_slice(&did_bytes[..did_len]);
        let key_len = entry.public_key.len().min(33);
        data[64..64 + key_len].copy_from_slice(&entry.public_key[..key_len]);
        data[97] = entry.status;
        data[98..102].copy_from_slice(&entry.account_offset.to_le_bytes());
        data[102..106].copy_from_slice(&entry.social_offset.to_le_bytes());
        data[106] = entry.recovery_threshold;
        data[107] = entry.total_shares;
        data[108] = entry.tier;
        data[109] = entry.flags;
        self.mem.write_at(offset, &data).map_err(|e| e.to_string())
    }
}

pub(crate) fn parse_null_terminated(data: &[u8]) -> String {
    let len = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..len]).to_string()
}

pub fn set_module_id(id: u32) {
    MODULE_ID.store(id, Ordering::SeqCst);
}

pub fn get_module_id() -> u32 {
    MODULE_ID.load(Ordering::SeqCst)
}

pub fn set_node_id(id: &str) {
    let _ = NODE_ID.set(id.to_string());
}

pub fn set_device_id(id: &str) {
    let _ = DEVICE_ID.set(id.to_string());
}

pub fn set_did(id: &str) {
    let _ = DID.set(id.to_string());
}

pub fn get_node_id() -> Option<&'static str> {
    NODE_ID.get().map(String::as_str)
}

pub fn get_device_id() -> Option<&'static str> {
    DEVICE_ID.get().map(String::as_str)
}

pub fn get_did() -> Option<&'static str> {
    DID.get().map(String::as_str)
}

/// Sets the process-wide identity context once at boot.
pub fn init_identity(node_id: &str, device_id: &str, did: &str) {
    set_node_id(node_id);
    set_device_id(device_id);
    set_did(did);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ARENA_SIZE_DEFAULT;
    use crate::memory::InProcessMemory;
    use std::sync::Arc;

    #[test]
    fn identity_entry_round_trips() {
        let mem: Arc<dyn MemoryProvider> = Arc::new(InProcessMemory::new(ARENA_SIZE_DEFAULT));
        let registry = IdentityRegistry::new(mem);
        let entry = IdentityEntry {
            did: "did:inos:abc".to_string(),
            public_key: vec![7; 33],
            status: 1,
            account_offset: 10,
            social_offset: 20,
            recovery_threshold: 2,
            total_shares: 3,
            tier: 1,
            flags: 0,
        };
        registry.set_entry(0, &entry).unwrap();
        let read_back = registry.get_entry(0).unwrap();
        assert_eq!(read_back.did, "did:inos:abc");
        assert_eq!(read_back.public_key, vec![7; 33]);
        assert_eq!(read_back.account_offset, 10);
    }
}
