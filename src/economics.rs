//! Credit ledger: fixed-layout account records over the Economics region
//! (spec §4.9 ledger-shape Non-goal carve-out — the incentive/pricing
//! policy math the teacher's `credits.rs` built on top of this shape is
//! explicitly out of scope; see DESIGN.md).
//!
//! Record layout follows the same fixed-stride-over-raw-bytes style as
//! `identity.rs` and `social.rs`: a known offset and width per account,
//! read and written directly through the arena.

use crate::layout::{ACCOUNT_ENTRY_SIZE, OFFSET_ECONOMICS};
use crate::memory::MemoryProvider;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditAccount {
    pub balance: u64,
    pub reserved: u64,
    pub tier: u8,
}

impl CreditAccount {
    fn encode(&self) -> [u8; ACCOUNT_ENTRY_SIZE] {
        let mut buf = [0u8; ACCOUNT_ENTRY_SIZE];
        buf[0..8].copy_from_slice(&self.balance.to_le_bytes());
        buf[8..16].copy_from_slice(&self.reserved.to_le_bytes());
        buf[16] = self.tier;
        buf
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            balance: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            reserved: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            tier: bytes[16],
        }
    }
}

/// Account ledger over the Economics region. Balance mutation is a plain
/// read-modify-write through the caller's [`RegionGuard`](crate::guard::RegionGuard);
/// this type only knows the record shape, not the policy for crediting or
/// debiting.
pub struct CreditLedger {
    mem: Arc<dyn MemoryProvider>,
    capacity: usize,
}

impl CreditLedger {
    pub fn new(mem: Arc<dyn MemoryProvider>) -> Self {
        Self {
            capacity: crate::layout::SIZE_ECONOMICS / ACCOUNT_ENTRY_SIZE,
            mem,
        }
    }

    fn slot_offset(&self, index: usize) -> usize {
        OFFSET_ECONOMICS + index * ACCOUNT_ENTRY_SIZE
    }

    pub fn get(&self, index: usize) -> Result<CreditAccount, String> {
        if index >= self.capacity {
            return Err(format!("account index {index} out of range"));
        }
        let data = self
            .mem
            .read_at(self.slot_offset(index), ACCOUNT_ENTRY_SIZE)
            .map_err(|e| e.to_string())?;
        Ok(CreditAccount::decode(&data))
    }

    pub fn set(&self, index: usize, account: &CreditAccount) -> Result<(), String> {
        if index >= self.capacity {
            return Err(format!("account index {index} out of range"));
        }
        self.mem
            .write_at(self.slot_offset(index), &account.encode())
            .map_err(|e| e.to_string())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ARENA_SIZE_DEFAULT;
    use crate::memory::InProcessMemory;

    #[test]
    fn account_round_trips() {
        let mem: Arc<dyn MemoryProvider> = Arc::new(InProcessMemory::new(ARENA_SIZE_DEFAULT));
        let ledger = CreditLedger::new(mem);
        let account = CreditAccount {
            balance: 1000,
            reserved: 50,
            tier: 2,
        };
        ledger.set(3, &account).unwrap();
        assert_eq!(ledger.get(3).unwrap(), account);
    }

    #[test]
    fn out_of_range_index_errors() {
        let mem: Arc<dyn MemoryProvider> = Arc::new(InProcessMemory::new(ARENA_SIZE_DEFAULT));
        let ledger = CreditLedger::new(mem);
        assert!(ledger.get(ledger.capacity()).is_err());
    }
}
