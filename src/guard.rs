//! Region ownership and write-locking (spec §4.1, §5).
//!
//! Ported from the teacher's `guard.rs` almost field-for-field (owner
//! bitmask, CAS-guarded single-writer lock, multi-writer last-owner
//! bookkeeping, epoch-advanced-after-write check, `Drop`-based release) but
//! generalized over [`MemoryProvider`] instead of `SafeSAB`/`js_interop`, and
//! with `RegionId` expanded to the full region table in `layout`.

use crate::layout::{
    self, OFFSET_REGION_GUARDS, REGION_GUARD_COUNT, REGION_GUARD_ENTRY_SIZE,
};
use crate::memory::MemoryProvider;
use std::sync::Arc;

/// Region owner bitmask, shared across kernel / module / host participants.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionOwner {
    Kernel = 1 << 0,
    Module = 1 << 1,
    Host = 1 << 2,
    System = 1 << 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    SingleWriter,
    MultiWriter,
}

#[derive(Clone, Copy, Debug)]
pub struct RegionPolicy {
    pub region_id: u32,
    pub access: AccessMode,
    pub writer_mask: u32,
    pub reader_mask: u32,
    pub epoch_index: Option<u32>,
}

/// Regions governed by a write lock / ownership policy (spec §3 region
/// table). `Arena` covers the trailing hybrid-allocator sub-arena as a
/// single multi-writer region; individual allocations are serialized by the
/// allocator's own free-list locks, not by this guard.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionId {
    Inbox = 0,
    OutboxHost = 1,
    OutboxKernel = 2,
    MeshEventQueue = 3,
    ModuleRegistry = 4,
    Economics = 5,
    IdentityRegistry = 6,
    SocialGraph = 7,
    PatternExchange = 8,
    JobHistory = 9,
    Coordination = 10,
    Arena = 11,
}

pub fn policy_for(region: RegionId) -> RegionPolicy {
    match region {
        RegionId::Inbox => RegionPolicy {
            region_id: region as u32,
            access: AccessMode::SingleWriter,
            writer_mask: RegionOwner::Kernel as u32,
            reader_mask: RegionOwner::Module as u32 | RegionOwner::Host as u32,
            epoch_index: Some(layout::IDX_INBOX_DIRTY),
        },
        RegionId::OutboxHost => RegionPolicy {
            region_id: region as u32,
            access: AccessMode::SingleWriter,
            writer_mask: RegionOwner::Kernel as u32,
            reader_mask: RegionOwner::Host as u32,
            epoch_index: Some(layout::IDX_OUTBOX_HOST_DIRTY),
        },
        RegionId::OutboxKernel => RegionPolicy {
            region_id: region as u32,
            access: AccessMode::MultiWriter,
            writer_mask: RegionOwner::Module as u32,
            reader_mask: RegionOwner::Kernel as u32,
            epoch_index: Some(layout::IDX_OUTBOX_KERNEL_DIRTY),
        },
        RegionId::MeshEventQueue => RegionPolicy {
            region_id: region as u32,
            access: AccessMode::SingleWriter,
            writer_mask: RegionOwner::Kernel as u32,
            reader_mask: RegionOwner::Host as u32,
            epoch_index: Some(layout::IDX_MESH_EVENT_EPOCH),
        },
        RegionId::ModuleRegistry => RegionPolicy {
            region_id: region as u32,
            access: AccessMode::SingleWriter,
            writer_mask: RegionOwner::Kernel as u32,
            reader_mask: RegionOwner::Kernel as u32 | RegionOwner::Module as u32,
            epoch_index: Some(layout::IDX_REGISTRY_EPOCH),
        },
        RegionId::Economics => RegionPolicy {
            region_id: region as u32,
            access: AccessMode::SingleWriter,
            writer_mask: RegionOwner::Kernel as u32,
            reader_mask: RegionOwner::Kernel as u32 | RegionOwner::Host as u32,
            epoch_index: Some(layout::IDX_ECONOMY_EPOCH),
        },
        RegionId::IdentityRegistry => RegionPolicy {
            region_id: region as u32,
            access: AccessMode::SingleWriter,
            writer_mask: RegionOwner::Kernel as u32,
            reader_mask: RegionOwner::Kernel as u32 | RegionOwner::Host as u32,
            epoch_index: None,
        },
        RegionId::SocialGraph => RegionPolicy {
            region_id: region as u32,
            access: AccessMode::SingleWriter,
            writer_mask: RegionOwner::Kernel as u32,
            reader_mask: RegionOwner::Kernel as u32 | RegionOwner::Host as u32,
            epoch_index: None,
        },
        RegionId::PatternExchange => RegionPolicy {
            region_id: region as u32,
            access: AccessMode::MultiWriter,
            writer_mask: RegionOwner::Kernel as u32 | RegionOwner::Module as u32,
            reader_mask: RegionOwner::Kernel as u32 | RegionOwner::Module as u32,
            epoch_index: Some(layout::IDX_LEARNING_EPOCH),
        },
        RegionId::JobHistory => RegionPolicy {
            region_id: region as u32,
            access: AccessMode::SingleWriter,
            writer_mask: RegionOwner::Kernel as u32,
            reader_mask: RegionOwner::Kernel as u32 | RegionOwner::Host as u32,
            epoch_index: None,
        },
        RegionId::Coordination => RegionPolicy {
            region_id: region as u32,
            access: AccessMode::SingleWriter,
            writer_mask: RegionOwner::Kernel as u32,
            reader_mask: RegionOwner::Kernel as u32 | RegionOwner::Host as u32,
            epoch_index: Some(layout::IDX_MESH_EVENT_EPOCH),
        },
        RegionId::Arena => RegionPolicy {
            region_id: region as u32,
            access: AccessMode::MultiWriter,
            writer_mask: RegionOwner::Kernel as u32 | RegionOwner::Module as u32,
            reader_mask: RegionOwner::Kernel as u32
                | RegionOwner::Module as u32
                | RegionOwner::Host as u32,
            epoch_index: Some(layout::IDX_ARENA_ALLOCATOR),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    Unauthorized(&'static str),
    Locked(&'static str),
    OutOfRange(&'static str),
}

const GUARD_LOCK: u32 = 0;
const GUARD_LAST_EPOCH: u32 = 1;
const GUARD_VIOLATIONS: u32 = 2;
const GUARD_LAST_OWNER: u32 = 3;

fn guard_offset(region_id: u32, field: u32) -> usize {
    OFFSET_REGION_GUARDS + (region_id as usize) * REGION_GUARD_ENTRY_SIZE + (field as usize) * 4
}

fn increment_violation(mem: &dyn MemoryProvider, region_id: u32) {
    let _ = mem.atomic_add_u32(guard_offset(region_id, GUARD_VIOLATIONS), 1);
}

fn write_guard_word(mem: &dyn MemoryProvider, region_id: u32, field: u32, value: u32) {
    let _ = mem.atomic_store_u32(guard_offset(region_id, field), value);
}

fn cas_guard_word(mem: &dyn MemoryProvider, region_id: u32, field: u32, expected: u32, value: u32) -> bool {
    match mem.atomic_cas_u32(guard_offset(region_id, field), expected, value) {
        Ok(actual) => actual == expected,
        Err(_) => false,
    }
}

/// A live write authorization for one region. Dropping it without calling
/// [`RegionGuard::release`] still releases a single-writer lock, so a
/// panicking unit never wedges the region permanently.
pub struct RegionGuard {
    mem: Arc<dyn MemoryProvider>,
    policy: RegionPolicy,
    owner: RegionOwner,
    start_epoch: Option<u32>,
    released: bool,
}

impl RegionGuard {
    pub fn acquire_write(
        mem: Arc<dyn MemoryProvider>,
        policy: RegionPolicy,
        owner: RegionOwner,
    ) -> Result<Self, GuardError> {
        if (owner as u32) & policy.writer_mask == 0 {
            increment_violation(mem.as_ref(), policy.region_id);
            return Err(GuardError::Unauthorized("writer not allowed for region"));
        }
        if policy.region_id >= REGION_GUARD_COUNT as u32 {
            return Err(GuardError::OutOfRange("region id out of range"));
        }

        match policy.access {
            AccessMode::ReadOnly => {
                increment_violation(mem.as_ref(), policy.region_id);
                return Err(GuardError::Unauthorized("region is read-only"));
            }
            AccessMode::SingleWriter => {
                if !cas_guard_word(mem.as_ref(), policy.region_id, GUARD_LOCK, 0, owner as u32) {
                    increment_violation(mem.as_ref(), policy.region_id);
                    return Err(GuardError::Locked("region already locked"));
                }
            }
            AccessMode::MultiWriter => {
                write_guard_word(mem.as_ref(), policy.region_id, GUARD_LAST_OWNER, owner as u32);
            }
        }

        let start_epoch = policy
            .epoch_index
            .and_then(|idx| mem.atomic_load_u32(layout::OFFSET_EPOCH_ARRAY + idx as usize * 4).ok());

        Ok(Self {
            mem,
            policy,
            owner,
            start_epoch,
            released: false,
        })
    }

    pub fn validate_read(
        mem: &dyn MemoryProvider,
        policy: RegionPolicy,
        owner: RegionOwner,
    ) -> Result<(), GuardError> {
        if (owner as u32) & policy.reader_mask == 0 {
            increment_violation(mem, policy.region_id);
            return Err(GuardError::Unauthorized("reader not allowed for region"));
        }
        Ok(())
    }

    /// Verifies the region's epoch counter strictly advanced since acquire,
    /// if the region is epoch-signalled (spec §4.1/§5).
    pub fn ensure_epoch_advanced(&self) -> Result<(), GuardError> {
        let Some(idx) = self.policy.epoch_index else {
            return Ok(());
        };
        let Some(start) = self.start_epoch else {
            return Ok(());
        };
        let current = self
            .mem
            .atomic_load_u32(layout::OFFSET_EPOCH_ARRAY + idx as usize * 4)
            .unwrap_or(start);
        if current == start {
            increment_violation(self.mem.as_ref(), self.policy.region_id);
            return Err(GuardError::Unauthorized("epoch not advanced after write"));
        }
        write_guard_word(self.mem.as_ref(), self.policy.region_id, GUARD_LAST_EPOCH, current);
        Ok(())
    }

    pub fn release(mut self) -> Result<(), GuardError> {
        if self.released {
            return Ok(());
        }
        if self.policy.access == AccessMode::SingleWriter
            && !cas_guard_word(self.mem.as_ref(), self.policy.region_id, GUARD_LOCK, self.owner as u32, 0)
        {
            increment_violation(self.mem.as_ref(), self.policy.region_id);
            return Err(GuardError::Locked("release failed: lock owner mismatch"));
        }
        self.released = true;
        Ok(())
    }
}

impl Drop for RegionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.policy.access == AccessMode::SingleWriter {
            let _ = cas_guard_word(self.mem.as_ref(), self.policy.region_id, GUARD_LOCK, self.owner as u32, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InProcessMemory;

    fn mem() -> Arc<dyn MemoryProvider> {
        Arc::new(InProcessMemory::new(layout::ARENA_SIZE_DEFAULT))
    }

    #[test]
    fn single_writer_excludes_concurrent_acquire() {
        let mem = mem();
        let policy = policy_for(RegionId::Inbox);
        let g1 = RegionGuard::acquire_write(mem.clone(), policy, RegionOwner::Kernel).unwrap();
        let g2 = RegionGuard::acquire_write(mem.clone(), policy, RegionOwner::Kernel);
        assert!(matches!(g2, Err(GuardError::Locked(_))));
        drop(g1);
        assert!(RegionGuard::acquire_write(mem, policy, RegionOwner::Kernel).is_ok());
    }

    #[test]
    fn unauthorized_writer_is_rejected() {
        let mem = mem();
        let policy = policy_for(RegionId::OutboxHost);
        let result = RegionGuard::acquire_write(mem, policy, RegionOwner::Host);
        assert!(matches!(result, Err(GuardError::Unauthorized(_))));
    }

    #[test]
    fn epoch_must_advance_before_ensure_passes() {
        let mem = mem();
        let policy = policy_for(RegionId::Inbox);
        let guard = RegionGuard::acquire_write(mem.clone(), policy, RegionOwner::Kernel).unwrap();
        assert!(guard.ensure_epoch_advanced().is_err());
        mem.atomic_add_u32(layout::OFFSET_EPOCH_ARRAY + layout::IDX_INBOX_DIRTY as usize * 4, 1)
            .unwrap();
        assert!(guard.ensure_epoch_advanced().is_ok());
    }
}
