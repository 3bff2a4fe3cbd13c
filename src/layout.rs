//! Arena region table and epoch index allocation (spec §3, §4.1).
//!
//! Ported from the teacher's `layout.rs` (fixed hex offsets, `align_offset`,
//! `validate_offset`, `get_region_name`, const-time no-overlap assertions),
//! renumbered to the region list and epoch ranges in the spec rather than the
//! teacher's browser-demo-specific regions (bird/matrix ping-pong buffers,
//! bloom filter, syscall table).

use crate::error::LayoutError;

pub const ARENA_SIZE_MIN: usize = 32 * 1024 * 1024;
pub const ARENA_SIZE_MAX: usize = 1024 * 1024 * 1024;
pub const ARENA_SIZE_DEFAULT: usize = ARENA_SIZE_MIN;

pub const ALIGNMENT_WORD: usize = 4;
pub const ALIGNMENT_CACHE_LINE: usize = 64;
pub const ALIGNMENT_PAGE: usize = 4096;

// ========== EPOCH INDEX ALLOCATION (spec §3) ==========

pub const EPOCH_COUNT: u32 = 192;

// 0-7: fixed system epochs
pub const IDX_KERNEL_READY: u32 = 0;
pub const IDX_INBOX_DIRTY: u32 = 1;
pub const IDX_OUTBOX_HOST_DIRTY: u32 = 2;
pub const IDX_PANIC_STATE: u32 = 3;
pub const IDX_SENSOR_EPOCH: u32 = 4;
pub const IDX_ACTOR_EPOCH: u32 = 5;
pub const IDX_STORAGE_EPOCH: u32 = 6;
pub const IDX_SYSTEM_EPOCH: u32 = 7;

// 8-15: pulse / visibility / power
pub const IDX_PULSE: u32 = 8;
pub const IDX_VISIBILITY: u32 = 9;
pub const IDX_POWER: u32 = 10;
// 11-15 reserved

// 16-31: extended system epochs
pub const IDX_ARENA_ALLOCATOR: u32 = 16;
pub const IDX_METRICS_EPOCH: u32 = 17;
pub const IDX_BIRD_EPOCH: u32 = 18;
pub const IDX_MATRIX_EPOCH: u32 = 19;
pub const IDX_PINGPONG_ACTIVE: u32 = 20;
pub const IDX_REGISTRY_EPOCH: u32 = 21;
pub const IDX_EVOLUTION_EPOCH: u32 = 22;
pub const IDX_HEALTH_EPOCH: u32 = 23;
pub const IDX_LEARNING_EPOCH: u32 = 24;
pub const IDX_ECONOMY_EPOCH: u32 = 25;
pub const IDX_BIRD_COUNT_EPOCH: u32 = 26;
pub const IDX_GLOBAL_METRICS_EPOCH: u32 = 27;
pub const IDX_OUTBOX_KERNEL_DIRTY: u32 = 28;
pub const IDX_CONTEXT_ID_HASH: u32 = 29;
// 30-31 reserved

// 32-47: job / mesh epochs
pub const IDX_DELEGATED_JOB_EPOCH: u32 = 32;
pub const IDX_USER_JOB_EPOCH: u32 = 33;
pub const IDX_DELEGATED_CHUNK_EPOCH: u32 = 34;
pub const IDX_MESH_EVENT_EPOCH: u32 = 35;
// 36-47 reserved

// 64-191: dynamic supervisor pool
pub const SUPERVISOR_POOL_BASE: u32 = 64;
pub const SUPERVISOR_POOL_SIZE: u32 = 128;

// ========== REGION TABLE (spec §3) ==========

/// Offset 0 is a single byte; the shutdown flag and epoch index 0 cannot
/// share it (spec §6 vs §3 both claim byte 0), so the shutdown flag gets its
/// own tiny region immediately before the epoch array. See DESIGN.md's open
/// question log for this resolution.
pub const OFFSET_SHUTDOWN_FLAG: usize = 0x0000;
pub const SIZE_SHUTDOWN_FLAG: usize = 0x0008;

pub const OFFSET_EPOCH_ARRAY: usize = OFFSET_SHUTDOWN_FLAG + SIZE_SHUTDOWN_FLAG;
pub const SIZE_EPOCH_ARRAY: usize = 0x0400; // 1024 B, room for 256 u32 counters

pub const OFFSET_EPOCH_ALLOCATOR_TABLE: usize = OFFSET_EPOCH_ARRAY + SIZE_EPOCH_ARRAY;
pub const SIZE_EPOCH_ALLOCATOR_TABLE: usize = 0x0040; // bitmap (128 bits) + next_index hint

pub const OFFSET_REGISTRY_LOCK: usize = OFFSET_EPOCH_ALLOCATOR_TABLE + SIZE_EPOCH_ALLOCATOR_TABLE;
pub const SIZE_REGISTRY_LOCK: usize = 0x0010;

pub const OFFSET_MODULE_REGISTRY: usize = OFFSET_REGISTRY_LOCK + SIZE_REGISTRY_LOCK;
pub const MODULE_ENTRY_SIZE: usize = 96;
pub const MAX_MODULES_INLINE: usize = 64;
pub const SIZE_MODULE_REGISTRY: usize = MODULE_ENTRY_SIZE * MAX_MODULES_INLINE;

pub const OFFSET_REGISTRY_OVERFLOW: usize = OFFSET_MODULE_REGISTRY + SIZE_MODULE_REGISTRY;
pub const SIZE_REGISTRY_OVERFLOW: usize = 0x004000; // dependency/capability tables

pub const OFFSET_SUPERVISOR_HEADERS: usize = OFFSET_REGISTRY_OVERFLOW + SIZE_REGISTRY_OVERFLOW;
pub const SIZE_SUPERVISOR_HEADERS: usize = 0x001000;
pub const MAX_SUPERVISORS_INLINE: usize = 32;

pub const OFFSET_ECONOMICS: usize = OFFSET_SUPERVISOR_HEADERS + SIZE_SUPERVISOR_HEADERS;
pub const SIZE_ECONOMICS: usize = 0x004000;
pub const ACCOUNT_ENTRY_SIZE: usize = 24;

pub const OFFSET_IDENTITY_REGISTRY: usize = OFFSET_ECONOMICS + SIZE_ECONOMICS;
pub const SIZE_IDENTITY_REGISTRY: usize = 0x004000;
pub const IDENTITY_ENTRY_SIZE: usize = 128;

pub const OFFSET_SOCIAL_GRAPH: usize = OFFSET_IDENTITY_REGISTRY + SIZE_IDENTITY_REGISTRY;
pub const SIZE_SOCIAL_GRAPH: usize = 0x004000;
pub const SOCIAL_ENTRY_SIZE: usize = 1248;

pub const OFFSET_PATTERN_EXCHANGE: usize = OFFSET_SOCIAL_GRAPH + SIZE_SOCIAL_GRAPH;
pub const SIZE_PATTERN_EXCHANGE: usize = 0x010000;
pub const PATTERN_ENTRY_SIZE: usize = 64;

pub const OFFSET_JOB_HISTORY: usize = OFFSET_PATTERN_EXCHANGE + SIZE_PATTERN_EXCHANGE;
pub const SIZE_JOB_HISTORY: usize = 0x020000;

pub const OFFSET_COORDINATION: usize = OFFSET_JOB_HISTORY + SIZE_JOB_HISTORY;
pub const SIZE_COORDINATION: usize = 0x010000;
/// Mesh event head/tail/dropped counters live at the start of Coordination.
pub const OFFSET_MESH_EVENT_HEAD: usize = OFFSET_COORDINATION;
pub const OFFSET_MESH_EVENT_TAIL: usize = OFFSET_COORDINATION + 4;
pub const OFFSET_MESH_EVENT_DROPPED: usize = OFFSET_COORDINATION + 8;

pub const OFFSET_REGION_GUARDS: usize = OFFSET_COORDINATION + SIZE_COORDINATION;
pub const REGION_GUARD_ENTRY_SIZE: usize = 16; // 4 x u32
pub const REGION_GUARD_COUNT: usize = 16;
pub const SIZE_REGION_GUARDS: usize = REGION_GUARD_ENTRY_SIZE * REGION_GUARD_COUNT;

pub const OFFSET_INBOX: usize = OFFSET_REGION_GUARDS + SIZE_REGION_GUARDS;
pub const SIZE_INBOX: usize = 0x080000;

pub const OFFSET_OUTBOX_HOST: usize = OFFSET_INBOX + SIZE_INBOX;
pub const SIZE_OUTBOX_HOST: usize = 0x080000;

pub const OFFSET_OUTBOX_KERNEL: usize = OFFSET_OUTBOX_HOST + SIZE_OUTBOX_HOST;
pub const SIZE_OUTBOX_KERNEL: usize = 0x080000;

pub const MESSAGE_SLOT_SIZE: usize = 256;
pub const MESSAGE_HEADER_SIZE: usize = 32;
pub const MESSAGE_PAYLOAD_SIZE: usize = 224;
pub const MSG_MAGIC: u64 = 0x4D53475F45504F43; // "MSG_EPOC"

/// Everything from here to the end of the arena is the hybrid allocator's
/// sub-arena (slab classes + buddy levels), per spec §4.4-§4.6.
pub const OFFSET_ARENA: usize = OFFSET_OUTBOX_KERNEL + SIZE_OUTBOX_KERNEL;

pub struct Region {
    pub name: &'static str,
    pub offset: usize,
    pub size: usize,
}

pub const REGIONS: &[Region] = &[
    Region {
        name: "ShutdownFlag",
        offset: OFFSET_SHUTDOWN_FLAG,
        size: SIZE_SHUTDOWN_FLAG,
    },
    Region {
        name: "EpochArray",
        offset: OFFSET_EPOCH_ARRAY,
        size: SIZE_EPOCH_ARRAY,
    },
    Region {
        name: "EpochAllocatorTable",
        offset: OFFSET_EPOCH_ALLOCATOR_TABLE,
        size: SIZE_EPOCH_ALLOCATOR_TABLE,
    },
    Region {
        name: "RegistryLock",
        offset: OFFSET_REGISTRY_LOCK,
        size: SIZE_REGISTRY_LOCK,
    },
    Region {
        name: "ModuleRegistry",
        offset: OFFSET_MODULE_REGISTRY,
        size: SIZE_MODULE_REGISTRY,
    },
    Region {
        name: "RegistryOverflow",
        offset: OFFSET_REGISTRY_OVERFLOW,
        size: SIZE_REGISTRY_OVERFLOW,
    },
    Region {
        name: "SupervisorHeaders",
        offset: OFFSET_SUPERVISOR_HEADERS,
        size: SIZE_SUPERVISOR_HEADERS,
    },
    Region {
        name: "Economics",
        offset: OFFSET_ECONOMICS,
        size: SIZE_ECONOMICS,
    },
    Region {
        name: "IdentityRegistry",
        offset: OFFSET_IDENTITY_REGISTRY,
        size: SIZE_IDENTITY_REGISTRY,
    },
    Region {
        name: "SocialGraph",
        offset: OFFSET_SOCIAL_GRAPH,
        size: SIZE_SOCIAL_GRAPH,
    },
    Region {
        name: "PatternExchange",
        offset: OFFSET_PATTERN_EXCHANGE,
        size: SIZE_PATTERN_EXCHANGE,
    },
    Region {
        name: "JobHistory",
        offset: OFFSET_JOB_HISTORY,
        size: SIZE_JOB_HISTORY,
    },
    Region {
        name: "Coordination",
        offset: OFFSET_COORDINATION,
        size: SIZE_COORDINATION,
    },
    Region {
        name: "RegionGuards",
        offset: OFFSET_REGION_GUARDS,
        size: SIZE_REGION_GUARDS,
    },
    Region {
        name: "Inbox",
        offset: OFFSET_INBOX,
        size: SIZE_INBOX,
    },
    Region {
        name: "OutboxHost",
        offset: OFFSET_OUTBOX_HOST,
        size: SIZE_OUTBOX_HOST,
    },
    Region {
        name: "OutboxKernel",
        offset: OFFSET_OUTBOX_KERNEL,
        size: SIZE_OUTBOX_KERNEL,
    },
];

pub fn regions() -> &'static [Region] {
    REGIONS
}

/// Validates the fixed-region table against an arena of `size` bytes: no
/// region overlaps another, and every region fits inside `size` (spec §4.1).
pub fn validate_layout(size: usize) -> Result<(), LayoutError> {
    if size < ARENA_SIZE_MIN {
        return Err(LayoutError::SabTooSmall {
            size,
            min: ARENA_SIZE_MIN,
        });
    }
    if size > ARENA_SIZE_MAX {
        return Err(LayoutError::SabTooLarge {
            size,
            max: ARENA_SIZE_MAX,
        });
    }

    let mut sorted: Vec<&Region> = REGIONS.iter().collect();
    sorted.sort_by_key(|r| r.offset);
    for pair in sorted.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a.offset + a.size > b.offset {
            return Err(LayoutError::RegionOverlap { a: a.name, b: b.name });
        }
    }
    if let Some(last) = sorted.last() {
        if last.offset + last.size > OFFSET_ARENA {
            return Err(LayoutError::RegionOverlap {
                a: last.name,
                b: "Arena",
            });
        }
    }
    if OFFSET_ARENA > size {
        return Err(LayoutError::SabTooSmall {
            size,
            min: OFFSET_ARENA,
        });
    }
    Ok(())
}

/// Returns the fixed region containing `offset`, or `None` if it falls in
/// the trailing Arena sub-allocator range (which has no single fixed size).
pub fn region_of(offset: usize) -> Option<&'static Region> {
    REGIONS.iter().find(|r| offset >= r.offset && offset < r.offset + r.size)
}

pub fn get_region_name(offset: usize) -> &'static str {
    region_of(offset).map(|r| r.name).unwrap_or("Arena")
}

/// Refuses a write outside the bounds of the single region it targets.
pub fn check_write(offset: usize, size: usize, arena_size: usize) -> Result<(), LayoutError> {
    check_bounds(offset, size, arena_size)
}

pub fn check_read(offset: usize, size: usize, arena_size: usize) -> Result<(), LayoutError> {
    check_bounds(offset, size, arena_size)
}

fn check_bounds(offset: usize, size: usize, arena_size: usize) -> Result<(), LayoutError> {
    let end = offset.checked_add(size).ok_or(LayoutError::OffsetOutOfBounds {
        offset,
        size,
        arena_size,
    })?;
    if end > arena_size {
        return Err(LayoutError::OffsetOutOfBounds {
            offset,
            size,
            arena_size,
        });
    }
    if offset >= OFFSET_ARENA {
        return Ok(());
    }
    match region_of(offset) {
        Some(r) if end <= r.offset + r.size => Ok(()),
        Some(r) => Err(LayoutError::OffsetOutOfBounds {
            offset,
            size,
            arena_size: r.offset + r.size,
        }),
        None => Err(LayoutError::OffsetOutOfBounds {
            offset,
            size,
            arena_size,
        }),
    }
}

pub const fn align_offset(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_region_overlaps() {
        assert!(validate_layout(ARENA_SIZE_DEFAULT).is_ok());
    }

    #[test]
    fn rejects_undersized_arena() {
        assert!(matches!(
            validate_layout(1024),
            Err(LayoutError::SabTooSmall { .. })
        ));
    }

    #[test]
    fn region_lookup() {
        assert_eq!(get_region_name(OFFSET_MODULE_REGISTRY), "ModuleRegistry");
        assert_eq!(get_region_name(OFFSET_INBOX), "Inbox");
        assert_eq!(get_region_name(OFFSET_ARENA + 1024), "Arena");
    }

    #[test]
    fn alignment_rounds_up() {
        assert_eq!(align_offset(0, 64), 0);
        assert_eq!(align_offset(1, 64), 64);
        assert_eq!(align_offset(65, 64), 128);
    }

    #[test]
    fn check_write_rejects_cross_region_span() {
        let arena_size = ARENA_SIZE_DEFAULT;
        let last_byte_of_registry = OFFSET_MODULE_REGISTRY + SIZE_MODULE_REGISTRY - 1;
        assert!(check_write(last_byte_of_registry, 2, arena_size).is_err());
    }
}
