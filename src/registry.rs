//! Module registry: fixed-layout entries, double-hashing slot resolution,
//! dependency ordering (spec §4.7).
//!
//! `EnhancedModuleEntry`, `CapabilityEntry`, `DependencyEntry`,
//! `ModuleEntryBuilder` and the CRC32C/FNV-1a hashing are ported from the
//! teacher's `registry.rs` field-for-field, generalized from `SafeSAB` to
//! [`MemoryProvider`]. `dependency_order` (Kahn's algorithm) and
//! `recover_by_id` (linear fallback when a stored hash doesn't match its
//! own ID string) are new, added for spec requirements the teacher's
//! single-tab browser registry never needed.

use crate::error::RegistryError;
use crate::layout::{
    IDX_REGISTRY_EPOCH, MAX_MODULES_INLINE, MODULE_ENTRY_SIZE, OFFSET_EPOCH_ARRAY,
    OFFSET_MODULE_REGISTRY, OFFSET_REGISTRY_OVERFLOW, SIZE_REGISTRY_OVERFLOW,
};
use crate::memory::MemoryProvider;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Enhanced Module Registry Entry (96 bytes).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct EnhancedModuleEntry {
    pub signature: u64,
    pub id_hash: u32,
    pub version_major: u8,
    pub version_minor: u8,
    pub version_patch: u8,
    pub flags: u8,

    pub timestamp: u64,
    pub data_offset: u32,
    pub data_size: u32,

    pub resource_flags: u16,
    pub min_memory_mb: u16,
    pub min_gpu_memory_mb: u16,
    pub min_cpu_cores: u8,
    pub reserved1: u8,

    pub base_cost: u16,
    pub per_mb_cost: u8,
    pub per_second_cost: u16,
    pub reserved2: u8,

    pub dep_table_offset: u32,
    pub dep_count: u16,
    pub max_version_major: u8,
    pub min_version_major: u8,
    pub cap_table_offset: u32,
    pub cap_count: u16,
    pub reserved3: [u8; 2],

    pub module_id: [u8; 12],

    pub quick_hash: u32,

    pub reserved4: [u8; 16],
}

const _: [(); 96] = [(); std::mem::size_of::<EnhancedModuleEntry>()];

pub const REGISTRY_SIGNATURE: u64 = 0x494E4F5352454749;

pub const FLAG_HAS_EXTENDED_DATA: u8 = 0b0001;
pub const FLAG_IS_ACTIVE: u8 = 0b0010;
pub const FLAG_HAS_OVERFLOW: u8 = 0b0100;

pub const RESOURCE_CPU_INTENSIVE: u16 = 0b0001;
pub const RESOURCE_GPU_INTENSIVE: u16 = 0b0010;
pub const RESOURCE_MEMORY_INTENSIVE: u16 = 0b0100;
pub const RESOURCE_IO_INTENSIVE: u16 = 0b1000;
pub const RESOURCE_NETWORK_INTENSIVE: u16 = 0b10000;

impl EnhancedModuleEntry {
    pub fn new() -> Self {
        Self {
            signature: REGISTRY_SIGNATURE,
            id_hash: 0,
            version_major: 0,
            version_minor: 0,
            version_patch: 0,
            flags: 0,
            timestamp: 0,
            data_offset: 0,
            data_size: 0,
            resource_flags: 0,
            min_memory_mb: 0,
            min_gpu_memory_mb: 0,
            min_cpu_cores: 0,
            reserved1: 0,
            base_cost: 0,
            per_mb_cost: 0,
            per_second_cost: 0,
            reserved2: 0,
            dep_table_offset: 0,
            dep_count: 0,
            max_version_major: 255,
            min_version_major: 1,
            cap_table_offset: 0,
            cap_count: 0,
            reserved3: [0; 2],
            module_id: [0; 12],
            quick_hash: 0,
            reserved4: [0; 16],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.signature == REGISTRY_SIGNATURE && self.id_hash != 0
    }

    pub fn is_active(&self) -> bool {
        (self.flags & FLAG_IS_ACTIVE) != 0
    }

    pub fn set_active(&mut self) {
        self.flags |= FLAG_IS_ACTIVE;
    }

    pub fn set_flag(&mut self, flag: u8) {
        self.flags |= flag;
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        (self.flags & flag) != 0
    }

    pub fn set_resource_flag(&mut self, flag: u16) {
        self.resource_flags |= flag;
    }

    pub fn has_resource_flag(&self, flag: u16) -> bool {
        (self.resource_flags & flag) != 0
    }

    pub fn get_module_id(&self) -> String {
        let null_pos = self.module_id.iter().position(|&b| b == 0).unwrap_or(12);
        String::from_utf8_lossy(&self.module_id[..null_pos]).to_string()
    }
}

impl Default for EnhancedModuleEntry {
    fn default() -> Self {
        Self::new()
    }
}

// ========== CAPABILITY TABLE ==========

#[repr(C)]
#[derive(Clone, Copy)]
pub struct CapabilityEntry {
    pub id: [u8; 32],
    pub min_memory_mb: u16,
    pub flags: u8,
    pub reserved: u8,
}

pub const CAP_FLAG_REQUIRES_GPU: u8 = 0b0001;

impl CapabilityEntry {
    pub fn new(id: &str, requires_gpu: bool, min_memory_mb: u16) -> Self {
        let mut entry = Self {
            id: [0; 32],
            min_memory_mb,
            flags: if requires_gpu { CAP_FLAG_REQUIRES_GPU } else { 0 },
            reserved: 0,
        };
        let id_bytes = id.as_bytes();
        let copy_len = id_bytes.len().min(31);
        entry.id[..copy_len].copy_from_slice(&id_bytes[..copy_len]);
        entry
    }

    pub fn id_str(&self) -> String {
        crate::identity::parse_null_terminated(&self.id)
    }
}

// ========== HASHING ==========

pub fn crc32c_hash(data: &[u8]) -> u32 {
    const CRC32C_TABLE: [u32; 256] = generate_crc32c_table();
    let mut crc: u32 = 0xFFFFFFFF;
    for &byte in data {
        let index = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32C_TABLE[index];
    }
    !crc
}

const fn generate_crc32c_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0x82F63B78;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

pub fn fnv1a_hash(data: &[u8]) -> u32 {
    const FNV_PRIME: u32 = 0x01000193;
    const FNV_OFFSET: u32 = 0x811C9DC5;
    let mut hash = FNV_OFFSET;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

// ========== DOUBLE HASHING ==========

const MAX_PROBE_ATTEMPTS: usize = 128;

pub fn calculate_primary_slot(module_id: &str) -> usize {
    let hash = crc32c_hash(module_id.as_bytes());
    (hash as usize) % MAX_MODULES_INLINE
}

pub fn calculate_secondary_hash(module_id: &str) -> usize {
    let hash = fnv1a_hash(module_id.as_bytes());
    let step = (hash as usize) % (MAX_MODULES_INLINE - 1);
    if step % 2 == 0 { step + 1 } else { step }
}

/// Finds the slot for `module_id` by double hashing, returning
/// `(slot, is_new_registration)`.
pub fn find_slot_double_hashing(
    mem: &dyn MemoryProvider,
    module_id: &str,
) -> Result<(usize, bool), RegistryError> {
    let primary_slot = calculate_primary_slot(module_id);
    let secondary_hash = calculate_secondary_hash(module_id);
    let module_hash = crc32c_hash(module_id.as_bytes());

    let mut slot = primary_slot;
    for attempt in 0..MAX_PROBE_ATTEMPTS {
        let entry = read_enhanced_entry(mem, slot)?;
        if !entry.is_valid() {
            return Ok((slot, true));
        }
        if entry.id_hash == module_hash && entry.get_module_id() == module_id {
            return Ok((slot, false));
        }
        slot = (primary_slot + (attempt + 1) * secondary_hash) % MAX_MODULES_INLINE;
    }

    // Double hashing exhausted its probe sequence; fall back to a full
    // linear scan in case the slot we wanted is occupied by an entry whose
    // hash field was corrupted (its ID string is still the ground truth).
    if let Some((slot, entry)) = recover_by_id(mem, module_id)? {
        if entry.get_module_id() == module_id {
            return Ok((slot, false));
        }
    }

    Err(RegistryError::InlineRegistryFull(module_id.to_string()))
}

/// Scans every inline slot comparing the literal module-id string, ignoring
/// `id_hash`. Used when a hash field may have been corrupted but the ASCII
/// module id bytes are still intact (spec §4.7 hash/id correspondence
/// recovery).
pub fn recover_by_id(
    mem: &dyn MemoryProvider,
    module_id: &str,
) -> Result<Option<(usize, EnhancedModuleEntry)>, RegistryError> {
    for slot in 0..MAX_MODULES_INLINE {
        let entry = read_enhanced_entry(mem, slot)?;
        if entry.signature == REGISTRY_SIGNATURE && entry.get_module_id() == module_id {
            return Ok(Some((slot, entry)));
        }
    }
    Ok(None)
}

/// Recomputes `id_hash` from the entry's own ID bytes and returns a
/// corrected copy if the stored hash doesn't match. Callers write the
/// correction back with [`write_enhanced_entry`] if they want it persisted.
pub fn validate_and_recover(entry: &EnhancedModuleEntry) -> (EnhancedModuleEntry, bool) {
    let null_pos = entry.module_id.iter().position(|&b| b == 0).unwrap_or(12);
    let expected = crc32c_hash(&entry.module_id[..null_pos]);
    if expected != entry.id_hash {
        let mut corrected = *entry;
        corrected.id_hash = expected;
        (corrected, true)
    } else {
        (*entry, false)
    }
}

pub fn read_enhanced_entry(mem: &dyn MemoryProvider, slot: usize) -> Result<EnhancedModuleEntry, RegistryError> {
    if slot >= MAX_MODULES_INLINE {
        return Err(RegistryError::EntryCorrupt(slot));
    }
    let offset = OFFSET_MODULE_REGISTRY + slot * MODULE_ENTRY_SIZE;
    let bytes = mem
        .read_at(offset, MODULE_ENTRY_SIZE)
        .map_err(|_| RegistryError::EntryCorrupt(slot))?;
    let entry = unsafe { std::ptr::read(bytes.as_ptr() as *const EnhancedModuleEntry) };
    Ok(entry)
}

pub fn write_enhanced_entry(
    mem: &dyn MemoryProvider,
    slot: usize,
    entry: &EnhancedModuleEntry,
) -> Result<(), RegistryError> {
    if slot >= MAX_MODULES_INLINE {
        return Err(RegistryError::EntryCorrupt(slot));
    }
    let offset = OFFSET_MODULE_REGISTRY + slot * MODULE_ENTRY_SIZE;
    let bytes = unsafe {
        std::slice::from_raw_parts(entry as *const _ as *const u8, std::mem::size_of::<EnhancedModuleEntry>())
    };
    mem.write_at(offset, bytes).map_err(|_| RegistryError::EntryCorrupt(slot))
}

// ========== OVERFLOW ARENA (dependency / capability tables) ==========

/// Bump-allocates `size` bytes from the RegistryOverflow region. The first
/// 4 bytes of the region are the bump cursor itself.
fn allocate_overflow(mem: &dyn MemoryProvider, size: u32) -> Result<u32, RegistryError> {
    let aligned_size = (size + 3) & !3;
    let old_usage = mem
        .atomic_add_u32(OFFSET_REGISTRY_OVERFLOW, aligned_size)
        .map_err(|_| RegistryError::InlineRegistryFull("overflow arena".to_string()))?;
    let offset = 4 + old_usage;
    if (offset + aligned_size) as usize > SIZE_REGISTRY_OVERFLOW {
        return Err(RegistryError::InlineRegistryFull("overflow arena exhausted".to_string()));
    }
    Ok(OFFSET_REGISTRY_OVERFLOW as u32 + offset)
}

pub fn write_dependency_table(mem: &dyn MemoryProvider, deps: &[DependencyEntry]) -> Result<u32, RegistryError> {
    if deps.is_empty() {
        return Ok(0);
    }
    let size = std::mem::size_of_val(deps) as u32;
    let offset = allocate_overflow(mem, size)?;
    let bytes = unsafe { std::slice::from_raw_parts(deps.as_ptr() as *const u8, size as usize) };
    mem.write_at(offset as usize, bytes)
        .map_err(|_| RegistryError::InlineRegistryFull("dependency table write".to_string()))?;
    Ok(offset)
}

pub fn write_capability_table(mem: &dyn MemoryProvider, caps: &[CapabilityEntry]) -> Result<u32, RegistryError> {
    if caps.is_empty() {
        return Ok(0);
    }
    let size = std::mem::size_of_val(caps) as u32;
    let offset = allocate_overflow(mem, size)?;
    let bytes = unsafe { std::slice::from_raw_parts(caps.as_ptr() as *const u8, size as usize) };
    mem.write_at(offset as usize, bytes)
        .map_err(|_| RegistryError::InlineRegistryFull("capability table write".to_string()))?;
    Ok(offset)
}

pub fn read_dependency_table(
    mem: &dyn MemoryProvider,
    offset: u32,
    count: u16,
) -> Result<Vec<DependencyEntry>, RegistryError> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let size = count as usize * std::mem::size_of::<DependencyEntry>();
    let bytes = mem
        .read_at(offset as usize, size)
        .map_err(|_| RegistryError::EntryCorrupt(offset as usize))?;
    let mut out = Vec::with_capacity(count as usize);
    for chunk in bytes.chunks_exact(std::mem::size_of::<DependencyEntry>()) {
        out.push(unsafe { std::ptr::read(chunk.as_ptr() as *const DependencyEntry) });
    }
    Ok(out)
}

pub fn read_capability_table(
    mem: &dyn MemoryProvider,
    offset: u32,
    count: u16,
) -> Result<Vec<CapabilityEntry>, RegistryError> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let size = count as usize * std::mem::size_of::<CapabilityEntry>();
    let bytes = mem
        .read_at(offset as usize, size)
        .map_err(|_| RegistryError::EntryCorrupt(offset as usize))?;
    let mut out = Vec::with_capacity(count as usize);
    for chunk in bytes.chunks_exact(std::mem::size_of::<CapabilityEntry>()) {
        out.push(unsafe { std::ptr::read(chunk.as_ptr() as *const CapabilityEntry) });
    }
    Ok(out)
}

// ========== DEPENDENCY TABLE ==========

#[repr(C)]
#[derive(Clone, Copy)]
pub struct DependencyEntry {
    pub module_id_hash: u32,
    pub min_version_major: u8,
    pub min_version_minor: u8,
    pub min_version_patch: u8,
    pub max_version_major: u8,
    pub max_version_minor: u8,
    pub max_version_patch: u8,
    pub flags: u8,
    pub alternatives_offset: u16,
    pub reserved: [u8; 2],
}

pub const DEP_FLAG_OPTIONAL: u8 = 0b0001;
pub const DEP_FLAG_HAS_ALTERNATIVES: u8 = 0b0010;

impl DependencyEntry {
    pub fn new(module_id: &str, min_version: (u8, u8, u8), optional: bool) -> Self {
        Self {
            module_id_hash: crc32c_hash(module_id.as_bytes()),
            min_version_major: min_version.0,
            min_version_minor: min_version.1,
            min_version_patch: min_version.2,
            max_version_major: 255,
            max_version_minor: 255,
            max_version_patch: 255,
            flags: if optional { DEP_FLAG_OPTIONAL } else { 0 },
            alternatives_offset: 0,
            reserved: [0; 2],
        }
    }

    pub fn is_optional(&self) -> bool {
        (self.flags & DEP_FLAG_OPTIONAL) != 0
    }

    /// Projects the on-disk row into the form `dependency_order` consumes.
    pub fn to_requirement(&self) -> DependencyRequirement {
        DependencyRequirement {
            module_hash: self.module_id_hash,
            min_version: (self.min_version_major, self.min_version_minor, self.min_version_patch),
            max_version: (self.max_version_major, self.max_version_minor, self.max_version_patch),
            optional: self.is_optional(),
        }
    }
}

// ========== MODULE BUILDER ==========

#[derive(Default)]
pub struct ResourceProfile {
    pub flags: u16,
    pub min_memory_mb: u16,
    pub min_gpu_memory_mb: u16,
    pub min_cpu_cores: u8,
}

pub struct CostModel {
    pub base_cost: u16,
    pub per_mb_cost: u8,
    pub per_second_cost: u16,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            base_cost: 100,
            per_mb_cost: 10,
            per_second_cost: 1000,
        }
    }
}

pub struct ModuleEntryBuilder {
    id: String,
    version: (u8, u8, u8),
    dependencies: Vec<DependencyEntry>,
    capabilities: Vec<CapabilityEntry>,
    resource_profile: ResourceProfile,
    cost_model: CostModel,
    validation_errors: Vec<String>,
}

impl ModuleEntryBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            version: (1, 0, 0),
            dependencies: Vec::new(),
            capabilities: Vec::new(),
            resource_profile: ResourceProfile::default(),
            cost_model: CostModel::default(),
            validation_errors: Vec::new(),
        }
    }

    pub fn version(mut self, major: u8, minor: u8, patch: u8) -> Self {
        if major == 0 && minor == 0 && patch == 0 {
            self.validation_errors.push("Version cannot be 0.0.0".to_string());
        }
        self.version = (major, minor, patch);
        self
    }

    pub fn dependency(mut self, module_id: &str, min_version: (u8, u8, u8), optional: bool) -> Self {
        if module_id == self.id {
            self.validation_errors.push(format!("Module {} cannot depend on itself", self.id));
            return self;
        }
        if self
            .dependencies
            .iter()
            .any(|d| d.module_id_hash == crc32c_hash(module_id.as_bytes()))
        {
            self.validation_errors.push(format!("Duplicate dependency on {}", module_id));
            return self;
        }
        self.dependencies.push(DependencyEntry::new(module_id, min_version, optional));
        self
    }

    pub fn resource_profile(mut self, profile: ResourceProfile) -> Self {
        self.resource_profile = profile;
        self
    }

    pub fn cost_model(mut self, model: CostModel) -> Self {
        self.cost_model = model;
        self
    }

    pub fn capability(mut self, id: &str, requires_gpu: bool, min_memory_mb: u16) -> Self {
        self.capabilities.push(CapabilityEntry::new(id, requires_gpu, min_memory_mb));
        self
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = self.validation_errors.clone();
        if self.id.is_empty() {
            errors.push("Module ID cannot be empty".to_string());
        }
        if self.id.len() > 11 {
            errors.push(format!("Module ID '{}' too long (max 11 chars)", self.id));
        }
        if self.dependencies.len() > 255 {
            errors.push("Too many dependencies (max 255)".to_string());
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    pub fn build(self) -> Result<(EnhancedModuleEntry, Vec<DependencyEntry>, Vec<CapabilityEntry>), Vec<String>> {
        self.validate()?;

        let mut entry = EnhancedModuleEntry::new();
        entry.id_hash = crc32c_hash(self.id.as_bytes());
        entry.version_major = self.version.0;
        entry.version_minor = self.version.1;
        entry.version_patch = self.version.2;
        entry.timestamp = current_timestamp_ms();
        entry.resource_flags = self.resource_profile.flags;
        entry.min_memory_mb = self.resource_profile.min_memory_mb;
        entry.min_gpu_memory_mb = self.resource_profile.min_gpu_memory_mb;
        entry.min_cpu_cores = self.resource_profile.min_cpu_cores;
        entry.base_cost = self.cost_model.base_cost;
        entry.per_mb_cost = self.cost_model.per_mb_cost;
        entry.per_second_cost = self.cost_model.per_second_cost;
        entry.dep_count = self.dependencies.len() as u16;
        entry.cap_count = self.capabilities.len() as u16;

        let id_bytes = self.id.as_bytes();
        let copy_len = id_bytes.len().min(11);
        entry.module_id[..copy_len].copy_from_slice(&id_bytes[..copy_len]);
        entry.module_id[copy_len] = 0;

        entry.quick_hash = fnv1a_hash(&entry.module_id[..copy_len]);
        entry.set_active();

        Ok((entry, self.dependencies, self.capabilities))
    }
}

/// Bumps the registry epoch and wakes any parked waiters (spec §4.2/§4.7).
pub fn signal_registry_change(mem: &Arc<dyn MemoryProvider>, epochs: &crate::epoch::EpochArray) {
    let _ = mem;
    epochs.increment(IDX_REGISTRY_EPOCH);
}

fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

// ========== DEPENDENCY ORDERING ==========

/// A single declared dependency edge: the hash of the module depended on,
/// the `[min_version, max_version]` range the dependent accepts, and
/// whether its absence is tolerated (spec §4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DependencyRequirement {
    pub module_hash: u32,
    pub min_version: (u8, u8, u8),
    pub max_version: (u8, u8, u8),
    pub optional: bool,
}

/// One resolved module's identity, its own version, and its declared
/// dependency requirements, the minimal input `dependency_order` needs.
pub struct DependencyNode {
    pub id: String,
    pub id_hash: u32,
    pub version: (u8, u8, u8),
    pub depends_on: Vec<DependencyRequirement>,
}

fn version_in_range(version: (u8, u8, u8), min: (u8, u8, u8), max: (u8, u8, u8)) -> bool {
    version >= min && version <= max
}

fn format_version(version: (u8, u8, u8)) -> String {
    format!("{}.{}.{}", version.0, version.1, version.2)
}

/// Topologically orders modules so every dependency is initialized before
/// its dependents, via Kahn's algorithm (spec §4.7). An edge a -> b exists
/// iff b depends on a and a's resolved version falls within the range b
/// declared; a required dependency missing from the node set yields
/// `UnsatisfiedDependency`, and one present but out of range yields
/// `VersionIncompatibility`. Returns `CircularDependency` naming every
/// module still unresolved once Kahn's algorithm stalls.
pub fn dependency_order(nodes: &[DependencyNode]) -> Result<Vec<String>, RegistryError> {
    let index_by_hash: HashMap<u32, usize> = nodes.iter().enumerate().map(|(i, n)| (n.id_hash, i)).collect();

    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for (i, node) in nodes.iter().enumerate() {
        for req in &node.depends_on {
            match index_by_hash.get(&req.module_hash) {
                Some(&dep_idx) => {
                    let dep = &nodes[dep_idx];
                    if !version_in_range(dep.version, req.min_version, req.max_version) {
                        return Err(RegistryError::VersionIncompatibility {
                            module: node.id.clone(),
                            dependency: dep.id.clone(),
                            min: format_version(req.min_version),
                            max: format_version(req.max_version),
                            found: format_version(dep.version),
                        });
                    }
                    dependents[dep_idx].push(i);
                    in_degree[i] += 1;
                }
                None if req.optional => {}
                None => {
                    return Err(RegistryError::UnsatisfiedDependency {
                        module: node.id.clone(),
                        dependency: format!("0x{:08x}", req.module_hash),
                    });
                }
            }
        }
    }

    let mut queue: VecDeque<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(idx) = queue.pop_front() {
        order.push(nodes[idx].id.clone());
        for &dependent in &dependents[idx] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() != nodes.len() {
        let unresolved: Vec<String> = nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] != 0)
            .map(|(_, n)| n.id.clone())
            .collect();
        return Err(RegistryError::CircularDependency(unresolved));
    }

    Ok(order)
}

// ========== CATALOGUE / UNIT LOADER ==========

/// Fixed catalogue of module ids the unit loader knows how to materialise
/// (spec §4.7 supplemented, §4.9's closed unit catalogue), paralleling the
/// teacher's `auto_register::ALL_MODULES` list.
pub mod catalogue {
    pub struct KnownModule {
        pub id: &'static str,
        pub version: (u8, u8, u8),
    }

    pub const KNOWN_MODULES: &[KnownModule] = &[
        KnownModule { id: "storage", version: (1, 0, 0) },
        KnownModule { id: "gpu", version: (1, 0, 0) },
        KnownModule { id: "audio", version: (1, 0, 0) },
        KnownModule { id: "image", version: (1, 0, 0) },
        KnownModule { id: "crypto", version: (1, 0, 0) },
        KnownModule { id: "data", version: (1, 0, 0) },
        KnownModule { id: "boids", version: (1, 0, 0) },
        KnownModule { id: "driver", version: (1, 0, 0) },
        KnownModule { id: "identity", version: (1, 0, 0) },
        KnownModule { id: "analytics", version: (1, 0, 0) },
    ];

    /// Instantiated unconditionally even absent a registry entry; they back
    /// the kernel's always-on demos (spec §4.9).
    pub const ALWAYS_INSTANTIATED: &[&str] = &["boids", "analytics", "data", "gpu"];

    pub fn is_known(id: &str) -> bool {
        KNOWN_MODULES.iter().any(|m| m.id == id)
    }
}

/// The result of scanning the inline module registry: every slot whose
/// signature and active flag validate, keyed both by id string and by hash
/// (spec §4.7 `load_from_arena`).
#[derive(Default, Clone)]
pub struct ModuleRegistry {
    by_id: HashMap<String, EnhancedModuleEntry>,
    by_hash: HashMap<u32, EnhancedModuleEntry>,
}

impl ModuleRegistry {
    /// Scans all `MAX_MODULES_INLINE` slots, keeping only entries whose
    /// signature matches and whose `FLAG_IS_ACTIVE` bit is set. A corrupted
    /// `id_hash` is transparently corrected via `validate_and_recover`
    /// before indexing, so a reader never observes the stale hash.
    pub fn load_from_arena(mem: &dyn MemoryProvider) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        for slot in 0..MAX_MODULES_INLINE {
            let entry = read_enhanced_entry(mem, slot)?;
            if !entry.is_valid() || !entry.is_active() {
                continue;
            }
            let (entry, _) = validate_and_recover(&entry);
            registry.by_id.insert(entry.get_module_id(), entry);
            registry.by_hash.insert(entry.id_hash, entry);
        }
        Ok(registry)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&EnhancedModuleEntry> {
        self.by_id.get(id)
    }

    pub fn get_by_hash(&self, hash: u32) -> Option<&EnhancedModuleEntry> {
        self.by_hash.get(&hash)
    }

    pub fn registered_ids(&self) -> impl Iterator<Item = &str> {
        self.by_id.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Builds the [`DependencyNode`] set `dependency_order` needs, reading
    /// each entry's dependency table out of the overflow arena.
    pub fn dependency_nodes(&self, mem: &dyn MemoryProvider) -> Result<Vec<DependencyNode>, RegistryError> {
        let mut nodes = Vec::with_capacity(self.by_id.len());
        for entry in self.by_id.values() {
            let deps = read_dependency_table(mem, entry.dep_table_offset, entry.dep_count)?;
            nodes.push(DependencyNode {
                id: entry.get_module_id(),
                id_hash: entry.id_hash,
                version: (entry.version_major, entry.version_minor, entry.version_patch),
                depends_on: deps.iter().map(DependencyEntry::to_requirement).collect(),
            });
        }
        Ok(nodes)
    }

    /// Collects every distinct capability id declared across active
    /// entries' capability tables, for merging into the supervisor's
    /// dispatch table alongside capabilities derived from live units.
    pub fn capability_ids(&self, mem: &dyn MemoryProvider) -> Result<Vec<String>, RegistryError> {
        let mut ids = Vec::new();
        for entry in self.by_id.values() {
            let caps = read_capability_table(mem, entry.cap_table_offset, entry.cap_count)?;
            ids.extend(caps.iter().map(CapabilityEntry::id_str));
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ARENA_SIZE_DEFAULT;
    use crate::memory::InProcessMemory;

    fn mem() -> Arc<dyn MemoryProvider> {
        Arc::new(InProcessMemory::new(ARENA_SIZE_DEFAULT))
    }

    #[test]
    fn entry_size_is_96_bytes() {
        assert_eq!(std::mem::size_of::<EnhancedModuleEntry>(), 96);
        assert_eq!(std::mem::size_of::<CapabilityEntry>(), 36);
        assert_eq!(std::mem::size_of::<DependencyEntry>(), 16);
    }

    #[test]
    fn crc32c_is_stable_and_distinguishing() {
        assert_eq!(crc32c_hash(b"ml"), crc32c_hash(b"ml"));
        assert_ne!(crc32c_hash(b"ml"), crc32c_hash(b"gpu"));
    }

    #[test]
    fn module_builder_produces_active_entry() {
        let (entry, deps, _caps) = ModuleEntryBuilder::new("ml")
            .version(1, 0, 0)
            .dependency("gpu", (1, 0, 0), false)
            .dependency("storage", (1, 0, 0), false)
            .build()
            .unwrap();
        assert_eq!(entry.version_major, 1);
        assert_eq!(entry.dep_count, 2);
        assert!(entry.is_active());
        assert_eq!(entry.get_module_id(), "ml");
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn write_then_read_round_trips() {
        let mem = mem();
        let (entry, _, _) = ModuleEntryBuilder::new("gpu").build().unwrap();
        let (slot, is_new) = find_slot_double_hashing(mem.as_ref(), "gpu").unwrap();
        assert!(is_new);
        write_enhanced_entry(mem.as_ref(), slot, &entry).unwrap();
        let (slot2, is_new2) = find_slot_double_hashing(mem.as_ref(), "gpu").unwrap();
        assert_eq!(slot, slot2);
        assert!(!is_new2);
    }

    #[test]
    fn corrupted_hash_is_recovered_by_id() {
        let mem = mem();
        let (mut entry, _, _) = ModuleEntryBuilder::new("crypto").build().unwrap();
        let (slot, _) = find_slot_double_hashing(mem.as_ref(), "crypto").unwrap();
        entry.id_hash ^= 0xDEAD_BEEF; // simulate corruption
        write_enhanced_entry(mem.as_ref(), slot, &entry).unwrap();

        let (corrected, changed) = validate_and_recover(&entry);
        assert!(changed);
        assert_eq!(corrected.get_module_id(), "crypto");

        let recovered = recover_by_id(mem.as_ref(), "crypto").unwrap();
        assert_eq!(recovered.unwrap().0, slot);
    }

    fn requirement(id: &[u8], min: (u8, u8, u8), max: (u8, u8, u8), optional: bool) -> DependencyRequirement {
        DependencyRequirement { module_hash: crc32c_hash(id), min_version: min, max_version: max, optional }
    }

    #[test]
    fn dependency_order_resolves_before_dependents() {
        let nodes = vec![
            DependencyNode {
                id: "ml".to_string(),
                id_hash: crc32c_hash(b"ml"),
                version: (1, 0, 0),
                depends_on: vec![
                    requirement(b"gpu", (1, 0, 0), (255, 255, 255), false),
                    requirement(b"storage", (1, 0, 0), (255, 255, 255), false),
                ],
            },
            DependencyNode {
                id: "gpu".to_string(),
                id_hash: crc32c_hash(b"gpu"),
                version: (1, 2, 0),
                depends_on: vec![],
            },
            DependencyNode {
                id: "storage".to_string(),
                id_hash: crc32c_hash(b"storage"),
                version: (1, 0, 3),
                depends_on: vec![],
            },
        ];
        let order = dependency_order(&nodes).unwrap();
        let ml_pos = order.iter().position(|n| n == "ml").unwrap();
        let gpu_pos = order.iter().position(|n| n == "gpu").unwrap();
        let storage_pos = order.iter().position(|n| n == "storage").unwrap();
        assert!(gpu_pos < ml_pos);
        assert!(storage_pos < ml_pos);
    }

    #[test]
    fn dependency_cycle_is_detected() {
        let nodes = vec![
            DependencyNode {
                id: "a".to_string(),
                id_hash: crc32c_hash(b"a"),
                version: (1, 0, 0),
                depends_on: vec![requirement(b"b", (1, 0, 0), (255, 255, 255), false)],
            },
            DependencyNode {
                id: "b".to_string(),
                id_hash: crc32c_hash(b"b"),
                version: (1, 0, 0),
                depends_on: vec![requirement(b"a", (1, 0, 0), (255, 255, 255), false)],
            },
        ];
        assert!(matches!(dependency_order(&nodes), Err(RegistryError::CircularDependency(_))));
    }

    #[test]
    fn missing_required_dependency_is_unsatisfied() {
        let nodes = vec![DependencyNode {
            id: "ml".to_string(),
            id_hash: crc32c_hash(b"ml"),
            version: (1, 0, 0),
            depends_on: vec![requirement(b"gpu", (1, 0, 0), (255, 255, 255), false)],
        }];
        assert!(matches!(
            dependency_order(&nodes),
            Err(RegistryError::UnsatisfiedDependency { .. })
        ));
    }

    #[test]
    fn missing_optional_dependency_is_tolerated() {
        let nodes = vec![DependencyNode {
            id: "ml".to_string(),
            id_hash: crc32c_hash(b"ml"),
            version: (1, 0, 0),
            depends_on: vec![requirement(b"gpu", (1, 0, 0), (255, 255, 255), true)],
        }];
        assert_eq!(dependency_order(&nodes).unwrap(), vec!["ml".to_string()]);
    }

    #[test]
    fn resolved_version_outside_range_is_incompatible() {
        let nodes = vec![
            DependencyNode {
                id: "ml".to_string(),
                id_hash: crc32c_hash(b"ml"),
                version: (1, 0, 0),
                depends_on: vec![requirement(b"gpu", (2, 0, 0), (2, 9, 9), false)],
            },
            DependencyNode {
                id: "gpu".to_string(),
                id_hash: crc32c_hash(b"gpu"),
                version: (1, 4, 0),
                depends_on: vec![],
            },
        ];
        assert!(matches!(
            dependency_order(&nodes),
            Err(RegistryError::VersionIncompatibility { .. })
        ));
    }

    #[test]
    fn module_registry_dependency_nodes_tolerate_a_corrupted_id_hash() {
        let mem = mem();

        let (base_entry, _, _) = ModuleEntryBuilder::new("gpu").version(1, 2, 0).build().unwrap();
        let (base_slot, _) = find_slot_double_hashing(mem.as_ref(), "gpu").unwrap();
        write_enhanced_entry(mem.as_ref(), base_slot, &base_entry).unwrap();

        let dep = DependencyEntry::new("gpu", (1, 0, 0), false);
        let dep_table_offset = write_dependency_table(mem.as_ref(), &[dep]).unwrap();
        let (mut dependent_entry, _, _) = ModuleEntryBuilder::new("ml")
            .version(1, 0, 0)
            .dependency("gpu", (1, 0, 0), false)
            .build()
            .unwrap();
        dependent_entry.dep_table_offset = dep_table_offset;
        let (dependent_slot, _) = find_slot_double_hashing(mem.as_ref(), "ml").unwrap();
        write_enhanced_entry(mem.as_ref(), dependent_slot, &dependent_entry).unwrap();

        // Corrupt the stored hash for "gpu" directly in the arena, as if a
        // bit flip hit the slot between writes.
        let mut corrupted = read_enhanced_entry(mem.as_ref(), base_slot).unwrap();
        corrupted.id_hash ^= 0xDEAD_BEEF;
        write_enhanced_entry(mem.as_ref(), base_slot, &corrupted).unwrap();

        let registry = ModuleRegistry::load_from_arena(mem.as_ref()).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get_by_id("gpu").unwrap().id_hash == crc32c_hash(b"gpu"));

        let nodes = registry.dependency_nodes(mem.as_ref()).unwrap();
        let order = dependency_order(&nodes).unwrap();
        let gpu_pos = order.iter().position(|n| n == "gpu").unwrap();
        let ml_pos = order.iter().position(|n| n == "ml").unwrap();
        assert!(gpu_pos < ml_pos);
    }
}
