//! Root Supervisor: owns the unit catalogue, the module registry, and
//! dispatches jobs by capability (spec §4.9, §4.7's "Unit Loader").
//!
//! Grounded on the teacher's `engine::ComputeEngine` (`register`/`execute`,
//! a `HashMap<String, Arc<dyn UnitProxy>>` keyed by service name) and
//! `executor::JobRegistry`'s validate-input/verify-output hooks, retargeted
//! from WASM compute units to this kernel's fixed [`Unit`](crate::units::Unit)
//! catalogue. Falls back to [`MeshDelegator`] for jobs with no matching
//! unit, same as the teacher's `UnknownService` case but routed outward
//! instead of returned as an error.
use crate::job::{Job, JobResult};
use crate::memory::MemoryProvider;
use crate::mesh::MeshDelegator;
use crate::registry::{catalogue, ModuleRegistry, RegistryError};
use crate::units::{self, Unit};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

pub struct Supervisor {
    units: HashMap<String, Box<dyn Unit>>,
    mesh: Arc<dyn MeshDelegator>,
    mesh_deadline: Duration,
    registry: Option<ModuleRegistry>,
    registry_capabilities: Vec<String>,
}

impl Supervisor {
    pub fn new(mesh: Arc<dyn MeshDelegator>, mesh_deadline: Duration) -> Self {
        let mut units = HashMap::new();
        for unit in units::always_instantiated() {
            units.insert(unit.capability().to_string(), unit);
        }
        Self {
            units,
            mesh,
            mesh_deadline,
            registry: None,
            registry_capabilities: Vec::new(),
        }
    }

    /// Registers a unit, instantiating it lazily on first dispatch if it
    /// isn't already one of the always-instantiated four.
    pub fn register(&mut self, unit: Box<dyn Unit>) {
        self.units.insert(unit.capability().to_string(), unit);
    }

    /// Materialises a unit for every arena-registered module id that also
    /// appears in the fixed catalogue (the Unit Loader, spec §4.7/§4.9), and
    /// folds the registry's declared capabilities into
    /// [`capability_registry`](Self::capability_registry). Ids outside the
    /// catalogue are left to `unit_for`'s generic fallback at dispatch time.
    pub fn load_registry(&mut self, registry: ModuleRegistry, mem: &dyn MemoryProvider) -> Result<(), RegistryError> {
        for id in registry.registered_ids() {
            if catalogue::is_known(id) && !self.units.contains_key(id) {
                self.units.insert(id.to_string(), units::by_id(id));
            }
        }
        self.registry_capabilities = registry.capability_ids(mem)?;
        self.registry = Some(registry);
        Ok(())
    }

    pub fn registry(&self) -> Option<&ModuleRegistry> {
        self.registry.as_ref()
    }

    fn unit_for(&mut self, capability: &str) -> &dyn Unit {
        if !self.units.contains_key(capability) {
            self.units.insert(capability.to_string(), units::by_id(capability));
        }
        self.units.get(capability).unwrap().as_ref()
    }

    /// Dispatches a job by capability: execute locally if a matching unit
    /// handles the operation, otherwise forward to the mesh. A failed mesh
    /// delegation for a pure job retries locally instead of failing outright
    /// (spec §4.12).
    #[instrument(skip(self, job), fields(capability = %job.capability, operation = %job.operation))]
    pub async fn dispatch(&mut self, job: &Job, now_ms: u64) -> JobResult {
        let unit = self.unit_for(&job.capability);
        if job.operation == "echo" || unit.operations().contains(&job.operation.as_str()) {
            return match unit.execute(&job.operation, &job.payload).await {
                Ok(output) => JobResult::success(job.id, output, now_ms),
                Err(err) => JobResult::failure(job.id, err.to_string(), now_ms),
            };
        }

        match self.mesh.delegate_job(job, self.mesh_deadline).await {
            Ok(result) => result,
            Err(err) => {
                if job.is_pure() {
                    warn!("mesh delegation failed for pure job {}, retrying locally: {}", job.id, err);
                    match unit.execute(&job.operation, &job.payload).await {
                        Ok(output) => JobResult::success(job.id, output, now_ms),
                        Err(err) => JobResult::failure(job.id, err.to_string(), now_ms),
                    }
                } else {
                    JobResult::failure(job.id, err.to_string(), now_ms)
                }
            }
        }
    }

    pub fn capability_registry(&self) -> Vec<String> {
        let mut entries = Vec::new();
        for unit in self.units.values() {
            for operation in unit.operations() {
                entries.push(format!("{}:{}:v1", unit.capability(), operation));
            }
        }
        // Capabilities the registry declares but that have no live unit yet
        // (registered, not dispatched to) surface as a wildcard entry; the
        // registry's CapabilityEntry rows carry no per-operation list.
        for capability in &self.registry_capabilities {
            if !self.units.contains_key(capability) {
                entries.push(format!("{}:*:v1", capability));
            }
        }
        entries.sort();
        entries.dedup();
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobOutcome as Outcome};
    use crate::mesh::NullMeshDelegator;

    fn supervisor() -> Supervisor {
        Supervisor::new(Arc::new(NullMeshDelegator), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn dispatches_to_a_local_unit() {
        let mut supervisor = supervisor();
        let job = Job::new("crypto", "hash", vec![1, 2, 3]);
        let result = supervisor.dispatch(&job, 0).await;
        assert!(matches!(result.outcome, Outcome::Success(ref data) if data == &[1, 2, 3]));
    }

    #[tokio::test]
    async fn pure_job_falls_back_locally_after_mesh_failure() {
        let mut supervisor = supervisor();
        let job = Job::new("crypto", "unsupported_op", vec![9]);
        let result = supervisor.dispatch(&job, 0).await;
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn capability_registry_lists_registered_operations() {
        let supervisor = supervisor();
        let registry = supervisor.capability_registry();
        assert!(registry.iter().any(|e| e.starts_with("boids:")));
    }

    #[tokio::test]
    async fn load_registry_materialises_a_catalogue_unit_not_yet_instantiated() {
        use crate::layout::ARENA_SIZE_DEFAULT;
        use crate::memory::InProcessMemory;
        use crate::registry::{find_slot_double_hashing, write_enhanced_entry, ModuleEntryBuilder};

        let mem: Arc<dyn MemoryProvider> = Arc::new(InProcessMemory::new(ARENA_SIZE_DEFAULT));
        let (entry, _, _) = ModuleEntryBuilder::new("crypto").build().unwrap();
        let (slot, _) = find_slot_double_hashing(mem.as_ref(), "crypto").unwrap();
        write_enhanced_entry(mem.as_ref(), slot, &entry).unwrap();

        let mut sup = supervisor();
        assert!(sup.registry().is_none());

        let registry = ModuleRegistry::load_from_arena(mem.as_ref()).unwrap();
        sup.load_registry(registry, mem.as_ref()).unwrap();

        assert!(sup.registry().is_some());
        let job = Job::new("crypto", "hash", vec![9, 9]);
        let result = sup.dispatch(&job, 0).await;
        assert!(matches!(result.outcome, Outcome::Success(ref data) if data == &[9, 9]));
    }
}
