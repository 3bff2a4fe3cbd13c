//! External interfaces: the host-facing surface a process embedding this
//! kernel calls into, and the event channel the kernel broadcasts out of
//! (spec §6).
//!
//! No teacher analogue: the teacher exposed this boundary through
//! `wasm_bindgen` exports called from JS. Native embedding has no FFI
//! boundary to cross, so `KernelHandle` is a plain Rust struct; the shape
//! of its methods (`initialize_shared_memory`, `get_kernel_stats`,
//! `submit_job`, `delegate_job`) still follows the named exports in spec §6
//! one for one. Event emission uses `tokio::sync::broadcast`, the same
//! channel type `bridge.rs`/`supervisor.rs` already build on for
//! router/executor message passing (SPEC_FULL §5).

use crate::bridge::{Bridge, OutboxTarget};
use crate::epoch::EpochArray;
use crate::error::{ExecutionError, LifecycleError};
use crate::job::{self, Job, JobResult};
use crate::layout::ARENA_SIZE_DEFAULT;
use crate::lifecycle::Lifecycle;
use crate::mesh::MeshDelegator;
use crate::memory::{InProcessMemory, MemoryProvider};
use crate::supervisor::Supervisor;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::instrument;

#[derive(Debug, Clone, Serialize)]
pub struct KernelEvent {
    pub event: &'static str,
    pub timestamp_ms: u64,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KernelStats {
    pub state: String,
    pub uptime_ms: u64,
    pub mesh: bool,
    pub supervisor: bool,
    pub particles: u64,
    pub sector: u64,
}

/// The host-facing handle into a running kernel. Owns the arena, the
/// lifecycle state machine, the bridge, and the supervisor; this is the
/// single object a native embedder constructs.
pub struct KernelHandle {
    mem: Arc<dyn MemoryProvider>,
    lifecycle: Arc<Lifecycle>,
    epochs: Arc<EpochArray>,
    bridge: Arc<Bridge>,
    supervisor: AsyncMutex<Supervisor>,
    events: broadcast::Sender<KernelEvent>,
    boot_ms: Mutex<u64>,
}

impl KernelHandle {
    pub fn new(mesh: Arc<dyn MeshDelegator>, mesh_deadline: Duration) -> Self {
        let mem: Arc<dyn MemoryProvider> = Arc::new(InProcessMemory::new(ARENA_SIZE_DEFAULT));
        let epochs = Arc::new(EpochArray::new(mem.clone()));
        let (events, _) = broadcast::channel(64);
        Self {
            bridge: Arc::new(Bridge::new(mem.clone(), epochs.clone())),
            mem,
            lifecycle: Arc::new(Lifecycle::new()),
            epochs,
            supervisor: AsyncMutex::new(Supervisor::new(mesh, mesh_deadline)),
            events,
            boot_ms: Mutex::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KernelEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: &'static str, now_ms: u64, data: Option<String>) {
        let _ = self.events.send(KernelEvent {
            event,
            timestamp_ms: now_ms,
            data,
        });
    }

    /// `Uninitialised -> Booting -> WaitingForSab`, emitting
    /// `kernel:waiting_for_sab`.
    #[instrument(skip(self))]
    pub fn boot(&self, now_ms: u64) -> Result<(), LifecycleError> {
        self.lifecycle.boot()?;
        self.emit("kernel:waiting_for_sab", now_ms, None);
        Ok(())
    }

    /// `initialize_shared_memory` / `inject_sab`: legal only while
    /// `WaitingForSab`. Emits `kernel:running` then `kernel:fully_operational`
    /// once the supervisor and bridge are both reachable. Scans the module
    /// registry (the Unit Loader, spec §4.7) so any module already written
    /// into the arena before boot is reflected in the supervisor's catalogue.
    #[instrument(skip(self))]
    pub fn initialize_shared_memory(&self, now_ms: u64) -> Result<(), LifecycleError> {
        self.lifecycle.inject_sab()?;
        *self.boot_ms.lock() = now_ms;
        self.load_module_registry();
        self.emit("kernel:running", now_ms, None);
        self.emit("kernel:fully_operational", now_ms, None);
        Ok(())
    }

    fn load_module_registry(&self) {
        match crate::registry::ModuleRegistry::load_from_arena(self.mem.as_ref()) {
            Ok(registry) if !registry.is_empty() => match self.supervisor.try_lock() {
                Ok(mut supervisor) => {
                    if let Err(e) = supervisor.load_registry(registry, self.mem.as_ref()) {
                        tracing::warn!("failed to load module registry into supervisor: {}", e);
                    }
                }
                Err(_) => tracing::warn!("supervisor busy, skipping module registry load at boot"),
            },
            Ok(_) => {}
            Err(e) => tracing::warn!("module registry scan failed: {}", e),
        }
    }

    pub fn get_shared_array_buffer(&self) -> Arc<dyn MemoryProvider> {
        self.mem.clone()
    }

    pub fn get_system_sab_address(&self) -> usize {
        0
    }

    pub fn get_system_sab_size(&self) -> usize {
        self.mem.size()
    }

    pub fn get_kernel_stats(&self, now_ms: u64) -> KernelStats {
        let boot_ms = *self.boot_ms.lock();
        KernelStats {
            state: self.lifecycle.state().as_str().to_string(),
            uptime_ms: now_ms.saturating_sub(boot_ms),
            mesh: true,
            supervisor: true,
            particles: 0,
            sector: 0,
        }
    }

    /// `submit_job`: enqueues `job` into the inbox for the routing loop to
    /// pick up, replying via `outbox_host`.
    pub fn submit_job(&self, job: Job) -> Result<String, ExecutionError> {
        self.lifecycle
            .require_running()
            .map_err(|e| ExecutionError::UnknownCapability(e.to_string()))?;
        let job_id = job.id.to_string();
        self.bridge.submit(job, OutboxTarget::Host)?;
        Ok(job_id)
    }

    /// `delegate_job`: same as `submit_job` but the result is routed to
    /// `outbox_kernel` for a module-originated syscall rather than a host
    /// response.
    pub fn delegate_job(&self, job: Job) -> Result<String, ExecutionError> {
        self.lifecycle
            .require_running()
            .map_err(|e| ExecutionError::UnknownCapability(e.to_string()))?;
        let job_id = job.id.to_string();
        self.bridge.submit(job, OutboxTarget::Kernel)?;
        Ok(job_id)
    }

    pub fn deserialize_result(&self, bytes: &[u8]) -> Result<JobResult, ExecutionError> {
        job::decode_result(bytes).map_err(|e| ExecutionError::UnknownCapability(e.to_string()))
    }

    /// Drains the inbox once through the supervisor. A real embedder runs
    /// this in a loop driven by `EpochArray::wait` on `inbox_dirty`.
    pub async fn drive_routing_loop(&self, now_ms: u64) -> usize {
        let mut supervisor = self.supervisor.lock().await;
        self.bridge.drain_once(&mut supervisor, now_ms).await
    }

    pub fn begin_shutdown(&self, now_ms: u64) -> Result<(), LifecycleError> {
        self.lifecycle.begin_shutdown()?;
        crate::lifecycle::request_shutdown(&self.mem).ok();
        self.emit("kernel:shutdown", now_ms, None);
        self.lifecycle.finish_shutdown()
    }

    pub fn report_panic(&self, cause: &str, now_ms: u64) {
        self.lifecycle.enter_panic(cause);
        self.emit("kernel:panic", now_ms, Some(cause.to_string()));
    }

    pub fn epochs(&self) -> &Arc<EpochArray> {
        &self.epochs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::NullMeshDelegator;

    fn booted_kernel() -> KernelHandle {
        let kernel = KernelHandle::new(Arc::new(NullMeshDelegator), Duration::from_millis(50));
        kernel.boot(0).unwrap();
        kernel.initialize_shared_memory(0).unwrap();
        kernel
    }

    #[test]
    fn boot_handshake_reaches_running_and_reports_stats() {
        let kernel = booted_kernel();
        assert_eq!(kernel.get_kernel_stats(100).state, "RUNNING");
    }

    #[tokio::test]
    async fn round_trip_job_via_host_surface() {
        let kernel = booted_kernel();
        let job = Job::new("data", "echo", vec![1, 2, 3, 4]);
        let job_id = kernel.submit_job(job).unwrap();
        assert!(!job_id.is_empty());

        let drained = kernel.drive_routing_loop(0).await;
        assert_eq!(drained, 1);
    }

    #[test]
    fn submit_job_before_boot_is_rejected() {
        let kernel = KernelHandle::new(Arc::new(NullMeshDelegator), Duration::from_millis(50));
        let job = Job::new("data", "echo", vec![1]);
        assert!(kernel.submit_job(job).is_err());
    }

    #[test]
    fn shutdown_flips_the_arena_flag_and_emits_event() {
        let kernel = booted_kernel();
        let mut events = kernel.subscribe();
        kernel.begin_shutdown(1).unwrap();
        assert!(crate::lifecycle::shutdown_requested(&kernel.get_shared_array_buffer()));
        let event = events.try_recv().unwrap();
        assert_eq!(event.event, "kernel:shutdown");
    }
}
