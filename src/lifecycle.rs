//! Kernel lifecycle state machine and SAB injection handshake (spec §4.11).
//!
//! Grounded on the teacher's `logging::init_logging` panic-hook pattern
//! (captured here in [`install_panic_hook`]) and on the CAS-guarded
//! single-writer style `guard.rs` already uses for region locks; the state
//! machine itself has no direct teacher analogue since the teacher's kernel
//! boot sequence lived in JS glue around `wasm_bindgen` exports.

use crate::error::LifecycleError;
use crate::layout::OFFSET_SHUTDOWN_FLAG;
use crate::memory::MemoryProvider;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KernelState {
    Uninitialised = 0,
    Booting = 1,
    WaitingForSab = 2,
    Running = 3,
    Stopping = 4,
    Stopped = 5,
    Panic = 6,
}

impl KernelState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => KernelState::Uninitialised,
            1 => KernelState::Booting,
            2 => KernelState::WaitingForSab,
            3 => KernelState::Running,
            4 => KernelState::Stopping,
            5 => KernelState::Stopped,
            _ => KernelState::Panic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KernelState::Uninitialised => "UNINITIALISED",
            KernelState::Booting => "BOOTING",
            KernelState::WaitingForSab => "WAITING_FOR_SAB",
            KernelState::Running => "RUNNING",
            KernelState::Stopping => "STOPPING",
            KernelState::Stopped => "STOPPED",
            KernelState::Panic => "PANIC",
        }
    }
}

/// Drives the kernel through `Uninitialised -> Booting -> WaitingForSab ->
/// Running -> Stopping -> Stopped`, with an orthogonal `Panic` state that
/// absorbs catastrophic errors from any point.
pub struct Lifecycle {
    state: AtomicU8,
    sab_ready: Mutex<bool>,
    sab_ready_cv: Condvar,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(KernelState::Uninitialised as u8),
            sab_ready: Mutex::new(false),
            sab_ready_cv: Condvar::new(),
        }
    }

    pub fn state(&self) -> KernelState {
        KernelState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: KernelState, to: KernelState) -> Result<(), LifecycleError> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|actual| LifecycleError::IllegalTransition {
                from: KernelState::from_u8(actual).as_str().to_string(),
                to: to.as_str().to_string(),
            })
    }

    /// `Uninitialised -> Booting -> WaitingForSab`.
    pub fn boot(&self) -> Result<(), LifecycleError> {
        self.transition(KernelState::Uninitialised, KernelState::Booting)?;
        self.transition(KernelState::Booting, KernelState::WaitingForSab)
    }

    /// Legal only in `WaitingForSab`. Calling it again once `Running` is a
    /// no-op warning rather than an error, matching the spec's idempotence
    /// requirement for repeated injection.
    pub fn inject_sab(&self) -> Result<(), LifecycleError> {
        if self.state() == KernelState::Running {
            warn!("inject_sab called while already Running; ignoring");
            return Ok(());
        }
        self.transition(KernelState::WaitingForSab, KernelState::Running)?;
        let mut ready = self.sab_ready.lock();
        *ready = true;
        self.sab_ready_cv.notify_all();
        Ok(())
    }

    /// Blocks the calling thread until `inject_sab` has fired, or the
    /// timeout elapses.
    pub fn wait_for_sab_ready(&self, timeout: std::time::Duration) -> bool {
        let mut ready = self.sab_ready.lock();
        if *ready {
            return true;
        }
        let result = self.sab_ready_cv.wait_for(&mut ready, timeout);
        *ready && !result.timed_out()
    }

    pub fn begin_shutdown(&self) -> Result<(), LifecycleError> {
        self.transition(KernelState::Running, KernelState::Stopping)
    }

    pub fn finish_shutdown(&self) -> Result<(), LifecycleError> {
        if self.state() == KernelState::Stopped {
            return Ok(());
        }
        self.transition(KernelState::Stopping, KernelState::Stopped)
    }

    /// Unconditionally moves to `Panic` from any state and logs the cause.
    /// Never fails: a kernel already mid-panic just absorbs another report.
    pub fn enter_panic(&self, cause: &str) {
        error!("kernel:panic {}", cause);
        self.state.store(KernelState::Panic as u8, Ordering::SeqCst);
    }

    pub fn require_running(&self) -> Result<(), LifecycleError> {
        if self.state() == KernelState::Panic {
            return Err(LifecycleError::Panic("kernel is in Panic state".to_string()));
        }
        if self.state() != KernelState::Running {
            return Err(LifecycleError::SabNotInjected);
        }
        Ok(())
    }
}

/// Polls the 1-byte shutdown flag at [`OFFSET_SHUTDOWN_FLAG`]. The host
/// sets this byte to request a graceful stop without tearing down the
/// arena out from under in-flight readers.
pub fn shutdown_requested(mem: &Arc<dyn MemoryProvider>) -> bool {
    mem.read_at(OFFSET_SHUTDOWN_FLAG, 1)
        .map(|b| b[0] != 0)
        .unwrap_or(false)
}

pub fn request_shutdown(mem: &Arc<dyn MemoryProvider>) -> Result<(), LifecycleError> {
    mem.write_at(OFFSET_SHUTDOWN_FLAG, &[1u8])
        .map_err(|_| LifecycleError::SabNotInjected)
}

/// Installs a panic hook that captures source location and reports through
/// tracing instead of crashing the host silently. Mirrors the teacher's
/// `logging::init_logging` panic hook in structure.
pub fn install_panic_hook() {
    crate::logging::init_logging();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ARENA_SIZE_DEFAULT;
    use crate::memory::InProcessMemory;
    use std::time::Duration;

    #[test]
    fn boot_handshake_reaches_running() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), KernelState::Uninitialised);
        lifecycle.boot().unwrap();
        assert_eq!(lifecycle.state(), KernelState::WaitingForSab);
        lifecycle.inject_sab().unwrap();
        assert_eq!(lifecycle.state(), KernelState::Running);
    }

    #[test]
    fn inject_sab_before_boot_is_illegal() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.inject_sab().is_err());
    }

    #[test]
    fn inject_sab_while_running_is_idempotent() {
        let lifecycle = Lifecycle::new();
        lifecycle.boot().unwrap();
        lifecycle.inject_sab().unwrap();
        assert!(lifecycle.inject_sab().is_ok());
        assert_eq!(lifecycle.state(), KernelState::Running);
    }

    #[test]
    fn shutdown_sequence_reaches_stopped() {
        let lifecycle = Lifecycle::new();
        lifecycle.boot().unwrap();
        lifecycle.inject_sab().unwrap();
        lifecycle.begin_shutdown().unwrap();
        lifecycle.finish_shutdown().unwrap();
        assert_eq!(lifecycle.state(), KernelState::Stopped);
    }

    #[test]
    fn panic_is_reachable_from_any_state() {
        let lifecycle = Lifecycle::new();
        lifecycle.enter_panic("arena corrupted");
        assert_eq!(lifecycle.state(), KernelState::Panic);
        assert!(lifecycle.require_running().is_err());
    }

    #[test]
    fn wait_for_sab_ready_unblocks_on_injection() {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.boot().unwrap();
        let waiter = lifecycle.clone();
        let handle = std::thread::spawn(move || waiter.wait_for_sab_ready(Duration::from_secs(2)));
        std::thread::sleep(Duration::from_millis(20));
        lifecycle.inject_sab().unwrap();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn shutdown_flag_round_trips_through_memory() {
        let mem: Arc<dyn MemoryProvider> = Arc::new(InProcessMemory::new(ARENA_SIZE_DEFAULT));
        assert!(!shutdown_requested(&mem));
        request_shutdown(&mem).unwrap();
        assert!(shutdown_requested(&mem));
    }
}
