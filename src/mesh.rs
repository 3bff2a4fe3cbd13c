//! Mesh delegation: the single point where a job crosses outside this
//! process (spec §4.12).
//!
//! The teacher has no peer-mesh transport in-process (WebRTC/WebSocket
//! peer discovery lives entirely in the host's JS layer), so there's no
//! direct teacher file to port here; `MeshDelegator` is new, shaped as the
//! narrow boundary interface the spec calls for so a real transport can be
//! dropped in without touching `supervisor.rs`.

use crate::error::ExecutionError;
use crate::job::{Job, JobResult};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait MeshDelegator: Send + Sync {
    /// Attempts to hand `job` to a peer supervisor. `deadline` bounds how
    /// long the caller is willing to wait for the round trip.
    async fn delegate_job(&self, job: &Job, deadline: Duration) -> Result<JobResult, ExecutionError>;
}

/// No mesh transport configured; every delegation fails immediately so the
/// caller's pure-job fallback (spec §4.12) takes over without waiting.
pub struct NullMeshDelegator;

#[async_trait]
impl MeshDelegator for NullMeshDelegator {
    async fn delegate_job(&self, job: &Job, _deadline: Duration) -> Result<JobResult, ExecutionError> {
        Err(ExecutionError::MeshDelegationFailed(job.id.to_string()))
    }
}

#[cfg(test)]
pub struct LoopbackMeshDelegator {
    pub result: std::sync::Mutex<Option<JobResult>>,
}

#[cfg(test)]
#[async_trait]
impl MeshDelegator for LoopbackMeshDelegator {
    async fn delegate_job(&self, job: &Job, _deadline: Duration) -> Result<JobResult, ExecutionError> {
        self.result
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ExecutionError::MeshDelegationFailed(job.id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOutcome;

    #[tokio::test]
    async fn null_delegator_always_fails() {
        let delegator = NullMeshDelegator;
        let job = Job::new("crypto", "hash", vec![]);
        let result = delegator.delegate_job(&job, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ExecutionError::MeshDelegationFailed(_))));
    }

    #[tokio::test]
    async fn loopback_delegator_returns_configured_result() {
        let job = Job::new("crypto", "hash", vec![]);
        let delegator = LoopbackMeshDelegator {
            result: std::sync::Mutex::new(Some(JobResult {
                job_id: job.id,
                outcome: JobOutcome::Success(vec![1]),
                completed_at_ms: 0,
            })),
        };
        let result = delegator.delegate_job(&job, Duration::from_millis(100)).await.unwrap();
        assert!(result.is_success());
    }
}
