//! Job and result data model (spec §4.13).
//!
//! Grounded on the teacher's `engine.rs` dispatch arguments (service,
//! action, input bytes, params) reshaped into owned, serializable structs
//! so they can cross the inbox/outbox message queues via `bincode`, the way
//! the teacher already depends on it for its CRDT/automerge payloads.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum JobPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

/// A unit of work routed through the SAB bridge to a capability-matching
/// unit (spec §4.9, §4.13). `deadline_ms` is an absolute wall-clock
/// deadline in epoch milliseconds; `None` means best-effort, no deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub capability: String,
    pub operation: String,
    pub payload: Vec<u8>,
    pub priority: JobPriority,
    pub deadline_ms: Option<u64>,
}

impl Job {
    pub fn new(capability: impl Into<String>, operation: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            capability: capability.into(),
            operation: operation.into(),
            payload,
            priority: JobPriority::default(),
            deadline_ms: None,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    pub fn is_pure(&self) -> bool {
        // Units that only transform their input (no side effects on
        // identity/social/economics state) are safe to retry locally if
        // mesh delegation fails (spec §4.12).
        !matches!(self.capability.as_str(), "identity" | "economics" | "social")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobOutcome {
    Success(Vec<u8>),
    Failure(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub outcome: JobOutcome,
    pub completed_at_ms: u64,
}

impl JobResult {
    pub fn success(job_id: Uuid, output: Vec<u8>, completed_at_ms: u64) -> Self {
        Self {
            job_id,
            outcome: JobOutcome::Success(output),
            completed_at_ms,
        }
    }

    pub fn failure(job_id: Uuid, error: impl Into<String>, completed_at_ms: u64) -> Self {
        Self {
            job_id,
            outcome: JobOutcome::Failure(error.into()),
            completed_at_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Success(_))
    }
}

pub fn encode(job: &Job) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(job)
}

pub fn decode(bytes: &[u8]) -> Result<Job, bincode::Error> {
    bincode::deserialize(bytes)
}

pub fn encode_result(result: &JobResult) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(result)
}

pub fn decode_result(bytes: &[u8]) -> Result<JobResult, bincode::Error> {
    bincode::deserialize(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_round_trips_through_bincode() {
        let job = Job::new("crypto", "hash", vec![1, 2, 3]).with_priority(JobPriority::High);
        let bytes = encode(&job).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.id, job.id);
        assert_eq!(decoded.capability, "crypto");
        assert_eq!(decoded.priority, JobPriority::High);
    }

    #[test]
    fn identity_jobs_are_not_pure() {
        let job = Job::new("identity", "rotate_key", vec![]);
        assert!(!job.is_pure());
        let job = Job::new("crypto", "hash", vec![]);
        assert!(job.is_pure());
    }

    #[test]
    fn result_round_trips() {
        let id = Uuid::new_v4();
        let result = JobResult::success(id, vec![9, 9], 123);
        let bytes = encode_result(&result).unwrap();
        let decoded = decode_result(&bytes).unwrap();
        assert_eq!(decoded.job_id, id);
        assert!(decoded.is_success());
    }
}
