//! SAB Bridge: job submission, routing loop, and result dispatch (spec
//! §4.9, §3).
//!
//! `submit` mirrors the teacher's `ComputeEngine::execute` request shape
//! (service/action/input/params) but returns a `tokio::sync::oneshot`
//! receiver instead of awaiting inline, since a real submission here
//! crosses into a separate inbox slot consumed by the routing loop running
//! on another task. The routing loop itself has no teacher analogue (the
//! teacher never had an inbox/outbox queue of its own — compute jobs were
//! called directly) and is grounded on the `queue.rs`/`epoch.rs` primitives
//! this crate already built.

use crate::allocator::HybridAllocator;
use crate::epoch::EpochArray;
use crate::error::ExecutionError;
use crate::job::{self, Job, JobResult};
use crate::layout::{
    IDX_DELEGATED_CHUNK_EPOCH, IDX_INBOX_DIRTY, IDX_OUTBOX_HOST_DIRTY, IDX_OUTBOX_KERNEL_DIRTY,
    OFFSET_ARENA, OFFSET_INBOX, OFFSET_OUTBOX_HOST, OFFSET_OUTBOX_KERNEL,
};
use crate::memory::MemoryProvider;
use crate::queue::{Message, MessageQueue};
use crate::supervisor::Supervisor;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Queue capacity (in 256-byte slots) for each of the three message
/// regions. Must stay a power of two and fit within the region's fixed
/// size from `layout.rs`.
pub const QUEUE_CAPACITY: usize = 1024;

/// Set on a [`Message`]'s `flags` when its payload is a chunk descriptor
/// (an 8-byte `offset:u32, length:u32` pair into the arena) rather than the
/// result bytes themselves. `IDX_DELEGATED_CHUNK_EPOCH` is bumped alongside
/// the outbox's own dirty epoch whenever this flag is set, so a consumer
/// that only watches the plain outbox epoch still gets woken, and one that
/// also watches the chunk epoch can tell chunked deliveries apart from
/// inline ones without decoding every message.
pub const CHUNKED_RESULT_FLAG: u16 = 0x0001;

/// Destination for a completed job's serialised result: `outbox_host` for
/// host-facing responses, `outbox_kernel` for kernel-internal syscalls
/// originating from modules (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxTarget {
    Host,
    Kernel,
}

struct PendingJob {
    job: Job,
    target: OutboxTarget,
    reply: oneshot::Sender<JobResult>,
}

/// Bridges job submission into the inbox queue and drains completed
/// results back out through the matching outbox queue, bumping the
/// corresponding dirty epoch on each transition (spec §3).
pub struct Bridge {
    mem: Arc<dyn MemoryProvider>,
    epochs: Arc<EpochArray>,
    inbox: MessageQueue,
    outbox_host: MessageQueue,
    outbox_kernel: MessageQueue,
    pending: Mutex<HashMap<Uuid, PendingJob>>,
    chunk_allocator: HybridAllocator,
}

impl Bridge {
    pub fn new(mem: Arc<dyn MemoryProvider>, epochs: Arc<EpochArray>) -> Self {
        let arena_size = mem.size().saturating_sub(OFFSET_ARENA);
        let chunk_allocator = HybridAllocator::new(mem.clone(), OFFSET_ARENA, arena_size);
        Self {
            inbox: MessageQueue::new(mem.clone(), OFFSET_INBOX, QUEUE_CAPACITY),
            outbox_host: MessageQueue::new(mem.clone(), OFFSET_OUTBOX_HOST, QUEUE_CAPACITY),
            outbox_kernel: MessageQueue::new(mem.clone(), OFFSET_OUTBOX_KERNEL, QUEUE_CAPACITY),
            mem,
            epochs,
            pending: Mutex::new(HashMap::new()),
            chunk_allocator,
        }
    }

    /// Serialises `job`, reserves an inbox slot, publishes it, and bumps
    /// `inbox_dirty`. Returns a receiver that resolves once the routing
    /// loop has dispatched the job and written its result.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub fn submit(&self, job: Job, target: OutboxTarget) -> Result<oneshot::Receiver<JobResult>, ExecutionError> {
        let encoded = job::encode(&job).map_err(|e| ExecutionError::UnknownCapability(e.to_string()))?;
        self.inbox
            .enqueue(0, job.priority as u8, 0, 0, 0, &encoded)
            .map_err(|e| ExecutionError::UnknownCapability(e.to_string()))?;
        self.epochs.increment(IDX_INBOX_DIRTY);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            job.id,
            PendingJob {
                job,
                target,
                reply: tx,
            },
        );
        Ok(rx)
    }

    /// Drains every inbox slot that has accumulated since the last call,
    /// dispatches each through `supervisor`, and publishes the result to
    /// the target outbox. Driven by a task watching `inbox_dirty` via
    /// `EpochArray::wait` (spec Suspension points §5).
    pub async fn drain_once(&self, supervisor: &mut Supervisor, now_ms: u64) -> usize {
        let mut drained = 0;
        loop {
            let msg = match self.inbox.dequeue() {
                Ok(msg) => msg,
                Err(_) => break,
            };
            let job = match job::decode(&msg.payload) {
                Ok(job) => job,
                Err(e) => {
                    warn!("dropping corrupted inbox job: {}", e);
                    continue;
                }
            };
            let result = supervisor.dispatch(&job, now_ms).await;
            self.publish_result(job.id, result);
            drained += 1;
        }
        drained
    }

    fn publish_result(&self, job_id: Uuid, result: JobResult) {
        let pending = self.pending.lock().remove(&job_id);
        let target = pending.as_ref().map(|p| p.target).unwrap_or(OutboxTarget::Host);

        let encoded = match job::encode_result(&result) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to encode job result {}: {}", job_id, e);
                return;
            }
        };

        let (queue, idx) = match target {
            OutboxTarget::Host => (&self.outbox_host, IDX_OUTBOX_HOST_DIRTY),
            OutboxTarget::Kernel => (&self.outbox_kernel, IDX_OUTBOX_KERNEL_DIRTY),
        };

        let publish = if encoded.len() <= crate::queue::MESSAGE_PAYLOAD_SIZE {
            queue.enqueue(1, 0, 0, 0, 0, &encoded).map(|_| ()).map_err(|e| e.to_string())
        } else {
            self.publish_chunked(queue, job_id, &encoded)
        };

        match publish {
            Ok(()) => {
                self.epochs.increment(idx);
                if encoded.len() > crate::queue::MESSAGE_PAYLOAD_SIZE {
                    self.epochs.increment(IDX_DELEGATED_CHUNK_EPOCH);
                }
            }
            Err(e) => warn!("failed to publish job result {}: {}", job_id, e),
        }

        if let Some(pending) = pending {
            let _ = pending.reply.send(result);
        }
    }

    /// Writes an oversized result into the arena's chunk allocator and
    /// enqueues an 8-byte `offset:u32, length:u32` descriptor flagged with
    /// [`CHUNKED_RESULT_FLAG`] instead of the result bytes themselves
    /// (spec §3's reserved `IDX_DELEGATED_CHUNK_EPOCH`).
    fn publish_chunked(&self, queue: &MessageQueue, job_id: Uuid, encoded: &[u8]) -> Result<(), String> {
        let offset = self
            .chunk_allocator
            .allocate(encoded.len())
            .map_err(|e| format!("job {}: {}", job_id, e))?;
        self.mem
            .write_at(offset, encoded)
            .map_err(|e| format!("job {}: failed to write chunk: {}", job_id, e))?;

        let mut descriptor = [0u8; 8];
        descriptor[0..4].copy_from_slice(&(offset as u32).to_le_bytes());
        descriptor[4..8].copy_from_slice(&(encoded.len() as u32).to_le_bytes());

        queue
            .enqueue(1, 0, 0, 0, CHUNKED_RESULT_FLAG, &descriptor)
            .map_err(|e| {
                let _ = self.chunk_allocator.free(offset);
                format!("job {}: {}", job_id, e)
            })
    }

    /// Resolves a dequeued outbox [`Message`] to its full result bytes,
    /// following the chunk descriptor and freeing the arena span behind it
    /// when [`CHUNKED_RESULT_FLAG`] is set, or returning the payload
    /// directly otherwise.
    pub fn resolve_chunk(&self, message: &Message) -> Result<Vec<u8>, ExecutionError> {
        if message.flags & CHUNKED_RESULT_FLAG == 0 {
            return Ok(message.payload.clone());
        }
        if message.payload.len() != 8 {
            return Err(ExecutionError::ChunkCorrupted(format!(
                "descriptor payload is {} bytes, expected 8",
                message.payload.len()
            )));
        }
        let offset = u32::from_le_bytes(message.payload[0..4].try_into().unwrap()) as usize;
        let length = u32::from_le_bytes(message.payload[4..8].try_into().unwrap()) as usize;
        let bytes = self
            .mem
            .read_at(offset, length)
            .map_err(|e| ExecutionError::ChunkCorrupted(format!("chunk at {}..{}: {}", offset, offset + length, e)))?;
        self.chunk_allocator
            .free(offset)
            .map_err(|e| ExecutionError::ChunkCorrupted(format!("failed to release chunk at {}: {}", offset, e)))?;
        Ok(bytes)
    }

    pub fn inbox_epoch_index() -> u32 {
        IDX_INBOX_DIRTY
    }

    pub fn wait_deadline(&self) -> Duration {
        Duration::from_millis(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ARENA_SIZE_DEFAULT;
    use crate::mesh::NullMeshDelegator;
    use crate::memory::InProcessMemory;

    fn bridge() -> Bridge {
        let mem: Arc<dyn MemoryProvider> = Arc::new(InProcessMemory::new(ARENA_SIZE_DEFAULT));
        let epochs = Arc::new(EpochArray::new(mem.clone()));
        Bridge::new(mem, epochs)
    }

    #[tokio::test]
    async fn round_trip_job_through_bridge() {
        let bridge = bridge();
        let mut supervisor = Supervisor::new(Arc::new(NullMeshDelegator), Duration::from_millis(50));
        let job = Job::new("data", "transform", vec![1, 2, 3, 4]);
        let rx = bridge.submit(job, OutboxTarget::Host).unwrap();

        let drained = bridge.drain_once(&mut supervisor, 0).await;
        assert_eq!(drained, 1);

        let result = rx.await.unwrap();
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn drain_once_is_a_no_op_on_empty_inbox() {
        let bridge = bridge();
        let mut supervisor = Supervisor::new(Arc::new(NullMeshDelegator), Duration::from_millis(50));
        assert_eq!(bridge.drain_once(&mut supervisor, 0).await, 0);
    }

    #[tokio::test]
    async fn oversized_result_is_chunked_through_the_arena_and_resolves_intact() {
        use crate::job::JobOutcome;

        let bridge = bridge();
        let mut supervisor = Supervisor::new(Arc::new(NullMeshDelegator), Duration::from_millis(50));
        let big_payload = vec![7u8; 2000];
        let job = Job::new("data", "echo", big_payload.clone());
        let rx = bridge.submit(job, OutboxTarget::Host).unwrap();

        assert_eq!(bridge.drain_once(&mut supervisor, 0).await, 1);
        let result = rx.await.unwrap();
        assert_eq!(result.outcome, JobOutcome::Success(big_payload.clone()));

        let msg = bridge.outbox_host.dequeue().unwrap();
        assert_eq!(msg.flags & CHUNKED_RESULT_FLAG, CHUNKED_RESULT_FLAG);
        let resolved = bridge.resolve_chunk(&msg).unwrap();
        let decoded = job::decode_result(&resolved).unwrap();
        assert_eq!(decoded.outcome, JobOutcome::Success(big_payload));
    }
}
