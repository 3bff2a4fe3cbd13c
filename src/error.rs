use thiserror::Error;

/// Errors raised by the [`crate::memory`] layer and the layout validator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("arena size {size} is below the minimum of {min}")]
    SabTooSmall { size: usize, min: usize },
    #[error("arena size {size} exceeds the maximum of {max}")]
    SabTooLarge { size: usize, max: usize },
    #[error("region {a} overlaps region {b}")]
    RegionOverlap { a: &'static str, b: &'static str },
    #[error("arena start is not aligned to {0} bytes")]
    InvalidArenaStart(usize),
    #[error("offset {offset} size {size} is out of bounds for arena of size {arena_size}")]
    OffsetOutOfBounds {
        offset: usize,
        size: usize,
        arena_size: usize,
    },
    #[error("offset {offset} is not aligned to {alignment} bytes")]
    Misaligned { offset: usize, alignment: usize },
}

/// Errors raised by [`crate::queue`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full")]
    Full,
    #[error("queue is empty")]
    Empty,
    #[error("dequeued slot failed magic validation")]
    CorruptedMessage,
    #[error("payload of {size} bytes exceeds the {max} byte slot capacity")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Errors raised by [`crate::allocator`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("allocator has no block large enough for {requested} bytes")]
    OutOfMemory { requested: usize },
    #[error("offset {0} does not belong to any live allocation")]
    InvalidOffset(usize),
    #[error("offset {0} was already freed")]
    DoubleFree(usize),
    #[error("requested alignment {requested} is not satisfiable (arena alignment is {max})")]
    AlignmentViolation { requested: usize, max: usize },
}

/// Errors raised by [`crate::registry`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("module {module} has unsatisfied required dependency {dependency}")]
    UnsatisfiedDependency { module: String, dependency: String },
    #[error("module {module} requires {dependency} in [{min}, {max}) but found {found}")]
    VersionIncompatibility {
        module: String,
        dependency: String,
        min: String,
        max: String,
        found: String,
    },
    #[error("circular dependency detected among: {0:?}")]
    CircularDependency(Vec<String>),
    #[error("registry entry at slot {0} failed validation")]
    EntryCorrupt(usize),
    #[error("inline registry is full, overflow to arena not yet implemented for slot {0}")]
    InlineRegistryFull(String),
}

/// Errors raised by [`crate::lifecycle`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },
    #[error("shared memory has not been injected yet")]
    SabNotInjected,
    #[error("kernel is in Panic state: {0}")]
    Panic(String),
}

/// Errors raised during job execution / dispatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("job {0} exceeded its deadline")]
    DeadlineExceeded(String),
    #[error("unit {unit} has no operation {operation}")]
    UnsupportedOperation { unit: String, operation: String },
    #[error("mesh delegation failed for job {0}")]
    MeshDelegationFailed(String),
    #[error("no unit registered for capability {0}")]
    UnknownCapability(String),
    #[error("chunk descriptor is corrupt or its referenced span is unreadable: {0}")]
    ChunkCorrupted(String),
}

/// Aggregate error type threaded through public APIs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("wait on epoch {index} timed out after {timeout_ms}ms")]
    WaitTimeout { index: u32, timeout_ms: u64 },
}
