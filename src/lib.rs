pub mod allocator;
pub mod bridge;
pub mod config;
pub mod economics;
pub mod epoch;
pub mod epoch_alloc;
pub mod error;
pub mod guard;
pub mod host;
pub mod identity;
pub mod intelligence;
pub mod job;
pub mod layout;
pub mod lifecycle;
pub mod logging;
pub mod memory;
pub mod mesh;
pub mod queue;
pub mod registry;
pub mod social;
pub mod supervisor;
pub mod units;

pub use bridge::{Bridge, OutboxTarget};
pub use config::{KernelConfig, KernelConfigBuilder};
pub use error::KernelError;
pub use host::{KernelEvent, KernelHandle, KernelStats};
pub use job::{Job, JobOutcome, JobPriority, JobResult};
pub use lifecycle::{KernelState, Lifecycle};
pub use logging::init_logging;
pub use mesh::MeshDelegator;
pub use supervisor::Supervisor;
