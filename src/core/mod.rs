//! Core scheduling types: contexts, jobs, the registry, and the scheduler.

pub mod context;
pub mod error;
pub mod job;
pub mod lifecycle;
pub(crate) mod queue;
pub mod registry;
pub mod scheduler;

pub use context::{ClientId, Context, ContextHandle, Priority, RegisterProgram, SyncMode};
pub use error::{AppResult, DispatchError};
pub use job::{Job, JobOutcome};
pub use lifecycle::{JobLifecycle, TimeoutPolicy};
pub use registry::ContextRegistry;
pub use scheduler::{EngineScheduler, EngineStats};
