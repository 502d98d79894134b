//! Error types for dispatch operations.

use thiserror::Error;

use super::context::ContextHandle;

/// Errors produced by the dispatch engine.
///
/// The enum is `Clone` because an error can be recorded as a context's first
/// failure and later surfaced a second time through the output fence status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Unknown or already-released context handle.
    #[error("invalid context handle {0}")]
    InvalidHandle(ContextHandle),
    /// Configure or commit attempted while the context is running.
    #[error("context {0} is already running")]
    AlreadyRunning(ContextHandle),
    /// Allocation failure for a context slot or queue entry.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    /// Register programming or status read failed before the engine started.
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    /// No completion arrived within the configured bound.
    #[error("timed out waiting for completion")]
    Timeout,
    /// Job aborted by explicit cancellation.
    #[error("cancelled")]
    Cancelled,
    /// Input completion object resolved to an error state.
    #[error("external dependency failed: {0}")]
    ExternalDependency(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
