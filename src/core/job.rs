//! Job: one hardware dispatch unit derived from a single command batch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::context::{Context, ContextHandle, Priority, RegisterProgram, SyncMode};
use crate::core::error::DispatchError;

/// Terminal outcome of a job, produced by exactly one finalize path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Hardware reported completion.
    Done,
    /// Register programming or the engine itself failed before/while running.
    HardwareFault(String),
    /// No completion within the configured bound; the engine was reset.
    TimedOut,
    /// Aborted by explicit cancellation or client disconnect.
    Cancelled,
}

impl JobOutcome {
    /// Whether the job completed successfully.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// The error recorded against the owning context, if any.
    #[must_use]
    pub fn error(&self) -> Option<DispatchError> {
        match self {
            Self::Done => None,
            Self::HardwareFault(reason) => Some(DispatchError::HardwareFault(reason.clone())),
            Self::TimedOut => Some(DispatchError::Timeout),
            Self::Cancelled => Some(DispatchError::Cancelled),
        }
    }
}

/// One dispatch unit: a single register-program batch bound to its context.
///
/// A job is owned by the pending queue while queued and by the running slot
/// while executing; the `Arc` back-reference keeps the context alive until
/// the job has been finalized and dropped (reaped).
#[derive(Debug, Clone)]
pub struct Job {
    seq: u64,
    ctx: Arc<Context>,
    program: Arc<RegisterProgram>,
    batch_index: usize,
    priority: Priority,
    asynchronous: bool,
    submitted_at: Instant,
    hw_started_at: Option<Instant>,
}

impl Job {
    pub(crate) fn new(
        seq: u64,
        ctx: Arc<Context>,
        program: Arc<RegisterProgram>,
        batch_index: usize,
        priority: Priority,
        mode: SyncMode,
    ) -> Self {
        Self {
            seq,
            ctx,
            program,
            batch_index,
            priority,
            asynchronous: mode == SyncMode::Async,
            submitted_at: Instant::now(),
            hw_started_at: None,
        }
    }

    /// Engine-wide job sequence number, assigned at allocation.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Owning context.
    #[must_use]
    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Handle of the owning context.
    #[must_use]
    pub fn handle(&self) -> ContextHandle {
        self.ctx.handle()
    }

    /// The job's copy of the register-program payload.
    #[must_use]
    pub fn program(&self) -> &RegisterProgram {
        &self.program
    }

    /// Index of the batch this job was derived from.
    #[must_use]
    pub const fn batch_index(&self) -> usize {
        self.batch_index
    }

    /// Current priority (inherited from the context, possibly inflated).
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Whether the job belongs to a non-blocking commit.
    #[must_use]
    pub const fn is_async(&self) -> bool {
        self.asynchronous
    }

    /// Submission timestamp.
    #[must_use]
    pub const fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Hardware-start timestamp, set when the job enters the running slot.
    #[must_use]
    pub const fn hw_started_at(&self) -> Option<Instant> {
        self.hw_started_at
    }

    /// Time spent on the hardware so far, if started.
    #[must_use]
    pub fn hw_elapsed(&self) -> Option<Duration> {
        self.hw_started_at.map(|t| t.elapsed())
    }

    /// Bump priority after being overtaken in the queue.
    pub(crate) fn inflate_priority(&mut self) {
        self.priority.inflate();
    }

    pub(crate) fn mark_started(&mut self) {
        self.hw_started_at = Some(Instant::now());
    }
}
