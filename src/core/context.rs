//! Context entities: handles, priorities, register programs, and the
//! per-context state block.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::core::error::DispatchError;
use crate::fence::Fence;
use crate::util::clock::now_ms;

/// User-visible context identity.
///
/// Handles are generation-checked: the registry bumps a slot's generation
/// when the slot is vacated, so a handle kept past release can never alias a
/// context that later reuses the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextHandle {
    /// 1-based slot index in the registry table.
    pub index: u32,
    /// Generation tag of the slot at allocation time.
    pub generation: u32,
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}.{}", self.index, self.generation)
    }
}

/// Owning process identity, used by the disconnect cleanup hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(u32);

impl ClientId {
    /// Wrap a raw client/process identifier.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw identifier value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Scheduling priority for a context and its jobs.
///
/// `DEFAULT` (zero) means "no preference" and always queues at the tail.
/// Values are clamped to `MAX` on construction; inflation saturates there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Priority(u8);

impl Priority {
    /// No preference; appended at the queue tail without scanning.
    pub const DEFAULT: Self = Self(0);
    /// Highest schedulable priority; inflation saturates here.
    pub const MAX: Self = Self(15);

    /// Build a priority, clamping to [`Priority::MAX`].
    #[must_use]
    pub fn new(value: u8) -> Self {
        Self(value.min(Self::MAX.0))
    }

    /// Raw priority value.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Whether this is the default "no preference" priority.
    #[must_use]
    pub const fn is_default(self) -> bool {
        self.0 == Self::DEFAULT.0
    }

    /// Bump the priority of an overtaken queue entry, saturating at `MAX`.
    pub(crate) fn inflate(&mut self) {
        if self.0 < Self::MAX.0 {
            self.0 += 1;
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a commit blocks the caller or resolves a fence later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Blocking: commit returns once every batch finished or the wait bound
    /// elapsed.
    #[default]
    Sync,
    /// Non-blocking: commit returns an output fence immediately.
    Async,
}

/// Opaque register-program payload for one command batch.
///
/// The scheduler never interprets the words; they are handed verbatim to the
/// hardware collaborator's `program_and_start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterProgram {
    words: Vec<u32>,
}

impl RegisterProgram {
    /// Wrap a register-program word sequence.
    #[must_use]
    pub fn new(words: Vec<u32>) -> Self {
        Self { words }
    }

    /// The raw register words.
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Number of register words in the program.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.words.len()
    }
}

/// Mutable portion of a context, guarded by the per-context lock.
///
/// The scheduler lock is never held while this lock is taken; see the lock
/// ordering notes on [`crate::core::lifecycle::JobLifecycle`].
#[derive(Debug, Default)]
pub(crate) struct ContextState {
    /// Priority requested at configure time (already clamped).
    pub(crate) priority: Priority,
    /// Blocking or fence-resolving commit.
    pub(crate) sync_mode: SyncMode,
    /// Configured batches; one job is derived per entry at commit.
    pub(crate) batches: Vec<Arc<RegisterProgram>>,
    /// Jobs handed to the scheduler during the current commit.
    pub(crate) committed_batches: usize,
    /// Jobs finalized during the current commit.
    pub(crate) finished_batches: usize,
    /// Set between commit and the final batch's finalization.
    pub(crate) running: bool,
    /// Optional externally-owned fence gating the commit.
    pub(crate) input_fence: Option<Fence>,
    /// Output completion object for the current commit.
    pub(crate) out_fence: Option<Fence>,
    /// First failure observed during the current commit, surfaced through
    /// the output fence (async) or the commit return value (sync).
    pub(crate) first_error: Option<DispatchError>,
}

impl ContextState {
    /// Reset per-run counters at the start of a commit.
    pub(crate) fn begin_commit(&mut self) {
        self.committed_batches = 0;
        self.finished_batches = 0;
        self.first_error = None;
        self.running = !self.batches.is_empty();
    }
}

/// Client-visible unit of work: one or more command batches tracked under a
/// registry handle.
///
/// Shared ownership is `Arc`; the registry holds one reference and every
/// in-flight [`crate::core::job::Job`] holds another, so the context cannot
/// be freed while a job could still dereference it. The drop glue is the
/// one-time teardown.
#[derive(Debug)]
pub struct Context {
    handle: ContextHandle,
    client: ClientId,
    created_at_ms: u128,
    state: Mutex<ContextState>,
}

impl Context {
    pub(crate) fn new(handle: ContextHandle, client: ClientId) -> Self {
        Self {
            handle,
            client,
            created_at_ms: now_ms(),
            state: Mutex::new(ContextState::default()),
        }
    }

    /// Registry handle this context was allocated under.
    #[must_use]
    pub const fn handle(&self) -> ContextHandle {
        self.handle
    }

    /// Owning client identity.
    #[must_use]
    pub const fn client(&self) -> ClientId {
        self.client
    }

    /// Creation timestamp in milliseconds since the Unix epoch.
    #[must_use]
    pub const fn created_at_ms(&self) -> u128 {
        self.created_at_ms
    }

    /// Whether a commit is in flight (batches committed, not all finalized).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Number of batches finalized during the current commit.
    #[must_use]
    pub fn finished_batches(&self) -> usize {
        self.state.lock().finished_batches
    }

    /// Number of batches handed to the scheduler during the current commit.
    #[must_use]
    pub fn committed_batches(&self) -> usize {
        self.state.lock().committed_batches
    }

    /// Acquire the per-context state lock.
    pub(crate) fn state(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        tracing::trace!(handle = %self.handle, client = %self.client, "context reaped");
    }
}
