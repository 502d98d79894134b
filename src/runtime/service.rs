//! Command surface: the explicitly constructed top-level engine object.
//!
//! `EngineService` owns the registry, the scheduler, the lifecycle manager,
//! and the watchdog; callers hold it by reference (usually in an `Arc`) and
//! invoke the four client operations plus the disconnect hook. There is no
//! global state anywhere in the crate.

use std::sync::Arc;

use anyhow::Context as _;

use crate::config::EngineConfig;
use crate::core::{
    ClientId, ContextHandle, ContextRegistry, DispatchError, EngineScheduler, EngineStats,
    JobLifecycle, Priority, RegisterProgram, SyncMode,
};
use crate::core::AppResult;
use crate::fence::{Fence, FenceCoordinator};
use crate::hw::{HardwareOps, StatusBits};
use crate::runtime::watchdog::Watchdog;

/// Parameters for configuring a context before commit.
#[derive(Debug, Clone)]
pub struct ConfigureRequest {
    /// Target context handle.
    pub handle: ContextHandle,
    /// Register-program batches; one job is dispatched per entry.
    pub batches: Vec<RegisterProgram>,
    /// Scheduling priority, clamped to [`Priority::MAX`].
    pub priority: Priority,
    /// Blocking or fence-resolving commit.
    pub sync_mode: SyncMode,
    /// Optional externally-owned fence the commit must wait for.
    pub input_fence: Option<Fence>,
}

impl ConfigureRequest {
    /// Build a request with default priority, blocking mode, and no input
    /// dependency.
    #[must_use]
    pub fn new(handle: ContextHandle, batches: Vec<RegisterProgram>) -> Self {
        Self {
            handle,
            batches,
            priority: Priority::DEFAULT,
            sync_mode: SyncMode::default(),
            input_fence: None,
        }
    }

    /// Set the scheduling priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the synchronization mode.
    #[must_use]
    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Gate the commit on an externally-owned fence.
    #[must_use]
    pub fn with_input_fence(mut self, fence: Fence) -> Self {
        self.input_fence = Some(fence);
        self
    }
}

/// Result of a commit.
#[derive(Debug, Clone)]
pub struct CommitOutput {
    /// Output completion object for asynchronous commits; `None` when the
    /// commit blocked until completion.
    pub fence: Option<Fence>,
}

/// Top-level engine object: registry + scheduler + lifecycle + watchdog.
pub struct EngineService {
    config: EngineConfig,
    registry: ContextRegistry,
    lifecycle: JobLifecycle,
    watchdog: Option<Watchdog>,
}

impl EngineService {
    /// Build a service around a hardware backend and start the watchdog.
    ///
    /// # Errors
    ///
    /// Configuration validation failure.
    pub fn new(config: EngineConfig, hw: Arc<dyn HardwareOps>) -> AppResult<Self> {
        config
            .validate()
            .map_err(anyhow::Error::msg)
            .context("engine config invalid")?;

        let scheduler = Arc::new(EngineScheduler::new(hw, config.max_queue_depth));
        let lifecycle = JobLifecycle::new(
            Arc::clone(&scheduler),
            FenceCoordinator::new(),
            config.timeout_policy(),
        );
        let watchdog = config
            .watchdog_interval()
            .map(|interval| Watchdog::spawn(lifecycle.clone(), interval));

        tracing::info!(
            max_contexts = config.max_contexts,
            max_queue_depth = config.max_queue_depth,
            watchdog = watchdog.is_some(),
            "engine service initialized"
        );

        Ok(Self {
            registry: ContextRegistry::new(config.max_contexts),
            config,
            lifecycle,
            watchdog,
        })
    }

    /// Crate version string, for client handshakes.
    #[must_use]
    pub const fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The lifecycle manager, for wiring the interrupt pump.
    #[must_use]
    pub const fn lifecycle(&self) -> &JobLifecycle {
        &self.lifecycle
    }

    /// The context registry.
    #[must_use]
    pub const fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    /// Scheduler statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.lifecycle.scheduler().stats()
    }

    /// Allocate a new context for `client`.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` when the context table is full.
    pub fn start_context(&self, client: ClientId) -> Result<ContextHandle, DispatchError> {
        self.registry.allocate(client)
    }

    /// Record batches, priority, mode, and input dependency on a context.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` for an unknown context, `AlreadyRunning` while a
    /// commit is in flight.
    pub fn configure(&self, req: ConfigureRequest) -> Result<(), DispatchError> {
        let ctx = self.registry.lookup(req.handle)?;
        let mut st = ctx.state();
        if st.running {
            return Err(DispatchError::AlreadyRunning(req.handle));
        }
        st.batches = req.batches.into_iter().map(Arc::new).collect();
        st.priority = req.priority;
        st.sync_mode = req.sync_mode;
        st.input_fence = req.input_fence;
        tracing::debug!(
            handle = %req.handle,
            batches = st.batches.len(),
            priority = %st.priority,
            mode = ?st.sync_mode,
            "context configured"
        );
        Ok(())
    }

    /// Execute the context's configured batches.
    ///
    /// Blocking mode returns once every batch finished; asynchronous mode
    /// returns the output fence immediately.
    ///
    /// # Errors
    ///
    /// See [`JobLifecycle::commit`].
    pub fn commit(&self, handle: ContextHandle) -> Result<CommitOutput, DispatchError> {
        let ctx = self.registry.lookup(handle)?;
        let fence = self.lifecycle.commit(&ctx)?;
        Ok(CommitOutput { fence })
    }

    /// Cancel the context's outstanding work and drop the registry reference.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` for an unknown context.
    pub fn cancel(&self, handle: ContextHandle) -> Result<(), DispatchError> {
        let ctx = self.registry.lookup(handle)?;
        self.lifecycle.cancel(&ctx);
        self.registry.remove(handle);
        Ok(())
    }

    /// Client-disconnect hook: cancel and release every context the client
    /// owns, preventing orphaned hardware-bound work.
    pub fn client_disconnected(&self, client: ClientId) {
        for ctx in self.registry.remove_all_for(client) {
            self.lifecycle.cancel(&ctx);
        }
    }

    /// Forward completion flags from a custom interrupt delivery path.
    pub fn on_interrupt(&self, flags: StatusBits) {
        self.lifecycle.on_interrupt(flags);
    }
}

impl Drop for EngineService {
    fn drop(&mut self) {
        if let Some(watchdog) = &mut self.watchdog {
            watchdog.stop();
        }
    }
}

impl std::fmt::Debug for EngineService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineService")
            .field("contexts", &self.registry.len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
