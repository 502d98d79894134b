//! Completion-object (fence) primitive and coordinator.
//!
//! One fence serves every completion path in the engine: synchronous commits
//! block on [`Fence::wait`], asynchronous commits hand the fence back to the
//! caller, and input dependencies chain through [`Fence::on_signal`]. The
//! primitive resolves exactly once; later signal attempts are no-ops.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::DispatchError;

/// Resolution state of a fence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FenceStatus {
    /// Not yet resolved.
    Pending,
    /// All associated work finished successfully.
    Signaled,
    /// Work finished with the recorded failure.
    Failed(DispatchError),
}

impl FenceStatus {
    /// Whether the fence has left the pending state.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

type SignalCallback = Box<dyn FnOnce(&FenceStatus) + Send>;

/// State guarded by the fence lock: resolution plus registered callbacks.
struct FenceCore {
    status: FenceStatus,
    callbacks: Vec<SignalCallback>,
}

struct FenceInner {
    id: u64,
    core: Mutex<FenceCore>,
    resolved: Condvar,
}

/// Cheaply clonable completion object.
///
/// Resolution is one-shot: the first [`Fence::signal`] or [`Fence::fail`]
/// wins, wakes every blocked waiter, and drains the callback list. Later
/// attempts are logged and ignored, which is what makes concurrent
/// completion, timeout, and cancellation safe to race.
#[derive(Clone)]
pub struct Fence {
    inner: Arc<FenceInner>,
}

impl Fence {
    fn new(id: u64) -> Self {
        Self {
            inner: Arc::new(FenceInner {
                id,
                core: Mutex::new(FenceCore {
                    status: FenceStatus::Pending,
                    callbacks: Vec::new(),
                }),
                resolved: Condvar::new(),
            }),
        }
    }

    /// Identifier for log correlation.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Current resolution state.
    #[must_use]
    pub fn status(&self) -> FenceStatus {
        self.inner.core.lock().status.clone()
    }

    /// Resolve the fence successfully. No-op if already resolved.
    pub fn signal(&self) {
        self.resolve(FenceStatus::Signaled);
    }

    /// Resolve the fence with a failure. No-op if already resolved.
    pub fn fail(&self, err: DispatchError) {
        self.resolve(FenceStatus::Failed(err));
    }

    fn resolve(&self, status: FenceStatus) {
        let callbacks = {
            let mut core = self.inner.core.lock();
            if core.status.is_resolved() {
                tracing::trace!(fence = self.inner.id, "fence already resolved, signal ignored");
                return;
            }
            core.status = status.clone();
            std::mem::take(&mut core.callbacks)
        };
        // Notify ALL waiters (there is usually one, but be safe).
        self.inner.resolved.notify_all();
        tracing::debug!(fence = self.inner.id, status = ?status, "fence resolved");
        for callback in callbacks {
            callback(&status);
        }
    }

    /// Block until the fence resolves or `timeout` elapses.
    ///
    /// Uses the condvar for efficient waiting - NO POLLING.
    ///
    /// # Errors
    ///
    /// - The recorded failure if the fence resolved to [`FenceStatus::Failed`]
    /// - [`DispatchError::Timeout`] if the bound elapsed first
    pub fn wait(&self, timeout: Duration) -> Result<(), DispatchError> {
        let deadline = Instant::now() + timeout;
        let mut core = self.inner.core.lock();
        loop {
            match &core.status {
                FenceStatus::Signaled => return Ok(()),
                FenceStatus::Failed(err) => return Err(err.clone()),
                FenceStatus::Pending => {}
            }
            if self.inner.resolved.wait_until(&mut core, deadline).timed_out() {
                // A resolution can land right at expiry; report it over the
                // timeout if so.
                return match &core.status {
                    FenceStatus::Signaled => Ok(()),
                    FenceStatus::Failed(err) => Err(err.clone()),
                    FenceStatus::Pending => Err(DispatchError::Timeout),
                };
            }
        }
    }

    /// Register a callback invoked once on resolution.
    ///
    /// An already-resolved fence invokes the callback immediately on the
    /// calling thread; the status check happens inside the fence lock, so a
    /// registration can never miss a concurrent signal.
    pub fn on_signal<F>(&self, callback: F)
    where
        F: FnOnce(&FenceStatus) + Send + 'static,
    {
        let mut core = self.inner.core.lock();
        if !core.status.is_resolved() {
            core.callbacks.push(Box::new(callback));
            return;
        }
        let status = core.status.clone();
        drop(core);
        callback(&status);
    }

    /// Await the fence resolution with a bound, without blocking the runtime.
    ///
    /// Built on callback registration and a oneshot channel - no polling.
    ///
    /// # Errors
    ///
    /// Same as [`Fence::wait`].
    #[cfg(feature = "tokio-runtime")]
    pub async fn wait_async(&self, timeout: Duration) -> Result<(), DispatchError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.on_signal(move |status| {
            let _ = tx.send(status.clone());
        });
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(FenceStatus::Signaled)) => Ok(()),
            Ok(Ok(FenceStatus::Failed(err))) => Err(err),
            Ok(Ok(FenceStatus::Pending)) | Ok(Err(_)) => Err(DispatchError::ExternalDependency(
                "fence dropped before resolution".into(),
            )),
            Err(_) => Err(DispatchError::Timeout),
        }
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

/// Mints fences and fronts the signal/wait/registration operations.
///
/// The coordinator is the lifecycle manager's view of the completion-signal
/// subsystem: one fence per asynchronous commit (created lazily at commit),
/// signaled exactly once when the owning context finishes its last batch.
#[derive(Debug, Clone, Default)]
pub struct FenceCoordinator {
    seq: Arc<AtomicU64>,
}

impl FenceCoordinator {
    /// Create a coordinator with its id sequence at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new pending fence.
    #[must_use]
    pub fn create(&self) -> Fence {
        let id = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(fence = id, "fence created");
        Fence::new(id)
    }

    /// Resolve `fence` successfully. Forwards to [`Fence::signal`].
    pub fn signal(&self, fence: &Fence) {
        fence.signal();
    }

    /// Block until `fence` resolves or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Same as [`Fence::wait`].
    pub fn wait(&self, fence: &Fence, timeout: Duration) -> Result<(), DispatchError> {
        fence.wait(timeout)
    }

    /// Run `callback` once the externally-owned `fence` resolves, or
    /// immediately if it already has.
    pub fn register_on_input_ready<F>(&self, fence: &Fence, callback: F)
    where
        F: FnOnce(&FenceStatus) + Send + 'static,
    {
        fence.on_signal(callback);
    }
}
