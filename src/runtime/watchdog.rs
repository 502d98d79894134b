//! Periodic timeout watchdog.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::core::JobLifecycle;

struct WatchdogShared {
    stop: Mutex<bool>,
    wake: Condvar,
}

/// Dedicated thread that periodically reaps asynchronous jobs stuck on the
/// hardware past their completion bound.
///
/// The thread sleeps on a condvar with the tick interval as the bound, so
/// stopping is immediate rather than waiting out the current tick. Dropping
/// the watchdog stops and joins the thread.
pub struct Watchdog {
    shared: Arc<WatchdogShared>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Spawn the watchdog ticking every `interval`.
    pub(crate) fn spawn(lifecycle: JobLifecycle, interval: Duration) -> Self {
        let shared = Arc::new(WatchdogShared {
            stop: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("rd-watchdog".into())
            .spawn(move || {
                tracing::debug!(interval_ms = interval.as_millis() as u64, "watchdog started");
                loop {
                    {
                        let mut stop = thread_shared.stop.lock();
                        if *stop {
                            break;
                        }
                        let _ = thread_shared.wake.wait_for(&mut stop, interval);
                        if *stop {
                            break;
                        }
                    }
                    lifecycle.reap_timed_out();
                }
                tracing::debug!("watchdog exiting");
            })
            .expect("failed to spawn watchdog thread");

        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Stop the watchdog and join its thread.
    pub fn stop(&mut self) {
        *self.shared.stop.lock() = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("running", &self.handle.is_some())
            .finish()
    }
}
