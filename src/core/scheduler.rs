//! Engine scheduler: the pending queue, the single running slot, and
//! hardware dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::context::ContextHandle;
use crate::core::error::DispatchError;
use crate::core::job::Job;
use crate::core::queue::PendingQueue;
use crate::hw::HardwareOps;

/// Point-in-time scheduler statistics.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Jobs waiting in the pending queue.
    pub queued_jobs: usize,
    /// Whether the running slot is occupied.
    pub busy: bool,
    /// Jobs handed to the hardware since startup.
    pub dispatched_jobs: u64,
    /// Jobs finalized as completed.
    pub completed_jobs: u64,
    /// Jobs that failed register programming or reported error bits.
    pub hw_faults: u64,
    /// Jobs finalized by the timeout policy.
    pub timed_out_jobs: u64,
    /// Jobs finalized by cancellation.
    pub cancelled_jobs: u64,
    /// Completion interrupts observed.
    pub total_interrupts: u64,
}

/// Lock-free counters backing [`EngineStats`].
#[derive(Debug, Default)]
pub(crate) struct EngineCounters {
    pub(crate) dispatched: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) hw_faults: AtomicU64,
    pub(crate) timed_out: AtomicU64,
    pub(crate) cancelled: AtomicU64,
    pub(crate) interrupts: AtomicU64,
}

/// Queue and running slot, guarded together by the scheduler lock.
#[derive(Debug)]
struct SchedulerInner {
    pending: PendingQueue,
    running: Option<Job>,
}

/// Per-engine scheduler.
///
/// One lock protects the pending queue and the running slot; every path a
/// job can leave the slot through (interrupt completion, timeout reap,
/// cancellation) must take the job out under that lock, so exactly one
/// caller ever finalizes it. The context lock is never acquired while this
/// lock is held.
pub struct EngineScheduler {
    inner: Mutex<SchedulerInner>,
    hw: Arc<dyn HardwareOps>,
    counters: EngineCounters,
}

impl EngineScheduler {
    /// Create a scheduler bound to a hardware backend.
    pub(crate) fn new(hw: Arc<dyn HardwareOps>, max_queue_depth: usize) -> Self {
        Self {
            inner: Mutex::new(SchedulerInner {
                pending: PendingQueue::new(max_queue_depth),
                running: None,
            }),
            hw,
            counters: EngineCounters::default(),
        }
    }

    pub(crate) fn hw(&self) -> &Arc<dyn HardwareOps> {
        &self.hw
    }

    pub(crate) const fn counters(&self) -> &EngineCounters {
        &self.counters
    }

    /// Insert a job into the pending queue.
    ///
    /// The caller is expected to attempt dispatch afterwards; enqueueing
    /// itself never touches the hardware.
    pub(crate) fn enqueue(&self, job: Job) -> Result<(), DispatchError> {
        let mut inner = self.inner.lock();
        let seq = job.seq();
        let handle = job.handle();
        let priority = job.priority();
        inner.pending.insert(job)?;
        tracing::debug!(
            job = seq,
            handle = %handle,
            priority = %priority,
            depth = inner.pending.len(),
            "job queued"
        );
        Ok(())
    }

    /// Start the next pending job if the engine is idle.
    ///
    /// Idempotent: a no-op when the running slot is occupied or the queue is
    /// empty. A register-programming failure clears the slot and the loop
    /// advances to the next candidate, so a dispatch failure can never stall
    /// the queue; the failed jobs are returned for the caller to finalize.
    pub(crate) fn dispatch_next(&self) -> Vec<(Job, DispatchError)> {
        let mut failed = Vec::new();
        loop {
            let job = {
                let mut inner = self.inner.lock();
                if inner.running.is_some() {
                    break;
                }
                let Some(mut job) = inner.pending.pop_front() else {
                    break;
                };
                job.mark_started();
                inner.running = Some(job.clone());
                job
            };

            match self.hw.program_and_start(&job) {
                Ok(()) => {
                    self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        job = job.seq(),
                        handle = %job.handle(),
                        batch = job.batch_index(),
                        "job dispatched to hardware"
                    );
                    break;
                }
                Err(err) => {
                    tracing::warn!(
                        job = job.seq(),
                        handle = %job.handle(),
                        error = %err,
                        "hardware setup failed before start"
                    );
                    let reclaimed = {
                        let mut inner = self.inner.lock();
                        match &inner.running {
                            Some(running) if running.seq() == job.seq() => {
                                inner.running = None;
                                true
                            }
                            _ => false,
                        }
                    };
                    // Unreclaimed means another path already finalized it.
                    if reclaimed {
                        failed.push((job, err));
                    }
                }
            }
        }
        failed
    }

    /// Take whatever job is running, if any.
    pub(crate) fn complete_running(&self) -> Option<Job> {
        self.inner.lock().running.take()
    }

    /// Take the running job only when `pred` holds for it.
    pub(crate) fn take_running_if<F>(&self, pred: F) -> Option<Job>
    where
        F: FnOnce(&Job) -> bool,
    {
        let mut inner = self.inner.lock();
        if inner.running.as_ref().is_some_and(pred) {
            inner.running.take()
        } else {
            None
        }
    }

    /// Take the running job if it is asynchronous and has been on the
    /// hardware longer than `bound`.
    pub(crate) fn reap_timed_out(&self, bound: Duration) -> Option<Job> {
        self.take_running_if(|job| {
            job.is_async() && job.hw_elapsed().is_some_and(|elapsed| elapsed >= bound)
        })
    }

    /// Drain every queued job belonging to `handle`.
    pub(crate) fn remove_pending_for(&self, handle: ContextHandle) -> Vec<Job> {
        self.inner.lock().pending.remove_for(handle)
    }

    /// Jobs currently waiting in the pending queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Whether the running slot is occupied.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.lock().running.is_some()
    }

    /// Snapshot of the scheduler counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let (queued, busy) = {
            let inner = self.inner.lock();
            (inner.pending.len(), inner.running.is_some())
        };
        EngineStats {
            queued_jobs: queued,
            busy,
            dispatched_jobs: self.counters.dispatched.load(Ordering::Relaxed),
            completed_jobs: self.counters.completed.load(Ordering::Relaxed),
            hw_faults: self.counters.hw_faults.load(Ordering::Relaxed),
            timed_out_jobs: self.counters.timed_out.load(Ordering::Relaxed),
            cancelled_jobs: self.counters.cancelled.load(Ordering::Relaxed),
            total_interrupts: self.counters.interrupts.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for EngineScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineScheduler")
            .field("queued", &self.queue_len())
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::{ClientId, Context, Priority, RegisterProgram, SyncMode};
    use crate::hw::sim::SimulatedCore;

    fn make_scheduler(silent: bool) -> (Arc<EngineScheduler>, Arc<SimulatedCore>) {
        let (core, _line) = SimulatedCore::with_latency_ms(1);
        core.set_silent(silent);
        let core = Arc::new(core);
        let hw: Arc<dyn HardwareOps> = Arc::clone(&core) as Arc<dyn HardwareOps>;
        (Arc::new(EngineScheduler::new(hw, 32)), core)
    }

    fn make_job(seq: u64, priority: u8, mode: SyncMode) -> Job {
        let ctx = Arc::new(Context::new(
            ContextHandle { index: seq as u32, generation: 1 },
            ClientId::new(1),
        ));
        Job::new(
            seq,
            ctx,
            Arc::new(RegisterProgram::new(vec![seq as u32])),
            0,
            Priority::new(priority),
            mode,
        )
    }

    #[test]
    fn dispatch_installs_single_running_job() {
        let (sched, core) = make_scheduler(true);
        sched.enqueue(make_job(1, 0, SyncMode::Sync)).unwrap();
        sched.enqueue(make_job(2, 0, SyncMode::Sync)).unwrap();
        assert!(sched.dispatch_next().is_empty());
        assert!(sched.is_busy());
        assert_eq!(sched.queue_len(), 1);
        assert_eq!(core.programs_started(), 1);
    }

    #[test]
    fn dispatch_is_idempotent_when_busy_or_empty() {
        let (sched, core) = make_scheduler(true);
        // Empty queue: nothing happens.
        assert!(sched.dispatch_next().is_empty());
        assert!(!sched.is_busy());

        sched.enqueue(make_job(1, 0, SyncMode::Sync)).unwrap();
        sched.dispatch_next();
        let before = (sched.queue_len(), core.programs_started());
        // Busy slot: speculative calls change nothing.
        assert!(sched.dispatch_next().is_empty());
        assert!(sched.dispatch_next().is_empty());
        assert_eq!((sched.queue_len(), core.programs_started()), before);
    }

    #[test]
    fn programming_failure_advances_to_next_job() {
        let (sched, core) = make_scheduler(true);
        core.fail_next_program();
        sched.enqueue(make_job(1, 0, SyncMode::Sync)).unwrap();
        sched.enqueue(make_job(2, 0, SyncMode::Sync)).unwrap();
        let failed = sched.dispatch_next();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0.seq(), 1);
        // Job 2 made it onto the hardware despite job 1 failing setup.
        assert!(sched.is_busy());
        assert_eq!(core.programs_started(), 1);
    }

    #[test]
    fn complete_running_vacates_slot_exactly_once() {
        let (sched, _core) = make_scheduler(true);
        sched.enqueue(make_job(1, 0, SyncMode::Sync)).unwrap();
        sched.dispatch_next();
        assert!(sched.complete_running().is_some());
        assert!(sched.complete_running().is_none());
        assert!(!sched.is_busy());
    }

    #[test]
    fn reap_timed_out_only_touches_async_jobs() {
        let (sched, _core) = make_scheduler(true);
        sched.enqueue(make_job(1, 0, SyncMode::Sync)).unwrap();
        sched.dispatch_next();
        assert!(sched.reap_timed_out(Duration::ZERO).is_none());
        assert!(sched.complete_running().is_some());

        sched.enqueue(make_job(2, 0, SyncMode::Async)).unwrap();
        sched.dispatch_next();
        std::thread::sleep(Duration::from_millis(5));
        let reaped = sched.reap_timed_out(Duration::from_millis(1));
        assert_eq!(reaped.unwrap().seq(), 2);
        assert!(!sched.is_busy());
    }

    #[test]
    fn reap_timed_out_respects_bound() {
        let (sched, _core) = make_scheduler(true);
        sched.enqueue(make_job(1, 0, SyncMode::Async)).unwrap();
        sched.dispatch_next();
        assert!(sched.reap_timed_out(Duration::from_secs(60)).is_none());
        assert!(sched.is_busy());
    }
}
