//! Job lifecycle: commit, finish, cancellation, and the timeout policy.
//!
//! Jobs move `Allocated → Queued → Running → {Done, HardwareFault, TimedOut,
//! Cancelled}` and are reaped exactly once. The lifecycle manager is the only
//! component that finalizes jobs; completion interrupts, the timeout
//! watchdog, and cancellation all converge here.
//!
//! Lock ordering: the scheduler lock is released before the owning context's
//! lock is taken — finalize paths first extract the job under the scheduler
//! lock, then update the context. The two locks are never held together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::context::{Context, SyncMode};
use crate::core::error::DispatchError;
use crate::core::job::{Job, JobOutcome};
use crate::core::scheduler::EngineScheduler;
use crate::fence::{Fence, FenceCoordinator, FenceStatus};
use crate::hw::StatusBits;

/// Completion-wait bounds.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    /// Bound on a blocking commit's wait for its last batch.
    pub sync_wait: Duration,
    /// Bound on an asynchronous job's time on the hardware before the
    /// watchdog reaps it.
    pub async_job: Duration,
}

/// Drives jobs from allocation through finalization.
///
/// Cheap to clone; clones share the scheduler, the fence coordinator, and
/// the job sequence.
#[derive(Debug, Clone)]
pub struct JobLifecycle {
    scheduler: Arc<EngineScheduler>,
    fences: FenceCoordinator,
    timeouts: TimeoutPolicy,
    job_seq: Arc<AtomicU64>,
}

impl JobLifecycle {
    pub(crate) fn new(
        scheduler: Arc<EngineScheduler>,
        fences: FenceCoordinator,
        timeouts: TimeoutPolicy,
    ) -> Self {
        Self {
            scheduler,
            fences,
            timeouts,
            job_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The scheduler this lifecycle feeds.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<EngineScheduler> {
        &self.scheduler
    }

    fn next_seq(&self) -> u64 {
        self.job_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Commit the context's configured batches: one job per batch.
    ///
    /// Synchronous mode blocks until every batch finished or the wait bound
    /// elapsed; asynchronous mode returns the output fence immediately. A
    /// mid-commit enqueue failure leaves earlier jobs to run (or be drained
    /// by cancellation) and surfaces the error to this caller only.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning`, `ResourceExhausted` (queue full), `Timeout` (sync
    /// bound elapsed), `ExternalDependency` (input fence failed), or the
    /// first error recorded against the context's batches in sync mode.
    pub fn commit(&self, ctx: &Arc<Context>) -> Result<Option<Fence>, DispatchError> {
        let fence = self.fences.create();
        let (mode, priority, batches, input) = {
            let mut st = ctx.state();
            if st.running {
                return Err(DispatchError::AlreadyRunning(ctx.handle()));
            }
            st.begin_commit();
            if !st.batches.is_empty() {
                // Installed under the same lock as the running flag, so a
                // concurrent cancel always finds a fence to resolve.
                st.out_fence = Some(fence.clone());
            }
            (
                st.sync_mode,
                st.priority,
                st.batches.clone(),
                st.input_fence.clone(),
            )
        };

        if batches.is_empty() {
            // Nothing configured; resolve immediately.
            fence.signal();
            return Ok(match mode {
                SyncMode::Async => Some(fence),
                SyncMode::Sync => None,
            });
        }

        let jobs: Vec<Job> = batches
            .iter()
            .enumerate()
            .map(|(idx, program)| {
                Job::new(
                    self.next_seq(),
                    Arc::clone(ctx),
                    Arc::clone(program),
                    idx,
                    priority,
                    mode,
                )
            })
            .collect();

        tracing::info!(
            handle = %ctx.handle(),
            batches = jobs.len(),
            mode = ?mode,
            priority = %priority,
            "context committed"
        );

        match mode {
            SyncMode::Async => {
                match input {
                    Some(input) => self.schedule_after_input(ctx, input, jobs)?,
                    None => self.schedule_all(ctx, jobs)?,
                }
                Ok(Some(fence))
            }
            SyncMode::Sync => {
                if let Some(input) = input {
                    if let Err(err) = input.wait(self.timeouts.sync_wait) {
                        let err = match err {
                            DispatchError::Timeout => DispatchError::Timeout,
                            other => DispatchError::ExternalDependency(other.to_string()),
                        };
                        self.abort_uncommitted(ctx, err.clone());
                        return Err(err);
                    }
                }
                self.schedule_all(ctx, jobs)?;
                match fence.wait(self.timeouts.sync_wait) {
                    Ok(()) => Ok(None),
                    Err(DispatchError::Timeout) => {
                        self.recover_stalled(ctx);
                        Err(DispatchError::Timeout)
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    /// Hand an asynchronous commit's jobs to the scheduler once the input
    /// fence resolves; immediately when it already has (the status check
    /// avoids the registration race).
    fn schedule_after_input(
        &self,
        ctx: &Arc<Context>,
        input: Fence,
        jobs: Vec<Job>,
    ) -> Result<(), DispatchError> {
        match input.status() {
            FenceStatus::Signaled => self.schedule_all(ctx, jobs),
            FenceStatus::Pending => {
                let lifecycle = self.clone();
                let ctx = Arc::clone(ctx);
                self.fences.register_on_input_ready(&input, move |status| {
                    match status {
                        FenceStatus::Signaled => {
                            if let Err(err) = lifecycle.schedule_all(&ctx, jobs) {
                                tracing::warn!(
                                    handle = %ctx.handle(),
                                    error = %err,
                                    "deferred schedule failed"
                                );
                            }
                        }
                        FenceStatus::Failed(err) => {
                            lifecycle.abort_uncommitted(
                                &ctx,
                                DispatchError::ExternalDependency(err.to_string()),
                            );
                        }
                        FenceStatus::Pending => {}
                    }
                });
                Ok(())
            }
            FenceStatus::Failed(err) => {
                let err = DispatchError::ExternalDependency(err.to_string());
                self.abort_uncommitted(ctx, err.clone());
                Err(err)
            }
        }
    }

    /// Enqueue jobs in batch order, pumping the engine after each.
    fn schedule_all(&self, ctx: &Arc<Context>, jobs: Vec<Job>) -> Result<(), DispatchError> {
        for job in jobs {
            // Reap a wedged asynchronous job before taking more queue space,
            // in addition to the periodic watchdog.
            self.reap_timed_out();

            if let Err(err) = self.scheduler.enqueue(job) {
                tracing::warn!(
                    handle = %ctx.handle(),
                    error = %err,
                    "commit stopped early; queued batches continue"
                );
                let mut st = ctx.state();
                if st.first_error.is_none() {
                    st.first_error = Some(err.clone());
                }
                drop(st);
                self.pump();
                return Err(err);
            }
            ctx.state().committed_batches += 1;
            self.pump();
        }
        Ok(())
    }

    /// Dispatch until the engine is busy or the queue is empty, finalizing
    /// jobs whose hardware setup failed.
    fn pump(&self) {
        loop {
            let failed = self.scheduler.dispatch_next();
            if failed.is_empty() {
                break;
            }
            for (job, err) in failed {
                self.conclude(&job, &JobOutcome::HardwareFault(err.to_string()));
            }
        }
    }

    /// Finalize `job` with `outcome`, then keep the engine fed.
    ///
    /// Called once per job by exactly one of: the interrupt path, the
    /// timeout reaper, cancellation, or the dispatch-failure path.
    pub fn finish(&self, job: Job, outcome: JobOutcome) {
        self.conclude(&job, &outcome);
        self.pump();
    }

    /// External interrupt entry point: the engine reported completion or an
    /// error for the currently running job.
    pub fn on_interrupt(&self, flags: StatusBits) {
        self.scheduler
            .counters()
            .interrupts
            .fetch_add(1, Ordering::Relaxed);

        let Some(job) = self.scheduler.complete_running() else {
            tracing::warn!(?flags, "completion interrupt with no running job");
            return;
        };

        let outcome = if flags.is_error() {
            // Bus/timeout error bits leave the engine in an undefined state;
            // reset before the next dispatch.
            self.scheduler.hw().reset();
            JobOutcome::HardwareFault(format!("engine status {flags:?}"))
        } else {
            JobOutcome::Done
        };
        self.finish(job, outcome);
    }

    /// Reap the running job if it is asynchronous and exceeded its bound.
    ///
    /// Returns whether a job was reaped. Invoked periodically by the watchdog
    /// and opportunistically on the schedule path.
    pub fn reap_timed_out(&self) -> bool {
        let Some(job) = self.scheduler.reap_timed_out(self.timeouts.async_job) else {
            return false;
        };
        tracing::warn!(
            job = job.seq(),
            handle = %job.handle(),
            bound_ms = self.timeouts.async_job.as_millis() as u64,
            "no completion within bound, resetting engine"
        );
        self.scheduler.hw().reset();
        self.finish(job, JobOutcome::TimedOut);
        true
    }

    /// Cancel everything the context has in flight.
    ///
    /// Idempotent and safe to race with natural completion: each job is
    /// finalized by whichever path extracts it from the scheduler first. A
    /// context with nothing committed returns without touching the scheduler.
    pub fn cancel(&self, ctx: &Arc<Context>) {
        let active = {
            let st = ctx.state();
            st.running && st.finished_batches < st.batches.len()
        };
        if !active {
            return;
        }

        let handle = ctx.handle();
        for job in self.scheduler.remove_pending_for(handle) {
            self.conclude(&job, &JobOutcome::Cancelled);
        }

        if let Some(job) = self.scheduler.take_running_if(|job| job.handle() == handle) {
            tracing::warn!(handle = %handle, job = job.seq(), "resetting engine to cancel in-flight job");
            self.scheduler.hw().reset();
            self.conclude(&job, &JobOutcome::Cancelled);
        }

        // A partial commit can leave the finished count short of the total;
        // resolve the fence so no waiter is stranded.
        let fence = {
            let mut st = ctx.state();
            st.running = false;
            st.out_fence.take()
        };
        if let Some(fence) = fence {
            fence.fail(DispatchError::Cancelled);
        }
        self.pump();
    }

    /// Sync-wait timeout recovery: drain the context, reset if its job was
    /// on the hardware, and let the queue progress.
    fn recover_stalled(&self, ctx: &Arc<Context>) {
        let handle = ctx.handle();
        for job in self.scheduler.remove_pending_for(handle) {
            self.conclude(&job, &JobOutcome::Cancelled);
        }
        if let Some(job) = self.scheduler.take_running_if(|job| job.handle() == handle) {
            tracing::warn!(handle = %handle, job = job.seq(), "blocking wait expired, resetting engine");
            self.scheduler.hw().reset();
            self.conclude(&job, &JobOutcome::TimedOut);
        }
        let fence = {
            let mut st = ctx.state();
            st.running = false;
            st.out_fence.take()
        };
        if let Some(fence) = fence {
            fence.fail(DispatchError::Timeout);
        }
        self.pump();
    }

    /// Resolve a commit whose jobs never reached the scheduler.
    fn abort_uncommitted(&self, ctx: &Arc<Context>, err: DispatchError) {
        let fence = {
            let mut st = ctx.state();
            st.running = false;
            if st.first_error.is_none() {
                st.first_error = Some(err.clone());
            }
            st.out_fence.take()
        };
        if let Some(fence) = fence {
            fence.fail(err);
        }
    }

    /// Record the job's outcome against its context and resolve the output
    /// fence when this was the last batch. Does not dispatch.
    fn conclude(&self, job: &Job, outcome: &JobOutcome) {
        let counters = self.scheduler.counters();
        match outcome {
            JobOutcome::Done => counters.completed.fetch_add(1, Ordering::Relaxed),
            JobOutcome::HardwareFault(_) => counters.hw_faults.fetch_add(1, Ordering::Relaxed),
            JobOutcome::TimedOut => counters.timed_out.fetch_add(1, Ordering::Relaxed),
            JobOutcome::Cancelled => counters.cancelled.fetch_add(1, Ordering::Relaxed),
        };

        if let Some(hw) = job.hw_elapsed() {
            tracing::debug!(
                job = job.seq(),
                handle = %job.handle(),
                outcome = ?outcome,
                hw_us = hw.as_micros() as u64,
                total_us = job.submitted_at().elapsed().as_micros() as u64,
                "job finalized"
            );
        } else {
            tracing::debug!(
                job = job.seq(),
                handle = %job.handle(),
                outcome = ?outcome,
                "job finalized before hardware start"
            );
        }

        let ctx = job.context();
        let resolution = {
            let mut st = ctx.state();
            st.finished_batches += 1;
            if let Some(err) = outcome.error() {
                if st.first_error.is_none() {
                    st.first_error = Some(err);
                }
            }
            if st.running && st.finished_batches >= st.batches.len() {
                st.running = false;
                Some((st.out_fence.take(), st.first_error.clone()))
            } else {
                None
            }
        };

        if let Some((fence, first_error)) = resolution {
            if let Some(fence) = fence {
                match first_error {
                    None => fence.signal(),
                    Some(err) => fence.fail(err),
                }
            }
        }
    }
}
