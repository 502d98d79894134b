//! Pending queue: descending priority, FIFO among equals, with priority
//! inflation of overtaken entries.

use std::collections::VecDeque;

use crate::core::context::ContextHandle;
use crate::core::error::DispatchError;
use crate::core::job::Job;

/// Priority-ordered pending queue for one engine.
///
/// Insertion policy:
/// - default-priority arrivals and arrivals into an empty queue append at the
///   tail (cheap path, no scan)
/// - otherwise the queue is scanned from the head and the job lands
///   immediately before the first entry with strictly lower priority
/// - every entry originally at or after the insertion point has its priority
///   incremented by one, saturating at the maximum — including equal-priority
///   entries past that point. Repeatedly overtaken jobs therefore migrate
///   toward the head, bounding worst-case latency for low-priority work.
#[derive(Debug)]
pub(crate) struct PendingQueue {
    max_depth: usize,
    jobs: VecDeque<Job>,
}

impl PendingQueue {
    pub(crate) fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            jobs: VecDeque::with_capacity(max_depth.min(64)),
        }
    }

    /// Insert a job per the priority policy.
    pub(crate) fn insert(&mut self, job: Job) -> Result<(), DispatchError> {
        if self.jobs.len() >= self.max_depth {
            return Err(DispatchError::ResourceExhausted(format!(
                "pending queue full (depth={})",
                self.jobs.len()
            )));
        }

        if job.priority().is_default() || self.jobs.is_empty() {
            self.jobs.push_back(job);
            return Ok(());
        }

        let mut insert_at = None;
        for (idx, queued) in self.jobs.iter_mut().enumerate() {
            if insert_at.is_none() && job.priority() > queued.priority() {
                insert_at = Some(idx);
            }
            // Everything from the insertion point on is inflated, equal-priority
            // entries past it included.
            if insert_at.is_some() {
                queued.inflate_priority();
            }
        }

        match insert_at {
            Some(idx) => self.jobs.insert(idx, job),
            None => self.jobs.push_back(job),
        }
        Ok(())
    }

    /// Remove and return the head of the queue.
    pub(crate) fn pop_front(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    /// Remove every queued job belonging to `handle`.
    pub(crate) fn remove_for(&mut self, handle: ContextHandle) -> Vec<Job> {
        let jobs = std::mem::take(&mut self.jobs);
        let (removed, kept): (Vec<Job>, Vec<Job>) =
            jobs.into_iter().partition(|job| job.handle() == handle);
        self.jobs = kept.into();
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Snapshot of queued priorities, head first. Test support.
    #[cfg(test)]
    pub(crate) fn priorities(&self) -> Vec<u8> {
        self.jobs.iter().map(|job| job.priority().value()).collect()
    }

    /// Snapshot of queued batch indexes, head first. Test support.
    #[cfg(test)]
    pub(crate) fn batch_indexes(&self) -> Vec<usize> {
        self.jobs.iter().map(Job::batch_index).collect()
    }
}
