//! Bounded-concurrency admission for render work.
//!
//! At most `max_concurrent` jobs run at once. Everyone else waits in
//! arrival order (the tokio semaphore is fair) for at most `wait_timeout`;
//! a job whose wait expires is abandoned and never runs later.

pub mod job;

pub use job::{JobPriority, JobState, RenderJob};

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RenderError;

/// Point-in-time view of the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenderQueueStats {
    pub max_concurrent: usize,
    pub waiting: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
}

#[derive(Debug, Default)]
struct QueueCounters {
    waiting: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

pub struct RenderQueue {
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    wait_timeout: Duration,
    live: DashMap<Uuid, JobState>,
    counters: QueueCounters,
}

impl std::fmt::Debug for RenderQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderQueue")
            .field("max_concurrent", &self.max_concurrent)
            .field("wait_timeout", &self.wait_timeout)
            .field("available", &self.slots.available_permits())
            .field("live_jobs", &self.live.len())
            .finish()
    }
}

impl RenderQueue {
    /// `max_concurrent` is clamped to at least one slot.
    pub fn new(max_concurrent: usize, wait_timeout: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            wait_timeout,
            live: DashMap::new(),
            counters: QueueCounters::default(),
        }
    }

    /// Half the logical CPUs, between one and two slots. Headless renderers
    /// are memory hungry; more parallelism than this thrashes small hosts.
    pub fn default_concurrency() -> usize {
        (num_cpus::get() / 2).clamp(1, 2)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// Wait for a slot, then run `work` while holding it.
    ///
    /// The slot is released when `work` finishes, fails, or the returned
    /// future is dropped.
    pub async fn submit<F, Fut, T>(
        &self,
        job: RenderJob,
        work: F,
    ) -> Result<T, RenderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RenderError>>,
    {
        let mut ticket = Ticket::enqueue(self, job.id);
        debug!(
            job_id = %job.id,
            document_id = %job.document_id,
            priority = %job.priority,
            force = job.force_regenerate,
            waiting = self.counters.waiting.load(Ordering::Relaxed),
            "render job queued"
        );

        let acquired =
            tokio::time::timeout(self.wait_timeout, self.slots.clone().acquire_owned())
                .await;
        let _permit = match acquired {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                ticket.finish(JobState::Failed);
                return Err(RenderError::QueueClosed);
            }
            Err(_) => {
                let waited = job.submitted_at.elapsed();
                warn!(
                    job_id = %job.id,
                    document_id = %job.document_id,
                    waited_ms = waited.as_millis(),
                    "render job timed out waiting for a slot"
                );
                ticket.finish(JobState::TimedOut);
                return Err(RenderError::QueueTimeout {
                    job_id: job.id,
                    waited,
                });
            }
        };

        ticket.start();
        let queued_ms = job.submitted_at.elapsed().as_millis();
        info!(
            job_id = %job.id,
            document_id = %job.document_id,
            priority = %job.priority,
            queued_ms,
            "render job started"
        );

        let result = work().await;
        match &result {
            Ok(_) => {
                ticket.finish(JobState::Completed);
                info!(
                    job_id = %job.id,
                    total_ms = job.submitted_at.elapsed().as_millis(),
                    "render job completed"
                );
            }
            Err(err) => {
                ticket.finish(JobState::Failed);
                warn!(job_id = %job.id, kind = err.kind(), "render job failed: {err}");
            }
        }
        result
    }

    pub fn job_state(&self, id: &Uuid) -> Option<JobState> {
        self.live.get(id).map(|s| *s)
    }

    pub fn stats(&self) -> RenderQueueStats {
        RenderQueueStats {
            max_concurrent: self.max_concurrent,
            waiting: self.counters.waiting.load(Ordering::Relaxed),
            running: self.counters.running.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
        }
    }

    /// Reject waiting and future jobs. Running jobs finish normally.
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }
}

/// Keeps `waiting`/`running` and the live-job table consistent even when
/// the submitting future is dropped mid-wait or mid-run.
struct Ticket<'a> {
    queue: &'a RenderQueue,
    id: Uuid,
    state: JobState,
}

impl<'a> Ticket<'a> {
    fn enqueue(queue: &'a RenderQueue, id: Uuid) -> Self {
        queue.counters.waiting.fetch_add(1, Ordering::Relaxed);
        queue.live.insert(id, JobState::Queued);
        Self {
            queue,
            id,
            state: JobState::Queued,
        }
    }

    fn start(&mut self) {
        self.leave();
        self.queue.counters.running.fetch_add(1, Ordering::Relaxed);
        self.queue.live.insert(self.id, JobState::Running);
        self.state = JobState::Running;
    }

    fn finish(&mut self, outcome: JobState) {
        self.leave();
        let counter = match outcome {
            JobState::Completed => &self.queue.counters.completed,
            JobState::Failed => &self.queue.counters.failed,
            JobState::TimedOut => &self.queue.counters.timed_out,
            JobState::Queued | JobState::Running => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.state = outcome;
    }

    fn leave(&mut self) {
        match self.state {
            JobState::Queued => {
                self.queue.counters.waiting.fetch_sub(1, Ordering::Relaxed);
            }
            JobState::Running => {
                self.queue.counters.running.fetch_sub(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            debug!(job_id = %self.id, state = ?self.state, "render job abandoned");
            self.leave();
        }
        self.queue.live.remove(&self.id);
    }
}
