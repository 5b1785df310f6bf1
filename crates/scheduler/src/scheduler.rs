//! Job scheduler implementation
//!
//! Owns the pending queue and the running counts behind one lock. Admission of
//! off-screen work is decided in the same critical section that hands the job
//! to a worker, so the off-screen cap holds at every instant rather than only
//! on average.

use crate::priority::{Job, JobId, JobQueue, Visibility};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Default cap on concurrently running off-screen jobs.
pub const DEFAULT_OFFSCREEN_CAP: usize = 3;

/// Job scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total jobs submitted
    pub jobs_submitted: u64,

    /// Total jobs completed
    pub jobs_completed: u64,

    /// Jobs removed from the queue without running
    pub jobs_abandoned: u64,

    /// Off-screen jobs re-tagged as visible
    pub jobs_promoted: u64,

    /// Current queue size
    pub queue_size: usize,

    /// Jobs currently executing
    pub running: usize,
}

impl SchedulerStats {
    /// Get the number of jobs submitted but not yet finished
    pub fn pending_jobs(&self) -> u64 {
        self.jobs_submitted - self.jobs_completed - self.jobs_abandoned
    }
}

struct SchedulerState<T> {
    queue: JobQueue<T>,
    running_visible: usize,
    running_offscreen: usize,
    stats: SchedulerStats,
}

impl<T> SchedulerState<T> {
    fn running(&self, visibility: Visibility) -> usize {
        match visibility {
            Visibility::Visible => self.running_visible,
            Visibility::OffScreen => self.running_offscreen,
        }
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.running_visible == 0 && self.running_offscreen == 0
    }
}

/// Visibility-aware job scheduler
///
/// Thread-safe. Visible jobs are always dequeued ahead of off-screen ones and
/// are not subject to the off-screen cap.
///
/// # Example
///
/// ```
/// use thumbview_scheduler::{JobScheduler, Visibility};
///
/// let scheduler = JobScheduler::new(1);
/// scheduler.submit(Visibility::OffScreen, "a.png");
/// scheduler.submit(Visibility::OffScreen, "b.png");
///
/// let job = scheduler.next_job().unwrap();
/// assert_eq!(job.payload, "a.png");
///
/// // The cap of one off-screen job is reached
/// assert!(scheduler.next_job().is_none());
///
/// scheduler.complete_job(&job);
/// assert_eq!(scheduler.next_job().unwrap().payload, "b.png");
/// ```
pub struct JobScheduler<T> {
    state: Mutex<SchedulerState<T>>,
    idle: Condvar,
    offscreen_cap: usize,
}

impl<T> JobScheduler<T> {
    /// Create a scheduler allowing at most `offscreen_cap` running off-screen jobs
    pub fn new(offscreen_cap: usize) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                queue: JobQueue::new(),
                running_visible: 0,
                running_offscreen: 0,
                stats: SchedulerStats::default(),
            }),
            idle: Condvar::new(),
            offscreen_cap,
        }
    }

    pub fn offscreen_cap(&self) -> usize {
        self.offscreen_cap
    }

    /// Submit a job to the scheduler
    pub fn submit(&self, visibility: Visibility, payload: T) -> JobId {
        let mut state = self.state.lock().unwrap();
        state.stats.jobs_submitted += 1;
        state.queue.push(visibility, payload)
    }

    /// Get the next job to execute
    ///
    /// Returns `None` when the queue is empty, or when the best candidate is
    /// off-screen and the off-screen cap is already reached. The returned job
    /// counts as running until `complete_job()` is called.
    pub fn next_job(&self) -> Option<Job<T>> {
        let mut state = self.state.lock().unwrap();

        let visibility = state.queue.peek()?.visibility;
        if visibility == Visibility::OffScreen && state.running(Visibility::OffScreen) >= self.offscreen_cap {
            return None;
        }

        let job = state.queue.pop()?;
        match job.visibility {
            Visibility::Visible => state.running_visible += 1,
            Visibility::OffScreen => state.running_offscreen += 1,
        }
        Some(job)
    }

    /// Mark a job returned by `next_job()` as finished
    pub fn complete_job(&self, job: &Job<T>) {
        let mut state = self.state.lock().unwrap();
        match job.visibility {
            Visibility::Visible => state.running_visible = state.running_visible.saturating_sub(1),
            Visibility::OffScreen => {
                state.running_offscreen = state.running_offscreen.saturating_sub(1)
            }
        }
        state.stats.jobs_completed += 1;

        if state.is_idle() {
            self.idle.notify_all();
        }
    }

    /// Re-tag a queued off-screen job as visible
    ///
    /// Returns `true` if a job matching `predicate` was promoted.
    pub fn promote<F>(&self, predicate: F) -> bool
    where
        F: Fn(&T) -> bool,
    {
        let mut state = self.state.lock().unwrap();
        let promoted = state.queue.promote(predicate);
        if promoted {
            state.stats.jobs_promoted += 1;
        }
        promoted
    }

    /// Off-screen jobs queued or running
    pub fn offscreen_in_flight(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.queue.count(Visibility::OffScreen) + state.running_offscreen
    }

    /// Jobs of the given tag currently executing
    #[cfg(test)]
    pub(crate) fn running(&self, visibility: Visibility) -> usize {
        self.state.lock().unwrap().running(visibility)
    }

    /// Get the current number of pending jobs
    pub fn pending_jobs(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// True when nothing is queued and nothing is running
    pub fn is_idle(&self) -> bool {
        self.state.lock().unwrap().is_idle()
    }

    /// Block until the scheduler is idle or `timeout` elapses
    ///
    /// Returns `true` if the scheduler became idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();

        while !state.is_idle() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self.idle.wait_timeout(state, deadline - now).unwrap().0;
        }
        true
    }

    /// Remove every pending job, returning them highest priority first
    pub fn clear_pending(&self) -> Vec<Job<T>> {
        let mut state = self.state.lock().unwrap();
        let jobs = state.queue.drain_sorted();
        state.stats.jobs_abandoned += jobs.len() as u64;

        if state.is_idle() {
            self.idle.notify_all();
        }
        jobs
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let state = self.state.lock().unwrap();
        let mut stats = state.stats.clone();
        stats.queue_size = state.queue.len();
        stats.running = state.running_visible + state.running_offscreen;
        stats
    }
}

impl<T> Default for JobScheduler<T> {
    fn default() -> Self {
        Self::new(DEFAULT_OFFSCREEN_CAP)
    }
}
