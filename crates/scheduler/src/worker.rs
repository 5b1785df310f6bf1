//! Worker pool for parallel job execution.
//!
//! Workers run on named threads, pulling jobs from the scheduler and handing
//! them to a shared executor. There is no mid-flight cancellation: a job that
//! has started always runs to completion. Teardown goes through
//! [`WorkerPool::drain`], which waits for outstanding work up to a deadline and
//! then lets go of anything still running.

use crate::{Job, JobScheduler};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Callback function for job execution.
///
/// Workers invoke this callback for each job they pull from the scheduler.
pub type JobExecutor<T> = Arc<dyn Fn(&Job<T>) + Send + Sync>;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    /// Default: number of logical CPU cores.
    pub num_workers: usize,

    /// Maximum time a worker will wait for a job before checking shutdown.
    /// Default: 20ms.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::new(num_cpus())
    }
}

impl WorkerPoolConfig {
    /// Create a new worker pool configuration.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            poll_interval: Duration::from_millis(20),
        }
    }

    /// Set the poll interval for workers.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Outcome of [`WorkerPool::drain`].
#[derive(Debug)]
pub struct DrainReport<T> {
    /// All submitted work finished before the deadline
    pub idle: bool,
    /// Jobs that never started, highest priority first
    pub abandoned: Vec<Job<T>>,
    /// Worker threads still busy when the pool let go of them
    pub detached: usize,
}

impl<T> DrainReport<T> {
    /// True when every worker thread was joined.
    pub fn is_clean(&self) -> bool {
        self.detached == 0
    }
}

/// Worker pool for parallel job execution.
///
/// # Example
///
/// ```
/// use thumbview_scheduler::{Job, JobScheduler, Visibility, WorkerPool, WorkerPoolConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let scheduler = Arc::new(JobScheduler::new(3));
/// let executor = Arc::new(|job: &Job<String>| {
///     println!("generating thumbnail for {}", job.payload);
/// });
///
/// let mut pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(2)).unwrap();
/// scheduler.submit(Visibility::Visible, "a.png".to_string());
///
/// let report = pool.drain(Duration::from_secs(5));
/// assert!(report.idle);
/// ```
pub struct WorkerPool<T: Send + 'static> {
    scheduler: Arc<JobScheduler<T>>,
    workers: Vec<Worker>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create and start a new worker pool.
    ///
    /// # Errors
    ///
    /// Returns the spawn error if a worker thread cannot be created. Workers
    /// started before the failure are told to stop.
    pub fn new(
        scheduler: Arc<JobScheduler<T>>,
        executor: JobExecutor<T>,
        config: WorkerPoolConfig,
    ) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(config.num_workers);

        for id in 0..config.num_workers {
            match Worker::spawn(
                id,
                scheduler.clone(),
                executor.clone(),
                shutdown.clone(),
                config.poll_interval,
            ) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    shutdown.store(true, Ordering::Release);
                    return Err(e);
                }
            }
        }

        debug!(workers = workers.len(), "worker pool started");
        Ok(Self {
            scheduler,
            workers,
            shutdown,
            poll_interval: config.poll_interval,
        })
    }

    /// Get the number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Check if the worker pool is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Wait for outstanding work, then stop the workers.
    ///
    /// Waits up to `timeout` for the queue to empty and running jobs to finish.
    /// Then signals shutdown, removes anything still queued and joins every
    /// worker that exits within a short grace period. Workers still running a
    /// job after that are detached and reported.
    pub fn drain(&mut self, timeout: Duration) -> DrainReport<T> {
        let idle = self.scheduler.wait_idle(timeout);
        self.shutdown.store(true, Ordering::Release);
        let abandoned = self.scheduler.clear_pending();
        let detached = self.stop_workers();

        if !abandoned.is_empty() {
            debug!(abandoned = abandoned.len(), "dropped queued jobs at shutdown");
        }

        DrainReport {
            idle,
            abandoned,
            detached,
        }
    }

    /// Signal shutdown and join every worker that exits within the grace
    /// period. Returns the number left running.
    fn stop_workers(&mut self) -> usize {
        self.shutdown.store(true, Ordering::Release);

        let grace = Instant::now() + self.poll_interval * 2 + Duration::from_millis(50);
        let mut workers = std::mem::take(&mut self.workers);
        while workers.iter().any(|w| !w.is_finished()) && Instant::now() < grace {
            thread::sleep(Duration::from_millis(5));
        }

        let mut detached = 0;
        for worker in workers.drain(..) {
            if worker.is_finished() {
                worker.join();
            } else {
                detached += 1;
            }
        }

        if detached > 0 {
            warn!(detached, "worker pool stop timed out; detaching busy workers");
        }
        detached
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

/// A single worker thread in the worker pool.
struct Worker {
    id: usize,
    thread: JoinHandle<()>,
}

impl Worker {
    /// Create and start a new worker thread.
    fn spawn<T: Send + 'static>(
        id: usize,
        scheduler: Arc<JobScheduler<T>>,
        executor: JobExecutor<T>,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> io::Result<Self> {
        let thread = thread::Builder::new()
            .name(format!("thumbview-worker-{}", id))
            .spawn(move || {
                Self::run(id, scheduler, executor, shutdown, poll_interval);
            })?;

        Ok(Self { id, thread })
    }

    /// Main worker loop.
    ///
    /// Workers continuously pull jobs from the scheduler, execute them,
    /// and mark them as complete. They check for shutdown signals between
    /// jobs and sleep briefly if no jobs are available.
    fn run<T>(
        id: usize,
        scheduler: Arc<JobScheduler<T>>,
        executor: JobExecutor<T>,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) {
        loop {
            if shutdown.load(Ordering::Acquire) {
                break;
            }

            if let Some(job) = scheduler.next_job() {
                if panic::catch_unwind(AssertUnwindSafe(|| executor(&job))).is_err() {
                    error!(worker = id, job = job.id, "job executor panicked");
                }
                scheduler.complete_job(&job);
            } else {
                thread::sleep(poll_interval);
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    fn join(self) {
        if self.thread.join().is_err() {
            error!(worker = self.id, "worker thread panicked");
        }
    }
}

/// Get the number of logical CPU cores.
///
/// This is used as the default number of worker threads.
fn num_cpus() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
