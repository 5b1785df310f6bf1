//! Thumbview Scheduler Library
//!
//! Visibility-tagged job queue and worker pool for background thumbnail work.
//!
//! Jobs carry a [`Visibility`] tag. Visible jobs always dequeue first and are
//! never throttled; off-screen jobs fill spare capacity, with at most
//! `offscreen_cap` of them running at once.
//!
//! # Example
//!
//! ```
//! use thumbview_scheduler::{JobScheduler, Visibility};
//!
//! let scheduler = JobScheduler::new(3);
//!
//! scheduler.submit(Visibility::OffScreen, "far-away.png");
//! scheduler.submit(Visibility::Visible, "on-screen.png");
//!
//! let job = scheduler.next_job().unwrap();
//! assert_eq!(job.payload, "on-screen.png");
//! scheduler.complete_job(&job);
//! ```

mod priority;
mod scheduler;
mod worker;

// Re-export public API
pub use priority::{Job, JobId, Visibility};
pub use scheduler::{JobScheduler, SchedulerStats, DEFAULT_OFFSCREEN_CAP};
pub use worker::{DrainReport, JobExecutor, WorkerPool, WorkerPoolConfig};
