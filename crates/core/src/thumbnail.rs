//! Background thumbnail generation.
//!
//! Requests move a record's slot to `Requested` and queue it with the
//! scheduler. Workers consult the disk cache first and only decode on a miss,
//! writing the result back. Cache trouble never fails a request: a corrupt
//! entry is deleted and regenerated, and a failed write only costs the next
//! run a decode.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thumbview_cache::DiskThumbnailCache;
use thumbview_scheduler::{Job, JobId, JobScheduler, Visibility, WorkerPool, WorkerPoolConfig};
use tracing::{debug, warn};

use crate::codec::{DecodeOptions, ThumbnailDecoder};
use crate::image::{Image, ThumbnailSlot, ThumbnailState};

type SlotJob = Arc<ThumbnailSlot>;

/// Result of a thumbnail request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A new job was queued
    Enqueued(JobId),
    /// A queued off-screen job was re-tagged as visible
    Promoted,
    /// Nothing to do: already requested, generating or ready
    AlreadyRequested,
    /// Off-screen capacity is full; ask again on a later pass
    Deferred,
}

/// Pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Thumbnails produced by the decoder
    pub generated: u64,
    /// Thumbnails served from the disk cache
    pub from_cache: u64,
    /// Requests that ended in `Failed`
    pub failed: u64,
    /// Thumbnails that could not be written to the cache
    pub cache_write_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    generated: AtomicU64,
    from_cache: AtomicU64,
    failed: AtomicU64,
    cache_write_failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            generated: self.generated.load(Ordering::Relaxed),
            from_cache: self.from_cache.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cache_write_failures: self.cache_write_failures.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of [`ThumbnailPipeline::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineShutdown {
    /// Every job finished before the deadline
    pub idle: bool,
    /// Requests dropped before they started
    pub abandoned: usize,
    /// Workers still running when the pipeline let go of them
    pub detached: usize,
}

/// Request queue and worker pool for thumbnail generation.
pub struct ThumbnailPipeline {
    scheduler: Arc<JobScheduler<SlotJob>>,
    pool: WorkerPool<SlotJob>,
    counters: Arc<Counters>,
}

impl ThumbnailPipeline {
    /// Start the workers.
    ///
    /// At most `offscreen_cap` off-screen jobs are queued or running at once.
    pub fn start(
        cache: DiskThumbnailCache,
        decoder: Arc<dyn ThumbnailDecoder>,
        options: DecodeOptions,
        pool_config: WorkerPoolConfig,
        offscreen_cap: usize,
    ) -> io::Result<Self> {
        let scheduler = Arc::new(JobScheduler::new(offscreen_cap));
        let counters = Arc::new(Counters::default());

        let executor = {
            let counters = counters.clone();
            Arc::new(move |job: &Job<SlotJob>| {
                generate(&job.payload, &cache, decoder.as_ref(), &options, &counters);
            })
        };
        let pool = WorkerPool::new(scheduler.clone(), executor, pool_config)?;

        Ok(Self {
            scheduler,
            pool,
            counters,
        })
    }

    /// Ask for `image`'s thumbnail.
    ///
    /// Only `NotRequested` and `Failed` records get a new job. A visible request
    /// for a record still queued off-screen promotes that job instead. An
    /// off-screen request is deferred while the off-screen cap is reached.
    pub fn request(&self, image: &Image, visibility: Visibility) -> RequestOutcome {
        let slot = image.slot();

        if !visibility.is_visible() && self.offscreen_in_flight() >= self.offscreen_cap() {
            return match slot.state() {
                ThumbnailState::NotRequested | ThumbnailState::Failed => RequestOutcome::Deferred,
                _ => RequestOutcome::AlreadyRequested,
            };
        }

        if slot.try_request() {
            let id = self.scheduler.submit(visibility, slot.clone());
            debug!(image = %slot.id(), job = id, ?visibility, "thumbnail requested");
            return RequestOutcome::Enqueued(id);
        }

        if visibility.is_visible()
            && slot.state() == ThumbnailState::Requested
            && self.scheduler.promote(|queued| Arc::ptr_eq(queued, slot))
        {
            return RequestOutcome::Promoted;
        }
        RequestOutcome::AlreadyRequested
    }

    /// Retry a failed thumbnail. Records in any other state are left alone.
    pub fn refresh(&self, image: &Image) -> RequestOutcome {
        if image.thumbnail_state() != ThumbnailState::Failed {
            return RequestOutcome::AlreadyRequested;
        }
        self.request(image, Visibility::Visible)
    }

    /// Off-screen jobs queued or running.
    pub fn offscreen_in_flight(&self) -> usize {
        self.scheduler.offscreen_in_flight()
    }

    pub fn offscreen_cap(&self) -> usize {
        self.scheduler.offscreen_cap()
    }

    /// Block until every request has finished or `timeout` elapses.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.scheduler.wait_idle(timeout)
    }

    /// Drop queued requests, returning their records to `NotRequested`.
    ///
    /// Jobs already running are unaffected.
    pub fn discard_pending(&self) -> usize {
        let jobs = self.scheduler.clear_pending();
        for job in &jobs {
            job.payload.withdraw_request();
        }
        jobs.len()
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    /// Wait up to `timeout` for outstanding work, then stop the workers.
    pub fn shutdown(&mut self, timeout: Duration) -> PipelineShutdown {
        let report = self.pool.drain(timeout);
        for job in &report.abandoned {
            job.payload.withdraw_request();
        }

        PipelineShutdown {
            idle: report.idle,
            abandoned: report.abandoned.len(),
            detached: report.detached,
        }
    }
}

/// Worker body for one slot.
fn generate(
    slot: &ThumbnailSlot,
    cache: &DiskThumbnailCache,
    decoder: &dyn ThumbnailDecoder,
    options: &DecodeOptions,
    counters: &Counters,
) {
    if slot.begin_generating().is_err() {
        return;
    }
    let identity = slot.identity();

    match cache.load(identity) {
        Ok(Some(thumbnail)) => {
            counters.from_cache.fetch_add(1, Ordering::Relaxed);
            slot.complete(Ok(thumbnail));
            return;
        }
        Ok(None) => {}
        Err(e) if e.is_corrupt() => {
            warn!(image = %slot.id(), error = %e, "discarding corrupt cache entry");
            if let Err(e) = cache.remove(identity) {
                warn!(image = %slot.id(), error = %e, "could not remove corrupt cache entry");
            }
        }
        Err(e) => {
            warn!(image = %slot.id(), error = %e, "cache read failed; regenerating");
        }
    }

    match decoder.decode_thumbnail(&identity.path, options) {
        Ok(thumbnail) => {
            if let Err(e) = cache.store(identity, &thumbnail) {
                warn!(image = %slot.id(), error = %e, "could not persist thumbnail");
                counters.cache_write_failures.fetch_add(1, Ordering::Relaxed);
            }
            counters.generated.fetch_add(1, Ordering::Relaxed);
            slot.complete(Ok(thumbnail));
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            slot.complete(Err(e));
        }
    }
}
