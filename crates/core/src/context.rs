//! The viewer facade.
//!
//! [`ViewerContext`] owns the catalog, the thumbnail pipeline and the memory
//! budget, and is driven from a single control thread. Collaborators that
//! touch the filesystem, the codecs or the display are injected.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thumbview_cache::{DiskThumbnailCache, SweepReport};
use thumbview_scheduler::Visibility;
use tracing::{debug, info, warn};

use crate::budget::{EvictionReport, MemoryBudgetManager};
use crate::catalog::Catalog;
use crate::codec::{DisplayHandle, DisplayUploader, HeadlessUploader, ImageDecoder, RasterCodec, ThumbnailDecoder};
use crate::config::ViewerConfig;
use crate::error::{ViewerError, ViewerResult};
use crate::image::{Image, ImageId};
use crate::scan::{DirectoryScanner, FsScanner};
use crate::sort::SortSpec;
use crate::thumbnail::{PipelineShutdown, PipelineStats, RequestOutcome, ThumbnailPipeline};
use crate::visibility::{PassReport, VisibilityScheduler};

/// Injected services.
#[derive(Clone)]
pub struct Collaborators {
    pub scanner: Arc<dyn DirectoryScanner>,
    pub thumbnails: Arc<dyn ThumbnailDecoder>,
    pub images: Arc<dyn ImageDecoder>,
    pub uploader: Arc<dyn DisplayUploader>,
}

impl Collaborators {
    /// Filesystem scanner, `image`-crate codecs and a headless uploader.
    pub fn headless() -> Self {
        Self {
            scanner: Arc::new(FsScanner::new()),
            thumbnails: Arc::new(RasterCodec::new()),
            images: Arc::new(RasterCodec::new()),
            uploader: Arc::new(HeadlessUploader::new()),
        }
    }
}

/// What happened during [`ViewerContext::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub pipeline: PipelineShutdown,
    /// Entries deleted because the cache is cleared on exit
    pub cache_cleared: Option<usize>,
    pub sweep: Option<SweepReport>,
}

pub struct ViewerContext {
    config: ViewerConfig,
    collaborators: Collaborators,
    cache: DiskThumbnailCache,
    pipeline: ThumbnailPipeline,
    catalog: Catalog,
    budget: MemoryBudgetManager,
    visibility: VisibilityScheduler,
    directory: Option<PathBuf>,
    startup_sweep: Option<SweepReport>,
}

impl ViewerContext {
    /// Validate `config`, prepare the cache and start the workers.
    ///
    /// The quota sweep runs before any worker exists, so it never races a
    /// cache write. A failed sweep is logged and startup continues.
    pub fn open(config: ViewerConfig, collaborators: Collaborators) -> ViewerResult<Self> {
        config.validate()?;

        let cache = DiskThumbnailCache::new(&config.cache.cache_dir)?;
        let startup_sweep = match config.cache.quota_sweep().run(cache.dir()) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "startup cache sweep failed");
                None
            }
        };

        let pipeline = ThumbnailPipeline::start(
            cache.clone(),
            collaborators.thumbnails.clone(),
            config.decode_options(),
            config.pool_config(),
            config.offscreen_concurrency,
        )?;

        let placeholder = collaborators.uploader.upload(1, 1, &PLACEHOLDER_PIXEL);
        info!(
            cache_dir = %cache.dir().display(),
            workers = config.worker_threads,
            offscreen = config.offscreen_concurrency,
            "viewer started"
        );

        Ok(Self {
            catalog: Catalog::new(config.sort_spec()),
            budget: MemoryBudgetManager::new(config.memory_budget()),
            visibility: VisibilityScheduler::new(placeholder),
            config,
            collaborators,
            cache,
            pipeline,
            directory: None,
            startup_sweep,
        })
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn cache(&self) -> &DiskThumbnailCache {
        &self.cache
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn placeholder(&self) -> DisplayHandle {
        self.visibility.placeholder()
    }

    pub fn startup_sweep(&self) -> Option<&SweepReport> {
        self.startup_sweep.as_ref()
    }

    /// Replace the catalog with the contents of `dir`. Returns the image count.
    pub fn open_directory<P: AsRef<Path>>(&mut self, dir: P) -> ViewerResult<usize> {
        let dir = dir.as_ref();
        let entries = self.collaborators.scanner.scan(dir)?;

        let discarded = self.pipeline.discard_pending();
        self.catalog.populate(entries, self.collaborators.uploader.as_ref());
        self.directory = Some(dir.to_path_buf());

        debug!(dir = %dir.display(), discarded, "directory opened");
        Ok(self.catalog.len())
    }

    /// Scan the open directory again, rebuilding the catalog only if the set
    /// of files changed. Returns `true` if it rebuilt.
    pub fn rescan(&mut self) -> ViewerResult<bool> {
        let Some(dir) = self.directory.clone() else {
            return Ok(false);
        };
        let entries = self.collaborators.scanner.scan(&dir)?;
        if !self.catalog.listing_changed(&entries) {
            return Ok(false);
        }

        self.pipeline.discard_pending();
        self.catalog.populate(entries, self.collaborators.uploader.as_ref());
        info!(dir = %dir.display(), images = self.catalog.len(), "directory changed; catalog rebuilt");
        Ok(true)
    }

    /// Run a display pass. `is_visible` receives each row's display index.
    pub fn display_pass<F>(&mut self, is_visible: F) -> PassReport
    where
        F: Fn(usize, &Image) -> bool,
    {
        self.visibility.run_pass(
            &mut self.catalog,
            &self.pipeline,
            self.collaborators.uploader.as_ref(),
            is_visible,
        )
    }

    pub fn request_thumbnail(&self, id: ImageId, visibility: Visibility) -> ViewerResult<RequestOutcome> {
        Ok(self.pipeline.request(self.image(id)?, visibility))
    }

    /// The image's thumbnail handle, or the placeholder while none is ready.
    pub fn bind_thumbnail(&mut self, id: ImageId) -> ViewerResult<DisplayHandle> {
        let placeholder = self.visibility.placeholder();
        let uploader = self.collaborators.uploader.clone();
        let image = self.catalog.get_mut(id).ok_or(ViewerError::UnknownImage(id))?;
        Ok(image.bind_thumbnail(uploader.as_ref()).unwrap_or(placeholder))
    }

    /// Retry a failed thumbnail.
    pub fn refresh_thumbnail(&self, id: ImageId) -> ViewerResult<RequestOutcome> {
        Ok(self.pipeline.refresh(self.image(id)?))
    }

    pub fn offscreen_in_flight(&self) -> usize {
        self.pipeline.offscreen_in_flight()
    }

    pub fn is_loaded(&self, id: ImageId) -> bool {
        self.catalog.is_loaded(id)
    }

    /// Load `id` at full resolution. A fresh decode then brings memory back
    /// within budget.
    ///
    /// Returns `false` if decoding failed; the reason is kept on the record.
    pub fn load(&mut self, id: ImageId) -> ViewerResult<bool> {
        self.image(id)?;
        let was_loaded = self.catalog.is_loaded(id);
        let options = self.config.decode_options();
        let loaded = self
            .catalog
            .load(id, self.collaborators.images.as_ref(), &options);
        if loaded && !was_loaded {
            self.enforce_budget();
        }
        Ok(loaded)
    }

    pub fn unload(&mut self, id: ImageId, force: bool) -> ViewerResult<bool> {
        self.image(id)?;
        Ok(self
            .catalog
            .unload(id, self.collaborators.uploader.as_ref(), force))
    }

    /// Make `id` current and return its full-resolution handle.
    ///
    /// `None` means the image could not be decoded.
    pub fn show(&mut self, id: ImageId) -> ViewerResult<Option<DisplayHandle>> {
        let previous = self.catalog.current();
        if !self.catalog.set_current(id) {
            return Err(ViewerError::UnknownImage(id));
        }
        let was_loaded = self.catalog.is_loaded(id);
        self.load(id)?;
        // The previous current image just became evictable
        if was_loaded && previous != Some(id) {
            self.enforce_budget();
        }

        let uploader = self.collaborators.uploader.clone();
        Ok(self
            .catalog
            .get_mut(id)
            .and_then(|image| image.bind(uploader.as_ref())))
    }

    /// Show the image after the current one. Wraps around while cycling.
    pub fn show_next(&mut self) -> ViewerResult<Option<ImageId>> {
        self.step(true)
    }

    pub fn show_previous(&mut self) -> ViewerResult<Option<ImageId>> {
        self.step(false)
    }

    fn step(&mut self, forward: bool) -> ViewerResult<Option<ImageId>> {
        let target = match self.catalog.current() {
            Some(current) => {
                let wrap = self.budget.cycle_guard().is_cycling();
                self.catalog.neighbour(current, forward, wrap)
            }
            None if forward => self.catalog.iter().next().map(Image::id),
            None => self.catalog.iter().last().map(Image::id),
        };

        match target {
            Some(id) => {
                self.show(id)?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Start (`Some`) or stop (`None`) automatic cycling.
    pub fn set_cycle_interval(&mut self, interval: Option<Duration>) {
        self.budget.set_cycle_interval(interval);
    }

    pub fn sort(&mut self, spec: SortSpec) {
        self.catalog.sort(spec);
    }

    /// Bytes of full-resolution pixels held.
    pub fn memory_in_use(&self) -> usize {
        self.catalog.resident_bytes()
    }

    pub fn enforce_budget(&mut self) -> EvictionReport {
        self.budget
            .enforce(&mut self.catalog, self.collaborators.uploader.as_ref())
    }

    pub fn pipeline_stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    /// Block until no thumbnail job is queued or running.
    pub fn wait_for_thumbnails(&self, timeout: Duration) -> bool {
        self.pipeline.wait_idle(timeout)
    }

    /// Release display resources, stop the workers and tidy the cache.
    ///
    /// The cache is only cleared or swept once every worker has exited.
    pub fn shutdown(mut self) -> ViewerResult<ShutdownReport> {
        let uploader = self.collaborators.uploader.clone();
        self.catalog.teardown(uploader.as_ref());
        uploader.release(self.visibility.placeholder());

        let mut report = ShutdownReport {
            pipeline: self.pipeline.shutdown(self.config.shutdown_timeout()),
            ..ShutdownReport::default()
        };

        if report.pipeline.detached > 0 {
            warn!(
                detached = report.pipeline.detached,
                "workers still running; skipping cache maintenance"
            );
            return Ok(report);
        }

        if self.config.cache.delete_on_exit {
            report.cache_cleared = Some(self.cache.clear()?);
        } else {
            report.sweep = Some(self.config.cache.quota_sweep().run(self.cache.dir())?);
        }

        info!(abandoned = report.pipeline.abandoned, "viewer shut down");
        Ok(report)
    }

    fn image(&self, id: ImageId) -> ViewerResult<&Image> {
        self.catalog.get(id).ok_or(ViewerError::UnknownImage(id))
    }
}

const PLACEHOLDER_PIXEL: [u8; 4] = [64, 64, 64, 255];
