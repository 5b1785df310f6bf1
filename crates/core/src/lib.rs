//! Thumbview core library
//!
//! Image records, catalog ordering, background thumbnail generation and the
//! full-resolution memory budget for a directory image viewer.

pub mod budget;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod image;
pub mod scan;
pub mod sort;
pub mod thumbnail;
pub mod visibility;

pub use budget::{CycleGuard, EvictionReport, MemoryBudgetManager, RAPID_CYCLE_THRESHOLD};
pub use catalog::Catalog;
pub use codec::{
    DecodeOptions, DisplayHandle, DisplayUploader, HeadlessUploader, ImageDecoder, PixelBuffer, RasterCodec,
    ThumbnailDecoder,
};
pub use config::ViewerConfig;
pub use context::{Collaborators, ShutdownReport, ViewerContext};
pub use error::{ConfigError, ImageError, ViewerError, ViewerResult};
pub use self::image::{DecodeState, FileType, Image, ImageId, ThumbnailSlot, ThumbnailState};
pub use scan::{DirectoryScanner, FsScanner, SUPPORTED_EXTENSIONS};
pub use sort::{comparator, sort_images, SortKey, SortSpec};
pub use thumbnail::{PipelineShutdown, PipelineStats, RequestOutcome, ThumbnailPipeline};
pub use visibility::{PassReport, RowThumbnail, VisibilityScheduler};

pub use thumbview_cache::{CacheConfig, SourceIdentity, SweepReport};
pub use thumbview_scheduler::Visibility;
