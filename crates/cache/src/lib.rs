//! Thumbview Cache Library
//!
//! Persistent thumbnail cache keyed by source fingerprint, the quota sweep that
//! keeps it bounded, and the age-based eviction planner for decoded images.

pub mod config;
pub mod disk;
pub mod error;
pub mod fingerprint;
pub mod memory_budget;
pub mod sweep;

pub use config::{CacheConfig, DEFAULT_MAX_ENTRIES};
pub use disk::{CachedThumbnail, DiskCacheStats, DiskThumbnailCache, ThumbnailBitmap};
pub use error::CacheError;
pub use fingerprint::{Fingerprint, SourceIdentity};
pub use memory_budget::{EvictionPlan, MemoryBudget, ResidentImage};
pub use sweep::{plan_removals, CacheEntryInfo, QuotaSweep, SweepReport, DEFAULT_SWEEP_HEADROOM};
