//! Disk cache configuration.
//!
//! Deserialized as the `[cache]` table of the viewer configuration file; every
//! field is optional and falls back to its default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::sweep::{QuotaSweep, DEFAULT_SWEEP_HEADROOM};

/// Default maximum number of thumbnail entries kept on disk.
pub const DEFAULT_MAX_ENTRIES: usize = 8192;

/// Configuration for the on-disk thumbnail cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding one file per thumbnail
    pub cache_dir: PathBuf,
    /// Entry count above which a quota sweep removes entries
    pub max_entries: usize,
    /// How far below `max_entries` a sweep trims
    pub sweep_headroom: usize,
    /// Delete every cache entry when the viewer shuts down
    pub delete_on_exit: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: Self::default_cache_dir(),
            max_entries: DEFAULT_MAX_ENTRIES,
            sweep_headroom: DEFAULT_SWEEP_HEADROOM,
            delete_on_exit: false,
        }
    }
}

impl CacheConfig {
    /// Returns the default cache directory for the current platform.
    ///
    /// - macOS: ~/Library/Caches/thumbview/thumbnails
    /// - Linux: ~/.cache/thumbview/thumbnails
    /// - Windows: %LOCALAPPDATA%\thumbview\thumbnails
    pub fn default_cache_dir() -> PathBuf {
        if let Some(cache_dir) = dirs::cache_dir() {
            cache_dir.join("thumbview").join("thumbnails")
        } else {
            // Fallback to current directory if cache dir unavailable
            PathBuf::from("cache/thumbnails")
        }
    }

    /// Sets the cache directory.
    pub fn with_cache_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cache_dir = path.as_ref().to_path_buf();
        self
    }

    /// Sets the maximum entry count.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Sets the sweep headroom.
    pub fn with_sweep_headroom(mut self, headroom: usize) -> Self {
        self.sweep_headroom = headroom;
        self
    }

    pub fn with_delete_on_exit(mut self, delete: bool) -> Self {
        self.delete_on_exit = delete;
        self
    }

    /// Sweep policy described by this configuration.
    pub fn quota_sweep(&self) -> QuotaSweep {
        QuotaSweep::new(self.max_entries).with_headroom(self.sweep_headroom)
    }
}
