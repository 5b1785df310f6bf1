//! Error types for the thumbnail cache.

use std::io;
use std::path::{Path, PathBuf};

/// Errors raised while reading, writing or sweeping the on-disk cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Read or write failure on a cache file or the cache directory
    #[error("cache I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A stored entry exists but cannot be decoded
    #[error("corrupt cache entry {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

impl CacheError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error describes an unreadable stored entry.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}
