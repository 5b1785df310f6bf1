//! Error types for the viewer core.

use std::path::PathBuf;

use thumbview_cache::CacheError;

/// Failure recorded on an image record.
///
/// Cloneable so the reason can be kept on the record and shown on inspection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    /// Malformed or unsupported source
    #[error("cannot decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    /// Read or write failure on the source or cache
    #[error("I/O error on {}: {reason}", path.display())]
    Io { path: PathBuf, reason: String },

    /// Unreadable stored thumbnail
    #[error("corrupt cache entry for {}: {reason}", path.display())]
    CacheCorrupt { path: PathBuf, reason: String },

    /// A state transition the record structure should have made impossible
    #[error("invariant violated: {0}")]
    InvariantViolation(&'static str),
}

impl ImageError {
    pub fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Io {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<CacheError> for ImageError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Corrupt { path, reason } => Self::CacheCorrupt { path, reason },
            CacheError::Io { path, source } => Self::Io {
                path,
                reason: source.to_string(),
            },
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl ConfigError {
    pub(crate) fn invalid(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Top-level error for viewer operations.
#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown image {0}")]
    UnknownImage(crate::image::ImageId),
}

pub type ViewerResult<T> = Result<T, ViewerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_corruption_maps_to_cache_corrupt() {
        let err = ImageError::from(CacheError::Corrupt {
            path: PathBuf::from("/c/x.tvc"),
            reason: "bad magic".into(),
        });
        assert_eq!(
            err,
            ImageError::CacheCorrupt {
                path: PathBuf::from("/c/x.tvc"),
                reason: "bad magic".into()
            }
        );
    }

    #[test]
    fn test_messages_name_the_file() {
        let err = ImageError::decode("/photos/broken.png", "unexpected EOF");
        assert_eq!(err.to_string(), "cannot decode /photos/broken.png: unexpected EOF");
    }
}
