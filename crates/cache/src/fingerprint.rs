//! Source file identity and the fingerprint derived from it.
//!
//! A fingerprint names a cache entry. It is derived from the path, byte size and
//! modification time of the source file, never from its contents, so computing
//! it costs one `stat` and no reads.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// File extension of a committed cache entry.
pub const ENTRY_EXTENSION: &str = "tvc";

/// Bumped whenever the hashed fields change so old entries stop matching.
const FINGERPRINT_VERSION: u8 = 1;

/// Identity triple of a source image file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceIdentity {
    /// Path to the source file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
}

impl SourceIdentity {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: SystemTime) -> Self {
        Self {
            path: path.into(),
            size,
            modified,
        }
    }

    /// Read the identity of a file from its metadata.
    pub fn from_path<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let metadata = fs::metadata(path)?;
        Ok(Self::new(path, metadata.len(), metadata.modified()?))
    }

    /// Modification time as a duration since the Unix epoch.
    ///
    /// Times before the epoch collapse to zero.
    pub fn modified_since_epoch(&self) -> Duration {
        self.modified
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }

    /// File name component of the path, or the whole path if it has none.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }

    /// Compute the cache fingerprint for this identity.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[FINGERPRINT_VERSION]);
        hasher.update(self.path.to_string_lossy().as_bytes());
        hasher.update(&self.size.to_le_bytes());
        hasher.update(&self.modified_since_epoch().as_nanos().to_le_bytes());
        Fingerprint(*hasher.finalize().as_bytes())
    }
}

/// BLAKE3 digest identifying one version of one source file.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Lowercase hex encoding (64 characters).
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// Name of the cache file holding this fingerprint's entry.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.to_hex(), ENTRY_EXTENSION)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
