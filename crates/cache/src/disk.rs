//! Persistent thumbnail cache keyed by source fingerprint.
//!
//! One file per fingerprint, named `<hex>.tvc`. Each file carries the source
//! identity it was generated from, so a lookup can confirm that the entry really
//! belongs to the requested file. Writers serialize into `<hex>.part` and rename,
//! which means readers only ever see complete entries and workers writing
//! different fingerprints never touch the same file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use tracing::debug;

use crate::error::CacheError;
use crate::fingerprint::{SourceIdentity, ENTRY_EXTENSION};

/// Extension used for entries that are still being written.
pub const PARTIAL_EXTENSION: &str = "part";

const MAGIC: &[u8; 4] = b"TVTC";
const FORMAT_VERSION: u32 = 1;

/// Statistics for monitoring disk cache behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskCacheStats {
    /// Lookups answered from a stored entry
    pub hits: u64,
    /// Lookups with no usable entry
    pub misses: u64,
    /// Stored entries that could not be decoded
    pub corrupt: u64,
    /// Entries written successfully
    pub writes: u64,
    /// Entries that failed to persist
    pub write_failures: u64,
}

impl DiskCacheStats {
    /// Cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Reduced-resolution RGBA8 bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailBitmap {
    pub width: u32,
    pub height: u32,
    /// Pixel data, 4 bytes per pixel, row-major
    pub pixels: Vec<u8>,
}

impl ThumbnailBitmap {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// A bitmap of one repeated RGBA colour.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba.repeat(width as usize * height as usize);
        Self::new(width, height, pixels)
    }

    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    fn expected_len(width: u32, height: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
    }
}

/// A thumbnail together with the dimensions of the image it was made from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedThumbnail {
    pub bitmap: ThumbnailBitmap,
    /// Full-resolution width of the source image
    pub source_width: u32,
    /// Full-resolution height of the source image
    pub source_height: u32,
}

/// On-disk thumbnail cache
///
/// Thread-safe; clones share statistics and the directory.
#[derive(Debug, Clone)]
pub struct DiskThumbnailCache {
    dir: PathBuf,
    stats: Arc<Mutex<DiskCacheStats>>,
}

impl DiskThumbnailCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, CacheError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        Ok(Self {
            dir,
            stats: Arc::new(Mutex::new(DiskCacheStats::default())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the entry that would hold `identity`'s thumbnail.
    pub fn entry_path(&self, identity: &SourceIdentity) -> PathBuf {
        self.dir.join(identity.fingerprint().file_name())
    }

    /// Look up the thumbnail for `identity`.
    ///
    /// Returns `Ok(None)` when there is no entry or the entry was written for a
    /// different identity, and `Err(CacheError::Corrupt)` when the entry cannot
    /// be decoded. Callers treat both as a miss and regenerate.
    pub fn load(&self, identity: &SourceIdentity) -> Result<Option<CachedThumbnail>, CacheError> {
        let path = self.entry_path(identity);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.record(|s| s.misses += 1);
                return Ok(None);
            }
            Err(e) => {
                self.record(|s| s.misses += 1);
                return Err(CacheError::io(&path, e));
            }
        };

        let (stored, thumbnail) = match decode_entry(&bytes) {
            Ok(decoded) => decoded,
            Err(reason) => {
                self.record(|s| {
                    s.misses += 1;
                    s.corrupt += 1;
                });
                return Err(CacheError::corrupt(&path, reason));
            }
        };

        if stored != *identity {
            debug!(entry = %path.display(), "cache entry identity mismatch");
            self.record(|s| s.misses += 1);
            return Ok(None);
        }

        self.record(|s| s.hits += 1);
        Ok(Some(thumbnail))
    }

    /// Persist `thumbnail` as the entry for `identity`, replacing any old one.
    pub fn store(&self, identity: &SourceIdentity, thumbnail: &CachedThumbnail) -> Result<(), CacheError> {
        let result = self.write_entry(identity, thumbnail);
        match &result {
            Ok(()) => self.record(|s| s.writes += 1),
            Err(_) => self.record(|s| s.write_failures += 1),
        }
        result
    }

    fn write_entry(&self, identity: &SourceIdentity, thumbnail: &CachedThumbnail) -> Result<(), CacheError> {
        let final_path = self.entry_path(identity);
        let partial_path = final_path.with_extension(PARTIAL_EXTENSION);
        let bytes = encode_entry(identity, thumbnail);

        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&partial_path)?;
            file.write_all(&bytes)?;
            file.sync_all()
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&partial_path);
            return Err(CacheError::io(&partial_path, e));
        }

        fs::rename(&partial_path, &final_path).map_err(|e| {
            let _ = fs::remove_file(&partial_path);
            CacheError::io(&final_path, e)
        })
    }

    /// Remove the entry for `identity` if present.
    pub fn remove(&self, identity: &SourceIdentity) -> Result<bool, CacheError> {
        let path = self.entry_path(identity);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    /// Number of committed entries in the cache directory.
    pub fn entry_count(&self) -> Result<usize, CacheError> {
        Ok(self.entry_paths()?.len())
    }

    /// Delete every entry (and any partial write). Returns entries removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        let read_dir = fs::read_dir(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        for entry in read_dir {
            let path = entry.map_err(|e| CacheError::io(&self.dir, e))?.path();
            let is_entry = has_extension(&path, ENTRY_EXTENSION);
            if !is_entry && !has_extension(&path, PARTIAL_EXTENSION) {
                continue;
            }
            fs::remove_file(&path).map_err(|e| CacheError::io(&path, e))?;
            if is_entry {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub(crate) fn entry_paths(&self) -> Result<Vec<PathBuf>, CacheError> {
        let read_dir = fs::read_dir(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        let mut paths = Vec::new();
        for entry in read_dir {
            let path = entry.map_err(|e| CacheError::io(&self.dir, e))?.path();
            if has_extension(&path, ENTRY_EXTENSION) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// Get current cache statistics
    pub fn stats(&self) -> DiskCacheStats {
        self.stats.lock().unwrap().clone()
    }

    fn record(&self, update: impl FnOnce(&mut DiskCacheStats)) {
        update(&mut self.stats.lock().unwrap());
    }
}

pub(crate) fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some(extension)
}

fn encode_entry(identity: &SourceIdentity, thumbnail: &CachedThumbnail) -> Vec<u8> {
    let path = identity.path.to_string_lossy();
    let modified = identity.modified_since_epoch();
    let bitmap = &thumbnail.bitmap;

    let mut out = Vec::with_capacity(64 + path.len() + bitmap.pixels.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(path.len() as u32).to_le_bytes());
    out.extend_from_slice(path.as_bytes());
    out.extend_from_slice(&identity.size.to_le_bytes());
    out.extend_from_slice(&modified.as_secs().to_le_bytes());
    out.extend_from_slice(&modified.subsec_nanos().to_le_bytes());
    out.extend_from_slice(&thumbnail.source_width.to_le_bytes());
    out.extend_from_slice(&thumbnail.source_height.to_le_bytes());
    out.extend_from_slice(&bitmap.width.to_le_bytes());
    out.extend_from_slice(&bitmap.height.to_le_bytes());
    out.extend_from_slice(&(bitmap.pixels.len() as u64).to_le_bytes());
    out.extend_from_slice(&bitmap.pixels);
    out
}

/// Cursor over an entry's bytes; every read is bounds checked.
struct EntryReader<'a> {
    bytes: &'a [u8],
}

impl<'a> EntryReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], &'static str> {
        if self.bytes.len() < n {
            return Err("truncated entry");
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32, &'static str> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64, &'static str> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }
}

fn decode_entry(bytes: &[u8]) -> Result<(SourceIdentity, CachedThumbnail), &'static str> {
    let mut reader = EntryReader { bytes };

    if reader.take(4)? != MAGIC {
        return Err("bad magic");
    }
    if reader.u32()? != FORMAT_VERSION {
        return Err("unsupported format version");
    }

    let path_len = reader.u32()? as usize;
    let path = std::str::from_utf8(reader.take(path_len)?).map_err(|_| "path is not UTF-8")?;
    let size = reader.u64()?;
    let secs = reader.u64()?;
    let nanos = reader.u32()?;
    if nanos >= 1_000_000_000 {
        return Err("invalid modification time");
    }
    let modified = UNIX_EPOCH
        .checked_add(Duration::new(secs, nanos))
        .ok_or("invalid modification time")?;

    let source_width = reader.u32()?;
    let source_height = reader.u32()?;
    let width = reader.u32()?;
    let height = reader.u32()?;
    let pixel_len = reader.u64()? as usize;
    if ThumbnailBitmap::expected_len(width, height) != Some(pixel_len) {
        return Err("pixel length does not match dimensions");
    }
    let pixels = reader.take(pixel_len)?.to_vec();
    if !reader.bytes.is_empty() {
        return Err("trailing bytes");
    }

    Ok((
        SourceIdentity::new(path, size, modified),
        CachedThumbnail {
            bitmap: ThumbnailBitmap::new(width, height, pixels),
            source_width,
            source_height,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn create_test_cache() -> (DiskThumbnailCache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskThumbnailCache::new(dir.path().join("thumbs")).unwrap();
        (cache, dir)
    }

    fn identity(name: &str) -> SourceIdentity {
        SourceIdentity::new(
            format!("/photos/{}", name),
            4096,
            UNIX_EPOCH + Duration::new(1_650_000_000, 123_456_789),
        )
    }

    fn thumbnail(width: u32, height: u32) -> CachedThumbnail {
        let pixels = (0..width * height * 4).map(|_| rand::random::<u8>()).collect();
        CachedThumbnail {
            bitmap: ThumbnailBitmap::new(width, height, pixels),
            source_width: width * 8,
            source_height: height * 8,
        }
    }

    #[test]
    fn test_store_then_load() {
        let (cache, _dir) = create_test_cache();
        let id = identity("a.png");
        let thumb = thumbnail(16, 9);

        cache.store(&id, &thumb).unwrap();
        let loaded = cache.load(&id).unwrap().unwrap();

        assert_eq!(loaded, thumb);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().writes, 1);
    }

    #[test]
    fn test_missing_entry_is_a_miss() {
        let (cache, _dir) = create_test_cache();

        assert!(cache.load(&identity("nothing.png")).unwrap().is_none());

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_changed_identity_misses() {
        let (cache, _dir) = create_test_cache();
        let id = identity("a.png");
        cache.store(&id, &thumbnail(4, 4)).unwrap();

        let mut touched = id.clone();
        touched.modified = SystemTime::now();

        assert!(cache.load(&touched).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_entry_reports_corruption() {
        let (cache, _dir) = create_test_cache();
        let id = identity("a.png");
        cache.store(&id, &thumbnail(4, 4)).unwrap();

        let path = cache.entry_path(&id);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        let err = cache.load(&id).unwrap_err();
        assert!(err.is_corrupt());
        assert_eq!(cache.stats().corrupt, 1);
    }

    #[test]
    fn test_garbage_entry_reports_corruption() {
        let (cache, _dir) = create_test_cache();
        let id = identity("a.png");
        fs::write(cache.entry_path(&id), b"definitely not a thumbnail").unwrap();

        assert!(cache.load(&id).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_store_replaces_existing_entry() {
        let (cache, _dir) = create_test_cache();
        let id = identity("a.png");

        cache.store(&id, &thumbnail(4, 4)).unwrap();
        let second = thumbnail(8, 2);
        cache.store(&id, &second).unwrap();

        assert_eq!(cache.load(&id).unwrap().unwrap(), second);
        assert_eq!(cache.entry_count().unwrap(), 1);
    }

    #[test]
    fn test_no_partial_file_left_after_store() {
        let (cache, _dir) = create_test_cache();
        cache.store(&identity("a.png"), &thumbnail(2, 2)).unwrap();

        let leftovers = fs::read_dir(cache.dir())
            .unwrap()
            .filter(|e| has_extension(&e.as_ref().unwrap().path(), PARTIAL_EXTENSION))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let (cache, _dir) = create_test_cache();
        let id = identity("a.png");
        let thumb = thumbnail(3, 5);
        cache.store(&id, &thumb).unwrap();

        let reopened = DiskThumbnailCache::new(cache.dir()).unwrap();
        assert_eq!(reopened.load(&id).unwrap().unwrap(), thumb);
    }

    #[test]
    fn test_remove_and_clear() {
        let (cache, _dir) = create_test_cache();
        for name in ["a.png", "b.png", "c.png"] {
            cache.store(&identity(name), &thumbnail(2, 2)).unwrap();
        }
        fs::write(cache.dir().join("stale.part"), b"x").unwrap();
        fs::write(cache.dir().join("notes.txt"), b"keep me").unwrap();

        assert!(cache.remove(&identity("a.png")).unwrap());
        assert!(!cache.remove(&identity("a.png")).unwrap());
        assert_eq!(cache.entry_count().unwrap(), 2);

        assert_eq!(cache.clear().unwrap(), 2);
        assert_eq!(cache.entry_count().unwrap(), 0);
        assert!(!cache.dir().join("stale.part").exists());
        assert!(cache.dir().join("notes.txt").exists());
    }

    #[test]
    fn test_concurrent_writers_distinct_entries() {
        let (cache, _dir) = create_test_cache();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let id = identity(&format!("img{}.png", i));
                    cache.store(&id, &thumbnail(8, 8)).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.entry_count().unwrap(), 8);
        assert_eq!(cache.stats().writes, 8);
    }
}
