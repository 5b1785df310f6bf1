//! Directory listing.

use std::io;
use std::path::Path;

use thumbview_cache::SourceIdentity;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions the viewer lists, lowercase.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff", "webp", "tga", "ico", "pbm", "pgm", "ppm", "pnm", "qoi",
];

/// Lists the image files of a directory.
pub trait DirectoryScanner: Send + Sync {
    fn scan(&self, dir: &Path) -> io::Result<Vec<SourceIdentity>>;
}

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.iter().any(|s| e.eq_ignore_ascii_case(s)))
        .unwrap_or(false)
}

/// Filesystem scanner. Lists regular files directly inside the directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsScanner;

impl FsScanner {
    pub fn new() -> Self {
        Self
    }
}

impl DirectoryScanner for FsScanner {
    fn scan(&self, dir: &Path) -> io::Result<Vec<SourceIdentity>> {
        if !dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not a directory: {}", dir.display()),
            ));
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_supported(entry.path()) {
                continue;
            }
            match SourceIdentity::from_path(entry.path()) {
                Ok(identity) => entries.push(identity),
                Err(e) => warn!(path = %entry.path().display(), error = %e, "skipping file"),
            }
        }

        debug!(dir = %dir.display(), files = entries.len(), "scanned directory");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_lists_supported_files_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.png"), b"x").unwrap();
        fs::write(dir.path().join("B.JPG"), b"xy").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(dir.path().join("noext"), b"x").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c.png"), b"x").unwrap();

        let mut names: Vec<_> = FsScanner.scan(dir.path()).unwrap().iter().map(|e| e.file_name()).collect();
        names.sort();
        assert_eq!(names, ["B.JPG", "a.png"]);
    }

    #[test]
    fn test_records_size() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.gif"), [0u8; 17]).unwrap();
        let entries = FsScanner.scan(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].size, 17);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FsScanner.scan(&dir.path().join("gone")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_extension_match_ignores_case() {
        assert!(is_supported(Path::new("x.TiFf")));
        assert!(!is_supported(Path::new("x.raw")));
        assert!(!is_supported(Path::new("png")));
    }
}
