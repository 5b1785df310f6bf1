//! Quota sweep for the on-disk thumbnail cache.
//!
//! The sweep trims the cache directory back to a configured entry count, oldest
//! entries first. It must only run while no generation worker is active.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_MAX_ENTRIES;
use crate::disk::{has_extension, PARTIAL_EXTENSION};
use crate::error::CacheError;
use crate::fingerprint::ENTRY_EXTENSION;

/// Entries removed below the maximum once a sweep triggers.
pub const DEFAULT_SWEEP_HEADROOM: usize = 100;

/// Entry-count policy applied by a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSweep {
    /// A sweep only removes anything when the entry count exceeds this
    pub max_entries: usize,
    /// How far below `max_entries` a triggered sweep trims
    pub headroom: usize,
}

impl QuotaSweep {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            headroom: DEFAULT_SWEEP_HEADROOM,
        }
    }

    pub fn with_headroom(mut self, headroom: usize) -> Self {
        self.headroom = headroom;
        self
    }

    /// Entry count a triggered sweep trims down to, clamped at zero.
    pub fn target_count(&self) -> usize {
        self.max_entries.saturating_sub(self.headroom)
    }

    /// Sweep `dir`, removing the oldest entries when over quota.
    pub fn run<P: AsRef<Path>>(&self, dir: P) -> Result<SweepReport, CacheError> {
        let dir = dir.as_ref();
        let mut report = SweepReport {
            target: self.target_count(),
            ..SweepReport::default()
        };

        let read_dir = match fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(CacheError::io(dir, e)),
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| CacheError::io(dir, e))?;
            let path = entry.path();

            if has_extension(&path, PARTIAL_EXTENSION) {
                match fs::remove_file(&path) {
                    Ok(()) => report.orphans_removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial cache entry"),
                }
                continue;
            }
            if !has_extension(&path, ENTRY_EXTENSION) {
                continue;
            }

            let created = match entry.metadata() {
                Ok(metadata) => metadata
                    .created()
                    .or_else(|_| metadata.modified())
                    .unwrap_or(UNIX_EPOCH),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot stat cache entry");
                    UNIX_EPOCH
                }
            };
            entries.push(CacheEntryInfo { path, created });
        }

        report.examined = entries.len();
        if report.examined <= self.max_entries {
            debug!(entries = report.examined, max = self.max_entries, "cache within quota");
            return Ok(report);
        }

        for victim in plan_removals(entries, self) {
            match fs::remove_file(&victim.path) {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    warn!(path = %victim.path.display(), error = %e, "failed to remove cache entry");
                    report.failed += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            removed = report.removed,
            failed = report.failed,
            target = report.target,
            "cache quota sweep finished"
        );
        Ok(report)
    }
}

impl Default for QuotaSweep {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

/// A committed cache entry as seen by the sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntryInfo {
    pub path: PathBuf,
    pub created: SystemTime,
}

/// Outcome of a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Committed entries found
    pub examined: usize,
    /// Entry count the sweep trimmed toward
    pub target: usize,
    /// Entries deleted
    pub removed: usize,
    /// Entries whose deletion failed
    pub failed: usize,
    /// Partial writes cleaned up
    pub orphans_removed: usize,
}

/// Choose which entries to delete, oldest first.
///
/// Returns nothing when `entries` fits within `policy.max_entries`. Otherwise
/// returns exactly `entries.len() - policy.target_count()` entries. A failed
/// deletion still counts toward that quota, so the caller never reaches past
/// the planned set.
pub fn plan_removals(mut entries: Vec<CacheEntryInfo>, policy: &QuotaSweep) -> Vec<CacheEntryInfo> {
    if entries.len() <= policy.max_entries {
        return Vec::new();
    }

    entries.sort_by(|a, b| match a.created.cmp(&b.created) {
        Ordering::Equal => a.path.cmp(&b.path),
        other => other,
    });
    let excess = entries.len() - policy.target_count();
    entries.truncate(excess);
    entries
}
