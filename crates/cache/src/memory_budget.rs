//! Memory budget for fully decoded images.
//!
//! The planner here is pure: callers describe what is resident and get back the
//! set of keys to unload. Eviction is age based, oldest load first, and entries
//! flagged non-evictable (the image on screen, unsaved edits) are never chosen
//! even if that leaves the budget exceeded.

use std::time::Instant;

const BYTES_PER_MB: usize = 1024 * 1024;

/// Upper bound on bytes of decoded pixel data held at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBudget {
    budget_bytes: usize,
}

impl MemoryBudget {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    /// Create a budget with a limit in megabytes
    pub fn with_limit_mb(mb: usize) -> Self {
        Self::new(mb.saturating_mul(BYTES_PER_MB))
    }

    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    pub fn is_over(&self, used_bytes: usize) -> bool {
        used_bytes > self.budget_bytes
    }

    /// Decide which resident entries to evict.
    pub fn plan<K>(&self, mut resident: Vec<ResidentImage<K>>) -> EvictionPlan<K> {
        let used_before: usize = resident.iter().map(|r| r.bytes).sum();
        let mut used = used_before;
        let mut victims = Vec::new();

        if self.is_over(used) {
            resident.sort_by_key(|r| r.loaded_at);
            for candidate in resident {
                if !self.is_over(used) {
                    break;
                }
                if !candidate.evictable {
                    continue;
                }
                used -= candidate.bytes;
                victims.push(candidate.key);
            }
        }

        EvictionPlan {
            victims,
            used_before,
            used_after: used,
            budget_bytes: self.budget_bytes,
        }
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::with_limit_mb(1024)
    }
}

/// One decoded image as seen by the planner.
#[derive(Debug, Clone)]
pub struct ResidentImage<K> {
    pub key: K,
    /// Size of the decoded pixel buffer
    pub bytes: usize,
    /// When the decode finished
    pub loaded_at: Instant,
    /// False for entries that must stay resident
    pub evictable: bool,
}

/// Keys to unload, oldest first, and the resulting usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionPlan<K> {
    pub victims: Vec<K>,
    pub used_before: usize,
    pub used_after: usize,
    budget_bytes: usize,
}

impl<K> EvictionPlan<K> {
    pub fn within_budget(&self) -> bool {
        self.used_after <= self.budget_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.victims.is_empty()
    }
}
