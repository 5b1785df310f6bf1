//! Memory budget enforcement for full-resolution images.

use std::time::Duration;

use serde::Serialize;
use thumbview_cache::{MemoryBudget, ResidentImage};
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::codec::DisplayUploader;
use crate::image::ImageId;

/// Automatic cycling faster than this skips eviction, so images are not
/// unloaded and decoded again on every step.
pub const RAPID_CYCLE_THRESHOLD: Duration = Duration::from_millis(500);

/// Tracks whether images are being cycled automatically, and how fast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleGuard {
    interval: Option<Duration>,
}

impl CycleGuard {
    /// `None` stops cycling.
    pub fn set_interval(&mut self, interval: Option<Duration>) {
        self.interval = interval;
    }

    pub fn is_cycling(&self) -> bool {
        self.interval.is_some()
    }

    pub fn suppresses_eviction(&self) -> bool {
        self.interval.is_some_and(|i| i < RAPID_CYCLE_THRESHOLD)
    }
}

/// Outcome of one enforcement pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub evicted: Vec<ImageId>,
    pub used_before: usize,
    pub used_after: usize,
    pub within_budget: bool,
    /// Enforcement skipped because of rapid cycling
    pub suppressed: bool,
}

#[derive(Debug, Clone)]
pub struct MemoryBudgetManager {
    budget: MemoryBudget,
    cycle: CycleGuard,
}

impl MemoryBudgetManager {
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            budget,
            cycle: CycleGuard::default(),
        }
    }

    pub fn budget(&self) -> MemoryBudget {
        self.budget
    }

    pub fn cycle_guard(&self) -> &CycleGuard {
        &self.cycle
    }

    pub fn set_cycle_interval(&mut self, interval: Option<Duration>) {
        self.cycle.set_interval(interval);
    }

    /// Unload the oldest-loaded images until usage fits the budget.
    ///
    /// The current image and images with unsaved edits are never unloaded,
    /// so usage may remain over budget when only those are left.
    pub fn enforce(&self, catalog: &mut Catalog, uploader: &dyn DisplayUploader) -> EvictionReport {
        let used = catalog.resident_bytes();
        if self.cycle.suppresses_eviction() {
            debug!(used, "eviction suppressed while cycling");
            return EvictionReport {
                used_before: used,
                used_after: used,
                within_budget: !self.budget.is_over(used),
                suppressed: true,
                ..EvictionReport::default()
            };
        }

        let current = catalog.current();
        let resident: Vec<ResidentImage<ImageId>> = catalog
            .iter()
            .filter_map(|image| {
                let loaded_at = image.loaded_at()?;
                Some(ResidentImage {
                    key: image.id(),
                    bytes: image.memory_bytes(),
                    loaded_at,
                    evictable: Some(image.id()) != current && !image.is_modified(),
                })
            })
            .collect();

        let plan = self.budget.plan(resident);
        for &id in &plan.victims {
            catalog.unload(id, uploader, false);
        }

        if !plan.is_empty() {
            info!(
                evicted = plan.victims.len(),
                used_before = plan.used_before,
                used_after = plan.used_after,
                budget = self.budget.budget_bytes(),
                "evicted images over memory budget"
            );
        }

        EvictionReport {
            within_budget: plan.within_budget(),
            used_before: plan.used_before,
            used_after: plan.used_after,
            evicted: plan.victims,
            suppressed: false,
        }
    }
}
