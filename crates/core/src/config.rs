//! Viewer configuration.
//!
//! Loaded from a TOML file, then overridden by `THUMBVIEW_*` environment
//! variables. Every key is optional.
//!
//! ```toml
//! memory_budget_mb = 1024
//! offscreen_concurrency = 3
//! sort_key = "modified_time"
//!
//! [cache]
//! cache_dir = "/path/to/thumbnails"
//! max_entries = 8192
//! ```

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thumbview_cache::{CacheConfig, MemoryBudget};
use thumbview_scheduler::{WorkerPoolConfig, DEFAULT_OFFSCREEN_CAP};

use crate::codec::DecodeOptions;
use crate::error::ConfigError;
use crate::sort::{SortKey, SortSpec};

pub const ENV_MEMORY_BUDGET_MB: &str = "THUMBVIEW_MEMORY_BUDGET_MB";
pub const ENV_OFFSCREEN_CONCURRENCY: &str = "THUMBVIEW_OFFSCREEN_CONCURRENCY";
pub const ENV_WORKER_THREADS: &str = "THUMBVIEW_WORKER_THREADS";
pub const ENV_STRICT_LOADING: &str = "THUMBVIEW_STRICT_LOADING";
pub const ENV_CACHE_DIR: &str = "THUMBVIEW_CACHE_DIR";
pub const ENV_MAX_CACHE_ENTRIES: &str = "THUMBVIEW_MAX_CACHE_ENTRIES";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Ceiling for full-resolution pixel memory
    pub memory_budget_mb: usize,
    /// Off-screen thumbnail jobs allowed in flight
    pub offscreen_concurrency: usize,
    pub worker_threads: usize,
    /// Only load files whose content matches their extension
    pub strict_loading: bool,
    /// Longest thumbnail edge in pixels
    pub thumbnail_size: u32,
    /// How long shutdown waits for running thumbnail jobs
    pub shutdown_timeout_ms: u64,
    pub sort_key: SortKey,
    pub sort_ascending: bool,
    pub cache: CacheConfig,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            memory_budget_mb: 1024,
            offscreen_concurrency: DEFAULT_OFFSCREEN_CAP,
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            strict_loading: false,
            thumbnail_size: 256,
            shutdown_timeout_ms: 5_000,
            sort_key: SortKey::Name,
            sort_ascending: true,
            cache: CacheConfig::default(),
        }
    }
}

impl ViewerConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Writes the configuration, creating parent directories as needed.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Applies `THUMBVIEW_*` environment overrides.
    ///
    /// # Errors
    /// Returns an error if a variable is set to an unparsable value.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(mb) = env_value(ENV_MEMORY_BUDGET_MB)? {
            self.memory_budget_mb = mb;
        }
        if let Some(k) = env_value(ENV_OFFSCREEN_CONCURRENCY)? {
            self.offscreen_concurrency = k;
        }
        if let Some(n) = env_value(ENV_WORKER_THREADS)? {
            self.worker_threads = n;
        }
        if let Some(strict) = env_value(ENV_STRICT_LOADING)? {
            self.strict_loading = strict;
        }
        if let Ok(dir) = std::env::var(ENV_CACHE_DIR) {
            self.cache.cache_dir = dir.into();
        }
        if let Some(max) = env_value(ENV_MAX_CACHE_ENTRIES)? {
            self.cache.max_entries = max;
        }
        Ok(())
    }

    /// Rejects settings the viewer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::invalid("worker_threads", "0"));
        }
        if self.thumbnail_size == 0 {
            return Err(ConfigError::invalid("thumbnail_size", "0"));
        }
        if self.memory_budget_mb == 0 {
            return Err(ConfigError::invalid("memory_budget_mb", "0"));
        }
        Ok(())
    }

    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            strict: self.strict_loading,
            thumbnail_size: self.thumbnail_size,
        }
    }

    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.worker_threads)
    }

    pub fn memory_budget(&self) -> MemoryBudget {
        MemoryBudget::with_limit_mb(self.memory_budget_mb)
    }

    pub fn sort_spec(&self) -> SortSpec {
        SortSpec::new(self.sort_key, self.sort_ascending)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn env_value<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::invalid(name, raw)),
        Err(_) => Ok(None),
    }
}
