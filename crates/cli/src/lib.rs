use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thumbview_cache::DiskThumbnailCache;
use thumbview_core::{Collaborators, ThumbnailState, ViewerConfig, ViewerContext};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "thumbview")]
#[command(about = "Thumbview thumbnail cache tools")]
pub struct Cli {
    /// Configuration file (TOML).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generate thumbnails for every image in a directory.
    Thumbs {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        /// Rows treated as on screen, from the top of the listing.
        #[arg(long, default_value_t = 0)]
        visible: usize,
        /// Give up after this many seconds.
        #[arg(long, default_value_t = 120)]
        timeout: u64,
    },
    /// Trim the thumbnail cache to its configured quota.
    Sweep,
    /// Delete every cached thumbnail.
    ClearCache,
    /// Print the effective configuration as TOML.
    Config,
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct ThumbsOutput {
    total: usize,
    ready: usize,
    failed: usize,
    generated: u64,
    from_cache: u64,
}

#[derive(Debug, Serialize)]
struct ClearOutput {
    removed: usize,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Thumbs { dir, visible, timeout } => {
            run_thumbs(config, &dir, visible, Duration::from_secs(timeout))
        }
        Commands::Sweep => run_sweep(&config),
        Commands::ClearCache => run_clear_cache(&config),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable. `RUST_LOG` overrides
/// the default `warn` level.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<ViewerConfig> {
    let mut config = match path {
        Some(path) => ViewerConfig::from_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => ViewerConfig::default(),
    };
    config.apply_env().context("invalid environment override")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn run_thumbs(config: ViewerConfig, dir: &Path, visible: usize, timeout: Duration) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("directory does not exist: {}", dir.display());
    }

    let mut viewer =
        ViewerContext::open(config, Collaborators::headless()).context("failed to start viewer")?;
    viewer
        .open_directory(dir)
        .with_context(|| format!("failed to scan {}", dir.display()))?;

    let deadline = Instant::now() + timeout;
    let (ready, failed) = loop {
        let report = viewer.display_pass(|index, _| index < visible);
        let failed = viewer
            .catalog()
            .iter()
            .filter(|image| image.thumbnail_state() == ThumbnailState::Failed)
            .count();
        if report.ready + failed == report.total {
            break (report.ready, failed);
        }
        if Instant::now() >= deadline {
            anyhow::bail!("timed out with {} of {} thumbnails ready", report.ready, report.total);
        }
        viewer.wait_for_thumbnails(Duration::from_millis(20));
    };

    let stats = viewer.pipeline_stats();
    let payload = ThumbsOutput {
        total: viewer.catalog().len(),
        ready,
        failed,
        generated: stats.generated,
        from_cache: stats.from_cache,
    };
    viewer.shutdown().context("shutdown failed")?;

    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_sweep(config: &ViewerConfig) -> Result<()> {
    let report = config
        .cache
        .quota_sweep()
        .run(&config.cache.cache_dir)
        .context("cache sweep failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_clear_cache(config: &ViewerConfig) -> Result<()> {
    let removed = if config.cache.cache_dir.is_dir() {
        DiskThumbnailCache::new(&config.cache.cache_dir)?
            .clear()
            .context("failed to clear cache")?
    } else {
        0
    };
    println!("{}", serde_json::to_string_pretty(&ClearOutput { removed })?);
    Ok(())
}
