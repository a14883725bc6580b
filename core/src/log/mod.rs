//! Diagnostics bootstrap for processes embedding the bitmap cache.
//!
//! [`init`] installs a `tracing` registry with an env-driven filter, a rolling file sink and a
//! stderr sink. Records emitted through the `log` facade are forwarded as well. The first
//! successful call wins; later calls return the installed guard and ignore their argument.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use anyhow::{Context, Result, anyhow};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter directives are read from the first of these that is set and non-blank.
const FILTER_ENV_VARS: [&str; 2] = ["BITMAP_CACHE_LOG", "RUST_LOG"];
const DEFAULT_PREFIX: &str = "bitmap-cache";
const DEFAULT_KEEP_FILES: usize = 7;

static INSTALLED: OnceLock<LogGuard> = OnceLock::new();

pub use tracing_subscriber::filter::LevelFilter as LogLevel;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum LogRolling {
    Hourly,
    #[default]
    Daily,
    /// Single append-only file.
    Never,
}

impl From<LogRolling> for Rotation {
    fn from(value: LogRolling) -> Self {
        match value {
            LogRolling::Hourly => Rotation::HOURLY,
            LogRolling::Daily => Rotation::DAILY,
            LogRolling::Never => Rotation::NEVER,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub dir: PathBuf,
    /// Rolled files are named `<prefix>.<date>.log`.
    pub prefix: String,
    /// Rolled files kept at startup; `None` keeps all of them.
    pub keep_files: Option<usize>,
    pub file_level: LevelFilter,
    pub stderr_level: LevelFilter,
    pub bridge_log_crate: bool,
    /// Directive such as `bitmap_cache_core=debug`. Overrides the environment when set.
    pub filter: Option<String>,
    pub rolling: LogRolling,
}

impl Default for LogConfig {
    fn default() -> Self {
        let stderr_level =
            if cfg!(debug_assertions) { LevelFilter::INFO } else { LevelFilter::WARN };
        Self {
            dir: default_log_dir(),
            prefix: DEFAULT_PREFIX.to_string(),
            keep_files: Some(DEFAULT_KEEP_FILES),
            file_level: LevelFilter::DEBUG,
            stderr_level,
            bridge_log_crate: true,
            filter: None,
            rolling: LogRolling::default(),
        }
    }
}

impl LogConfig {
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn named(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn filtered(mut self, directive: impl Into<String>) -> Self {
        self.filter = Some(directive.into());
        self
    }

    fn directive(&self) -> String {
        let from_env = || FILTER_ENV_VARS.iter().find_map(|var| std::env::var(var).ok());
        self.filter
            .clone()
            .or_else(from_env)
            .filter(|directive| !directive.trim().is_empty())
            .unwrap_or_else(|| if cfg!(debug_assertions) { "debug" } else { "info" }.into())
    }
}

/// Keeps the background file writer flushing until the process exits.
#[derive(Debug)]
pub struct LogGuard {
    _worker: WorkerGuard,
    dir: PathBuf,
    prefix: String,
}

impl LogGuard {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

pub fn init(config: LogConfig) -> Result<&'static LogGuard> {
    match INSTALLED.get() {
        Some(guard) => Ok(guard),
        None => {
            let guard = install(config)?;
            Ok(INSTALLED.get_or_init(|| guard))
        }
    }
}

fn install(config: LogConfig) -> Result<LogGuard> {
    if config.bridge_log_crate {
        let widest = config.file_level.max(config.stderr_level);
        // The host may already have bridged `log`; that bridge stays.
        let _ = tracing_log::LogTracer::builder().with_max_level(log_level(widest)).init();
    }

    fs::create_dir_all(&config.dir)
        .with_context(|| format!("creating log dir {}", config.dir.display()))?;
    if let Some(keep) = config.keep_files.filter(|keep| *keep > 0) {
        prune_rolled_files(&config.dir, &config.prefix, keep)?;
    }

    let appender = tracing_appender::rolling::Builder::new()
        .rotation(config.rolling.into())
        .filename_prefix(&config.prefix)
        .filename_suffix("log")
        .build(&config.dir)
        .context("building rolling appender")?;
    let (writer, worker) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_new(config.directive()).context("invalid log filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_thread_names(true)
                .with_writer(writer)
                .with_filter(config.file_level),
        )
        .with(fmt::layer().with_writer(std::io::stderr).with_filter(config.stderr_level))
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(LogGuard { _worker: worker, dir: config.dir, prefix: config.prefix })
}

fn log_level(level: LevelFilter) -> log::LevelFilter {
    match level.into_level() {
        None => log::LevelFilter::Off,
        Some(tracing::Level::ERROR) => log::LevelFilter::Error,
        Some(tracing::Level::WARN) => log::LevelFilter::Warn,
        Some(tracing::Level::INFO) => log::LevelFilter::Info,
        Some(tracing::Level::DEBUG) => log::LevelFilter::Debug,
        Some(_) => log::LevelFilter::Trace,
    }
}

/// Delete the oldest files named after `prefix` so that at most `keep` remain.
fn prune_rolled_files(dir: &Path, prefix: &str, keep: usize) -> Result<()> {
    let listing =
        fs::read_dir(dir).with_context(|| format!("listing log dir {}", dir.display()))?;
    let mut rolled: Vec<(SystemTime, PathBuf)> = listing
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .filter_map(|entry| {
            let meta = entry.metadata().ok().filter(|meta| meta.is_file())?;
            Some((meta.modified().unwrap_or(SystemTime::UNIX_EPOCH), entry.path()))
        })
        .collect();

    rolled.sort();
    let surplus = rolled.len().saturating_sub(keep);
    for (_, path) in rolled.drain(..surplus) {
        // A file still held open elsewhere is retried on the next start.
        let _ = fs::remove_file(path);
    }
    Ok(())
}

fn default_log_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "BitmapCache", "bitmap-cache")
        .map(|dirs| dirs.cache_dir().join("logs"))
        .unwrap_or_else(|| std::env::temp_dir().join("bitmap-cache-logs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn explicit_filter_overrides_environment() {
        let config = LogConfig::default().filtered("bitmap_cache_core=trace");
        assert_eq!(config.directive(), "bitmap_cache_core=trace");
    }

    #[test]
    fn level_bridge_matches_tracing_levels() {
        assert_eq!(log_level(LevelFilter::OFF), log::LevelFilter::Off);
        assert_eq!(log_level(LevelFilter::WARN), log::LevelFilter::Warn);
        assert_eq!(log_level(LevelFilter::TRACE), log::LevelFilter::Trace);
    }

    #[test]
    fn pruning_keeps_newest_rolled_files() -> Result<()> {
        let temp = tempfile::tempdir()?;
        for day in 1..=4 {
            fs::write(temp.path().join(format!("{DEFAULT_PREFIX}.2026-01-0{day}.log")), b"x")?;
            std::thread::sleep(Duration::from_millis(20));
        }
        fs::write(temp.path().join("notes.txt"), b"keep")?;

        prune_rolled_files(temp.path(), DEFAULT_PREFIX, 2)?;

        let mut left: Vec<String> = fs::read_dir(temp.path())?
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            [
                format!("{DEFAULT_PREFIX}.2026-01-03.log"),
                format!("{DEFAULT_PREFIX}.2026-01-04.log"),
                "notes.txt".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn second_init_returns_installed_guard() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let config = LogConfig::default().in_dir(temp.path().join("logs")).named("test-log");

        let first = init(config.clone())?;
        assert!(first.dir().exists());
        let second = init(config)?;
        assert!(std::ptr::eq(first, second));
        Ok(())
    }
}
