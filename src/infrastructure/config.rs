//! CLI and file configuration for the demo binary.

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use tracing::warn;

use crate::application::engine::EngineConfig;
use crate::infrastructure::cache::default_cache_dir;

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Converts to tracing level.
    #[must_use]
    pub const fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Engine settings readable from a TOML config file. CLI flags win over
/// file values, file values win over defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    /// Log verbosity level.
    pub log_level: Option<LogLevel>,
    /// Cache directory for the persistent tier.
    pub cache_dir: Option<PathBuf>,
    /// Memory budget in mebibytes.
    pub memory_budget_mb: Option<u64>,
    /// Disk budget in mebibytes.
    pub disk_budget_mb: Option<u64>,
    /// Maximum concurrent fetches.
    pub max_concurrent: Option<usize>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Network retries per fetch.
    pub fetch_retries: Option<u32>,
}

impl FileConfig {
    /// Loads the file, returning defaults on any failure (logged).
    #[must_use]
    pub fn load(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
                Self::default()
            }),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read config file");
                Self::default()
            }
        }
    }
}

/// Command-line arguments for the demo binary.
#[derive(Debug, Parser)]
#[command(name = "webimage", version, about = "Fetch remote images through the caching engine")]
pub struct AppConfig {
    /// URLs to load.
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Configuration file path.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Log file path (logs to stderr when absent).
    #[arg(long)]
    pub log_path: Option<PathBuf>,

    /// Cache directory for the persistent tier.
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Disable the persistent tier entirely.
    #[arg(long)]
    pub no_disk_cache: bool,

    /// Memory budget in mebibytes.
    #[arg(long)]
    pub memory_budget_mb: Option<u64>,

    /// Disk budget in mebibytes.
    #[arg(long)]
    pub disk_budget_mb: Option<u64>,

    /// Maximum concurrent fetches.
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Request timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Network retries per fetch.
    #[arg(long)]
    pub fetch_retries: Option<u32>,

    /// Refetch even when cached.
    #[arg(long)]
    pub force_refresh: bool,
}

impl AppConfig {
    /// Effective log level after merging the config file.
    #[must_use]
    pub fn effective_log_level(&self, file: &FileConfig) -> LogLevel {
        self.log_level.or(file.log_level).unwrap_or_default()
    }

    /// Builds the engine configuration from CLI flags, file values, and
    /// defaults, in that order of precedence.
    #[must_use]
    pub fn engine_config(&self, file: &FileConfig) -> EngineConfig {
        let mut config = EngineConfig::default();

        if let Some(mb) = self.memory_budget_mb.or(file.memory_budget_mb) {
            config.memory_budget_bytes = mb * 1024 * 1024;
        }
        if let Some(mb) = self.disk_budget_mb.or(file.disk_budget_mb) {
            config.disk_budget_bytes = mb * 1024 * 1024;
        }
        if let Some(n) = self.max_concurrent.or(file.max_concurrent) {
            config.max_concurrent_fetches = n;
        }
        if let Some(secs) = self.timeout_secs.or(file.timeout_secs) {
            config.timeout_secs = secs;
        }
        if let Some(retries) = self.fetch_retries.or(file.fetch_retries) {
            config.fetch_retries = retries;
        }

        config.disk_cache_dir = if self.no_disk_cache {
            None
        } else {
            Some(
                self.cache_dir
                    .clone()
                    .or_else(|| file.cache_dir.clone())
                    .unwrap_or_else(default_cache_dir),
            )
        };

        config
    }
}
