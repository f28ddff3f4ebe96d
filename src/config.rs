//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `DAYBOOK_*` environment variable overrides.

use crate::engine::EngineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which key-value store backs the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    /// Nothing is persisted; for dry runs
    Memory,
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Sqlite
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default)]
    pub backend: Backend,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("daybook").to_string_lossy().to_string())
        .unwrap_or_else(|| "./daybook_data".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: Backend::default(),
        }
    }
}

impl StorageConfig {
    /// Data directory with a leading `~` expanded
    pub fn data_path(&self) -> PathBuf {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(&self.data_dir)),
            None => PathBuf::from(&self.data_dir),
        }
    }
}

/// Index maintenance configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IndexingConfig {
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    #[serde(default = "default_chunk_days")]
    pub backfill_chunk_days: u32,

    #[serde(default = "default_yield_every")]
    pub yield_every: usize,

    #[serde(default = "default_max_iterations")]
    pub max_backfill_iterations: usize,

    #[serde(default = "default_backfill_interval")]
    pub backfill_interval_secs: u64,

    #[serde(default = "default_bootstrap_on_open")]
    pub bootstrap_on_open: bool,
}

fn default_window_days() -> u32 {
    30
}

fn default_chunk_days() -> u32 {
    30
}

fn default_yield_every() -> usize {
    350
}

fn default_max_iterations() -> usize {
    2048
}

fn default_backfill_interval() -> u64 {
    3600 // 1 hour
}

fn default_bootstrap_on_open() -> bool {
    true
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            backfill_chunk_days: default_chunk_days(),
            yield_every: default_yield_every(),
            max_backfill_iterations: default_max_iterations(),
            backfill_interval_secs: default_backfill_interval(),
            bootstrap_on_open: default_bootstrap_on_open(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("daybook").join("config.toml")),
            Some(PathBuf::from("./daybook.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, var: F) {
        if let Some(data_dir) = var("DAYBOOK_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }

        if let Some(days) = var("DAYBOOK_WINDOW_DAYS").and_then(|v| v.parse().ok()) {
            self.indexing.window_days = days;
        }
        if let Some(days) = var("DAYBOOK_CHUNK_DAYS").and_then(|v| v.parse().ok()) {
            self.indexing.backfill_chunk_days = days;
        }

        if let Some(level) = var("DAYBOOK_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("DAYBOOK_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Engine settings derived from `[indexing]`
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            window_days: self.indexing.window_days,
            backfill_chunk_days: self.indexing.backfill_chunk_days,
            yield_every: self.indexing.yield_every,
            max_backfill_iterations: self.indexing.max_backfill_iterations,
            backfill_interval: Duration::from_secs(self.indexing.backfill_interval_secs),
            bootstrap_on_open: self.indexing.bootstrap_on_open,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Daybook Configuration
#
# Environment variables override these settings:
# - DAYBOOK_DATA_DIR
# - DAYBOOK_WINDOW_DAYS
# - DAYBOOK_CHUNK_DAYS
# - DAYBOOK_LOG_LEVEL
# - DAYBOOK_LOG_FORMAT

[storage]
# Directory holding daybook.db
data_dir = "~/.local/share/daybook"

# sqlite or memory
backend = "sqlite"

[indexing]
# Days (ending today) indexed when indexes are built from scratch
window_days = 30

# Days indexed per backfill step
backfill_chunk_days = 30

# Records scanned between cooperative yields
yield_every = 350

# Upper bound on backfill steps per run
max_backfill_iterations = 2048

# Background backfill period (seconds)
backfill_interval_secs = 3600

# Build missing indexes when the store is opened
bootstrap_on_open = true

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
