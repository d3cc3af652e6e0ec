//! Configuration loading and database path resolution
//!
//! Bootstrap configuration only: where the database lives, which port the
//! admin API listens on, worker pacing and the log level. Everything the
//! ranking engine decides at runtime (class limits, tier state) lives in the
//! database.
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. User config dir, then system config file
//! 4. Built-in defaults (no file at all)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "QUALRANK_CONFIG";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file; OS default when absent
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Admin HTTP API port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Worker pacing
    #[serde(default)]
    pub worker: WorkerSection,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            port: default_port(),
            worker: WorkerSection::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TomlConfig {
    /// Database path, falling back to the OS-dependent default location
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }
}

/// `[worker]` section
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    /// Seconds between mutation-log polls when no ping arrives
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum number of mutations handled in one pass (unbounded when absent)
    #[serde(default)]
    pub batch_limit: Option<usize>,

    /// Maximum wall-clock seconds one pass may run (unbounded when absent)
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            batch_limit: None,
            max_duration_secs: None,
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_port() -> u16 {
    5790
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolve which config file to read, if any.
///
/// Returns `None` when no file exists anywhere; callers then run on defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: user config dir, then system-wide file
    let user_config = dirs::config_dir().map(|d| d.join("qualrank").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/qualrank/config.toml");
    if cfg!(unix) && system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Load configuration from `path`, or built-in defaults when `path` is `None`.
///
/// A file that was explicitly named but cannot be read or parsed is an error;
/// running on defaults silently would point the worker at the wrong database.
pub fn load_config(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        warn!("No config file found, using built-in defaults");
        return Ok(TomlConfig::default());
    };

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;

    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Cannot parse {}: {}", path.display(), e)))?;

    if config.worker.poll_interval_secs == 0 {
        return Err(Error::Config(
            "worker.poll_interval_secs must be at least 1".to_string(),
        ));
    }

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// OS-dependent default database location
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("qualrank"))
        .unwrap_or_else(|| PathBuf::from("./qualrank_data"))
        .join("qualrank.db")
}
