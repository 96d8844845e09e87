//! Configuration loading and typed config structures for Tempora.
//!
//! The canonical configuration lives in `tempora.yaml` at the project root.
//! Every section is optional; missing fields fall back to the defaults
//! below. `DATABASE_URL` overrides `database.url` when set.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tempora_schema::TrackingMode;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Per-registration tracking options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TemporalOptions {
    /// Await history writes inside the triggering hook phase.
    #[serde(default = "default_blocking")]
    pub blocking: bool,

    /// Record every lifecycle transition instead of pre-mutation state only.
    #[serde(default)]
    pub full: bool,
}

impl Default for TemporalOptions {
    fn default() -> Self {
        Self {
            blocking: default_blocking(),
            full: false,
        }
    }
}

impl TemporalOptions {
    /// Blocking diff tracking.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether history writes are awaited.
    #[must_use]
    pub const fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Set full (`true`) or diff (`false`) tracking.
    #[must_use]
    pub const fn with_full(mut self, full: bool) -> Self {
        self.full = full;
        self
    }

    /// The tracking mode selected by `full`.
    pub const fn mode(&self) -> TrackingMode {
        TrackingMode::from_full(self.full)
    }
}

/// Database connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection string.
    #[serde(default)]
    pub url: Option<String>,

    /// Maximum pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Override the connection string with `DATABASE_URL` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DATABASE_URL") {
            self.url = Some(val);
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TemporaConfig {
    /// Tracking options applied to every registered model.
    #[serde(default)]
    pub temporal: TemporalOptions,

    /// Database connection.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// YAML model definition files to track.
    #[serde(default)]
    pub models: Vec<PathBuf>,

    /// Execute generated DDL against the database.
    #[serde(default)]
    pub apply: bool,
}

impl TemporaConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.database.apply_env_overrides();
        Ok(config)
    }
}

const fn default_blocking() -> bool {
    true
}

const fn default_max_connections() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_owned()
}
