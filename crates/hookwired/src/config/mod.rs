//! Runtime configuration for the host daemon.
//!
//! Configuration is a single JSON document. Every field has a default, so an
//! empty object (or no file at all) yields a working configuration.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use semver::Version;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    #[default]
    Json,
    /// Human-readable single line output.
    Compact,
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration '{path}': {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
    /// The configuration file is not valid JSON for the schema.
    #[error("failed to parse configuration '{path}': {source}")]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: Arc<serde_json::Error>,
    },
    /// A value is out of range.
    #[error("invalid configuration: {message}")]
    Invalid {
        /// Description of the problem.
        message: String,
    },
}

/// Periodic health checking of plugin processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Runs the health-check job.
    pub enabled: bool,
    /// Seconds between sweeps.
    pub interval_secs: u64,
    /// Pings per check before a plugin counts as failed.
    pub ping_attempts: u32,
    /// Restarts plugins that fail a check.
    pub restart_on_failure: bool,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            ping_attempts: 3,
            restart_on_failure: false,
        }
    }
}

impl HealthCheckConfig {
    /// Interval between sweeps.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Bundle signature requirements.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    /// Refuses unsigned or unverifiable bundles.
    pub require: bool,
    /// Directory holding additional public keys.
    pub public_key_directory: Option<PathBuf>,
    /// Names of trusted key files inside the key directory.
    pub public_key_files: Vec<String>,
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory scanned for plugin bundles.
    pub plugin_directory: PathBuf,
    /// Directory receiving unpacked webapp assets.
    pub webapp_directory: PathBuf,
    /// Version of this host, checked against manifest minimums.
    pub host_version: String,
    /// Enables plugin support.
    pub enable: bool,
    /// Desired enabled flag per plugin id.
    pub plugin_states: HashMap<String, bool>,
    /// Worker threads used when syncing active state.
    pub activation_workers: usize,
    /// Per-call deadline for hook calls; zero disables it.
    pub hook_timeout_secs: u64,
    /// Grace period for each plugin during shutdown.
    pub shutdown_grace_secs: u64,
    /// Health-check job settings.
    pub health_check: HealthCheckConfig,
    /// Bundle signature settings.
    pub signature: SignatureConfig,
    /// Tracing filter expression.
    pub log_filter: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            plugin_directory: PathBuf::from("plugins"),
            webapp_directory: PathBuf::from("client/plugins"),
            host_version: env!("CARGO_PKG_VERSION").to_owned(),
            enable: true,
            plugin_states: HashMap::new(),
            activation_workers: 4,
            hook_timeout_secs: 30,
            shutdown_grace_secs: 10,
            health_check: HealthCheckConfig::default(),
            signature: SignatureConfig::default(),
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
            log_format: LogFormat::default(),
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from `path`, or defaults when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, parsed or
    /// validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(file) => Self::from_file(file)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source: Arc::new(source),
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Arc::new(source),
        })
    }

    /// Checks every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| ConfigError::Invalid {
            message: message.to_owned(),
        };
        if self.activation_workers == 0 {
            return Err(invalid("activation_workers must be at least 1"));
        }
        if self.health_check.ping_attempts == 0 {
            return Err(invalid("health_check.ping_attempts must be at least 1"));
        }
        if self.health_check.enabled && self.health_check.interval_secs == 0 {
            return Err(invalid("health_check.interval_secs must be positive"));
        }
        if self.log_filter.trim().is_empty() {
            return Err(invalid("log_filter must not be empty"));
        }
        self.parsed_host_version()?;
        Ok(())
    }

    /// Parses the configured host version.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when it is not a semantic version.
    pub fn parsed_host_version(&self) -> Result<Version, ConfigError> {
        Version::parse(&self.host_version).map_err(|error| ConfigError::Invalid {
            message: format!("host_version '{}': {error}", self.host_version),
        })
    }

    /// Deadline for hook calls, `None` when disabled.
    #[must_use]
    pub const fn hook_timeout(&self) -> Option<Duration> {
        if self.hook_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.hook_timeout_secs))
        }
    }

    /// Grace period for each plugin during shutdown.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Returns the tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Returns the log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

#[cfg(test)]
mod tests;
