//! Structured logging for the host daemon.
//!
//! Logs always go to stderr; a plugin's stdout is reserved for the bridge and
//! the daemon follows the same rule. The subscriber is installed once per
//! process and later calls report the settings already in force.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::debug;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::{Subscriber, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::{self, time::UtcTime};

use crate::config::{LogFormat, RuntimeConfig};

const TELEMETRY_TARGET: &str = "hookwired::telemetry";

static INSTALLED: OnceCell<TelemetryHandle> = OnceCell::new();

/// Settings of the installed subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryHandle {
    filter: String,
    format: LogFormat,
}

impl TelemetryHandle {
    /// Filter expression events are matched against.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Output format.
    #[must_use]
    pub const fn format(&self) -> LogFormat {
        self.format
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configured filter expression does not parse.
    #[error("invalid log filter '{filter}': {source}")]
    Filter {
        /// Expression as configured.
        filter: String,
        /// Parser error.
        #[source]
        source: ParseError,
    },
    /// Another global subscriber was installed first.
    #[error("failed to install the log subscriber: {source}")]
    Install {
        /// Error from `tracing`.
        #[source]
        source: SetGlobalDefaultError,
    },
}

/// Installs the global subscriber described by `config`.
///
/// Only the first call installs anything; later calls return the handle of
/// the subscriber already in force, even when `config` differs.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter is invalid or another
/// subscriber is already installed.
pub fn initialise(config: &RuntimeConfig) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED.get_or_try_init(|| install(config)).cloned()
}

fn install(config: &RuntimeConfig) -> Result<TelemetryHandle, TelemetryError> {
    let filter = parse_filter(config.log_filter())?;
    let format = config.log_format();
    let base = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_thread_names(true);

    let subscriber: Box<dyn Subscriber + Send + Sync> = match format {
        LogFormat::Json => Box::new(base.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(base.compact().finish()),
    };
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|source| TelemetryError::Install { source })?;

    debug!(target: TELEMETRY_TARGET, filter = config.log_filter(), %format, "log subscriber installed");
    Ok(TelemetryHandle {
        filter: config.log_filter().to_owned(),
        format,
    })
}

/// Parses a filter expression; an empty expression logs at `info`.
fn parse_filter(expression: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse(expression)
        .map_err(|source| TelemetryError::Filter {
            filter: expression.to_owned(),
            source,
        })
}
