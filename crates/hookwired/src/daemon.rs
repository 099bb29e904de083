//! Daemon lifecycle: configuration, environment start-up and shutdown.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{info, warn};

use crate::api::StoreServices;
use crate::config::{ConfigError, RuntimeConfig};
use crate::configuration::MemoryConfigurationStore;
use crate::environment::{Environment, EnvironmentError, EnvironmentSettings};
use crate::kv::MemoryKeyValueStore;
use crate::launcher::{CommandLauncher, PluginLauncher};
use crate::sync::sync_active_state;
use crate::telemetry::{self, TelemetryError};

const DAEMON_TARGET: &str = "hookwired::daemon";

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should proceed.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError`] when the listener cannot be installed.
    fn wait(&self) -> Result<(), ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Shutdown listener that waits for termination signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        if let Some(signal) = signals.forever().next() {
            info!(target: DAEMON_TARGET, signal, "shutdown signal received");
        }
        Ok(())
    }
}

/// Errors that stop the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration failed to load.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Telemetry could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// The plugin directory could not be prepared.
    #[error("failed to prepare plugin directory '{}': {source}", path.display())]
    PluginDirectory {
        /// Configured directory.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The environment failed to start.
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    /// Waiting for shutdown failed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

/// Runs the daemon with the production collaborators until a termination
/// signal arrives.
///
/// # Errors
///
/// Returns [`DaemonError`] when start-up fails.
pub fn run(config_path: Option<&Path>) -> Result<(), DaemonError> {
    let config = RuntimeConfig::load(config_path)?;
    let logging = telemetry::initialise(&config)?;
    info!(
        target: DAEMON_TARGET,
        filter = logging.filter(),
        format = %logging.format(),
        version = env!("CARGO_PKG_VERSION"),
        "hookwired starting"
    );
    let launcher: Arc<dyn PluginLauncher> = Arc::new(CommandLauncher::new());
    serve(&config, launcher, &SystemShutdownSignal)
}

/// Starts the environment, waits on `shutdown` and stops every plugin.
///
/// # Errors
///
/// Returns [`DaemonError`] when start-up fails. Plugins that fail to
/// activate are logged and do not stop the daemon.
pub fn serve<S: ShutdownSignal>(
    config: &RuntimeConfig,
    launcher: Arc<dyn PluginLauncher>,
    shutdown: &S,
) -> Result<(), DaemonError> {
    let settings = EnvironmentSettings::from_config(config)?;
    let services = StoreServices::new(
        Arc::new(MemoryKeyValueStore::new()),
        Arc::new(MemoryConfigurationStore::new()),
    );
    let environment = Arc::new(Environment::new(settings, launcher, Arc::new(services)));

    if config.enable {
        fs::create_dir_all(&config.plugin_directory).map_err(|source| {
            DaemonError::PluginDirectory {
                path: config.plugin_directory.clone(),
                source,
            }
        })?;
        let report =
            sync_active_state(&environment, &config.plugin_states, config.activation_workers)?;
        for (plugin_id, error) in &report.failed {
            warn!(target: DAEMON_TARGET, plugin_id, %error, "plugin failed to start");
        }
        environment.init_health_check_job(config.health_check.enabled)?;
    } else {
        info!(target: DAEMON_TARGET, "plugin support is disabled");
    }

    info!(
        target: DAEMON_TARGET,
        plugins = environment.active().len(),
        "daemon ready"
    );
    let waited = shutdown.wait();
    environment.shutdown();
    info!(target: DAEMON_TARGET, "shutdown sequence completed");
    waited.map_err(DaemonError::from)
}
