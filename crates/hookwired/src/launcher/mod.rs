//! Starting plugin processes.
//!
//! A launcher turns a bundle into a running process plus the two byte
//! channels the bridge runs over. The supervisor owns what it returns.

mod command;
#[cfg(any(test, feature = "test-support"))]
mod in_process;

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use hookwire_plugins::BundleInfo;
use thiserror::Error;

pub use command::CommandLauncher;
#[cfg(any(test, feature = "test-support"))]
pub use in_process::{InProcessLauncher, PluginFactory};

pub(crate) const PLUGIN_OUTPUT_TARGET: &str = "hookwired::plugin_output";

/// Errors raised while starting a plugin.
#[derive(Debug, Clone, Error)]
pub enum LaunchError {
    /// The manifest names no executable for this platform.
    #[error("plugin '{plugin_id}' has no server executable for {platform}")]
    NoExecutable {
        /// Plugin being launched.
        plugin_id: String,
        /// Platform key that was looked up.
        platform: String,
    },
    /// The executable could not be started.
    #[error("failed to spawn '{}' for plugin '{plugin_id}': {source}", path.display())]
    Spawn {
        /// Plugin being launched.
        plugin_id: String,
        /// Executable path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// A standard stream was not captured.
    #[error("plugin '{plugin_id}' did not expose its {pipe} pipe")]
    MissingPipe {
        /// Plugin being launched.
        plugin_id: String,
        /// Name of the missing pipe.
        pipe: &'static str,
    },
    /// The connection to the plugin could not be set up.
    #[error("failed to connect to plugin '{plugin_id}': {source}")]
    Connection {
        /// Plugin being launched.
        plugin_id: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

/// Control over a launched plugin process.
pub trait PluginProcess: Send {
    /// Returns true once the process has exited.
    fn has_exited(&mut self) -> bool;

    /// Terminates the process. Errors are ignored.
    fn kill(&mut self);

    /// Reaps the process after it has exited or been killed.
    fn wait(&mut self);
}

/// A started plugin and its connection.
pub struct LaunchedPlugin {
    /// Bytes from the plugin.
    pub reader: Box<dyn Read + Send>,
    /// Bytes to the plugin.
    pub writer: Box<dyn Write + Send>,
    /// The running process.
    pub process: Box<dyn PluginProcess>,
}

impl std::fmt::Debug for LaunchedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedPlugin").finish_non_exhaustive()
    }
}

/// Starts plugin processes for bundles.
pub trait PluginLauncher: Send + Sync {
    /// Starts the server component of `bundle`.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when the process cannot be started.
    fn launch(&self, bundle: &BundleInfo) -> Result<LaunchedPlugin, LaunchError>;
}
