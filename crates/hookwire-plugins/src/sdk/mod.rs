//! Entry point for plugin executables.
//!
//! A plugin binary builds its [`PluginHooks`] implementation and hands it to
//! [`serve`], which speaks the bridge protocol on stdio until the host asks
//! it to quit or goes away:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hookwire_plugins::hooks::{HookError, HookSet, PluginHooks};
//! use hookwire_plugins::sdk::{self, HostHandle};
//!
//! struct Noop;
//!
//! impl PluginHooks for Noop {
//!     fn implemented(&self) -> Result<HookSet, HookError> {
//!         Ok(HookSet::empty())
//!     }
//! }
//!
//! fn main() -> Result<(), sdk::SdkError> {
//!     sdk::serve(|_host: HostHandle| Arc::new(Noop) as Arc<dyn PluginHooks>)
//! }
//! ```

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use hookwire_bridge::{
    BridgeError, FrameReader, FrameWriter, HandshakeConfig, Multiplexer, Side, StreamId,
};
use thiserror::Error;
use tracing::debug;

use crate::api::{Driver, HostApi};
use crate::hooks::PluginHooks;
use crate::rpc::{ControlServer, HooksServer};

const SDK_TARGET: &str = "hookwire_plugins::sdk";

/// Deadline applied to calls the plugin makes back into the host.
pub const HOST_CALL_DEADLINE: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const QUIT_LINGER: Duration = Duration::from_millis(50);

/// Errors that stop a plugin process from serving.
#[derive(Debug, Error)]
pub enum SdkError {
    /// The process was not started by a host.
    #[error("this binary is a plugin and must be launched by the host ({key} is not set)")]
    NotLaunchedByHost {
        /// Environment variable expected to carry the cookie.
        key: String,
    },
    /// The bridge failed while starting.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

struct HostServices {
    api: Arc<dyn HostApi>,
    driver: Arc<dyn Driver>,
}

/// Late-bound access to the host's services.
///
/// The handle is given to the plugin factory before activation. Its services
/// become available once the host activates the plugin; before that the
/// accessors return `None`.
#[derive(Clone, Default)]
pub struct HostHandle {
    services: Arc<OnceLock<HostServices>>,
}

impl HostHandle {
    /// Returns the host API once connected.
    #[must_use]
    pub fn api(&self) -> Option<Arc<dyn HostApi>> {
        self.services.get().map(|services| Arc::clone(&services.api))
    }

    /// Returns the data-access driver once connected.
    #[must_use]
    pub fn driver(&self) -> Option<Arc<dyn Driver>> {
        self.services
            .get()
            .map(|services| Arc::clone(&services.driver))
    }

    /// Returns true once the host services are connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.services.get().is_some()
    }

    /// Connects the services. Returns false if already connected.
    pub(crate) fn connect(&self, api: Arc<dyn HostApi>, driver: Arc<dyn Driver>) -> bool {
        self.services.set(HostServices { api, driver }).is_ok()
    }
}

impl std::fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHandle")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Serves the plugin on stdio.
///
/// # Errors
///
/// Returns [`SdkError::NotLaunchedByHost`] when the cookie is missing from
/// the environment, or a bridge error when the connection cannot start.
pub fn serve<F>(factory: F) -> Result<(), SdkError>
where
    F: FnOnce(HostHandle) -> Arc<dyn PluginHooks>,
{
    let config = HandshakeConfig::default();
    if !config.launched_by_host() {
        return Err(SdkError::NotLaunchedByHost {
            key: config.cookie_key().to_owned(),
        });
    }
    serve_connection(io::stdin(), io::stdout(), &config, factory)
}

/// Serves the plugin over an arbitrary byte channel.
///
/// Writes the handshake, serves the control and hooks streams and blocks
/// until the host sends quit or the connection ends.
///
/// # Errors
///
/// Returns a bridge error when the handshake cannot be written or the
/// streams cannot be served.
pub fn serve_connection<R, W, F>(
    reader: R,
    mut writer: W,
    config: &HandshakeConfig,
    factory: F,
) -> Result<(), SdkError>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
    F: FnOnce(HostHandle) -> Arc<dyn PluginHooks>,
{
    config.send(&mut FrameWriter::new(&mut writer))?;
    let mux = Multiplexer::start(FrameReader::new(reader), writer, Side::Plugin)?;

    let (quit_sender, quit) = mpsc::channel();
    mux.serve(StreamId::CONTROL, Arc::new(ControlServer::new(quit_sender)))?;

    let host = HostHandle::default();
    let hooks = factory(host.clone());
    let server = HooksServer::new(hooks, mux.clone(), host, Some(HOST_CALL_DEADLINE));
    mux.serve(StreamId::HOOKS, Arc::new(server))?;
    debug!(target: SDK_TARGET, "plugin serving");

    loop {
        match quit.recv_timeout(POLL_INTERVAL) {
            Ok(()) => {
                debug!(target: SDK_TARGET, "quit received");
                // Let the acknowledgement reach the host first.
                thread::sleep(QUIT_LINGER);
                break;
            }
            Err(RecvTimeoutError::Timeout) if !mux.is_closed() => {}
            Err(_) => {
                debug!(target: SDK_TARGET, "host connection closed");
                break;
            }
        }
    }
    mux.close();
    Ok(())
}
