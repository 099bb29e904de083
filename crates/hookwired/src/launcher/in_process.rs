//! Runs plugins on threads inside the host, for tests.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use hookwire_bridge::HandshakeConfig;
use hookwire_plugins::sdk::{self, HostHandle};
use hookwire_plugins::{BundleInfo, PluginHooks};
use tracing::warn;

use super::{LaunchError, LaunchedPlugin, PLUGIN_OUTPUT_TARGET, PluginLauncher, PluginProcess};

/// Builds a plugin's hooks from its host handle.
pub type PluginFactory = Arc<dyn Fn(HostHandle) -> Arc<dyn PluginHooks> + Send + Sync>;

/// [`PluginLauncher`] that serves registered plugins over in-memory pipes.
#[derive(Default)]
pub struct InProcessLauncher {
    factories: Mutex<HashMap<String, PluginFactory>>,
    launches: AtomicUsize,
    exited: Arc<AtomicBool>,
    handshake: HandshakeConfig,
}

impl InProcessLauncher {
    /// Creates a launcher with no registered plugins.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a custom handshake for every launched plugin.
    #[must_use]
    pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }

    /// Registers the factory used for `plugin_id`.
    pub fn register(&self, plugin_id: impl Into<String>, factory: PluginFactory) {
        self.factories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(plugin_id.into(), factory);
    }

    /// Number of successful launches so far.
    #[must_use]
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::Acquire)
    }

    /// Makes every launched plugin report that its process has exited.
    pub fn simulate_exit(&self) {
        self.exited.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for InProcessLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessLauncher")
            .field("launches", &self.launches())
            .finish_non_exhaustive()
    }
}

impl PluginLauncher for InProcessLauncher {
    fn launch(&self, bundle: &BundleInfo) -> Result<LaunchedPlugin, LaunchError> {
        let plugin_id = bundle.id().to_owned();
        let factory = self
            .factories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&plugin_id)
            .cloned()
            .ok_or_else(|| LaunchError::NoExecutable {
                plugin_id: plugin_id.clone(),
                platform: "in-process".to_owned(),
            })?;
        let connection_error = |source: io::Error| LaunchError::Connection {
            plugin_id: plugin_id.clone(),
            source: Arc::new(source),
        };
        let (host_reader, plugin_writer) = io::pipe().map_err(connection_error)?;
        let (plugin_reader, host_writer) = io::pipe().map_err(connection_error)?;

        let handshake = self.handshake.clone();
        let thread_id = plugin_id.clone();
        let handle = thread::Builder::new()
            .name(format!("hookwire-plugin-{plugin_id}"))
            .spawn(move || {
                let served = sdk::serve_connection(plugin_reader, plugin_writer, &handshake, |host| {
                    factory(host)
                });
                if let Err(error) = served {
                    warn!(target: PLUGIN_OUTPUT_TARGET, plugin_id = %thread_id, %error, "in-process plugin failed");
                }
            })
            .map_err(connection_error)?;
        self.launches.fetch_add(1, Ordering::AcqRel);

        Ok(LaunchedPlugin {
            reader: Box::new(host_reader),
            writer: Box::new(host_writer),
            process: Box::new(InProcessPlugin {
                handle: Some(handle),
                exited: Arc::clone(&self.exited),
            }),
        })
    }
}

struct InProcessPlugin {
    handle: Option<JoinHandle<()>>,
    exited: Arc<AtomicBool>,
}

impl PluginProcess for InProcessPlugin {
    fn has_exited(&mut self) -> bool {
        self.exited.load(Ordering::Acquire)
            || self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    // Threads cannot be killed; closing the connection ends the serve loop.
    fn kill(&mut self) {}

    fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            drop(handle.join());
        }
    }
}
