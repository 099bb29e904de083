//! Lifecycle of one plugin process.
//!
//! A [`Supervisor`] launches the plugin, checks its handshake, learns which
//! hooks it implements, pings it on demand and tears it down. The live
//! connection sits behind a read-write lock: hook calls only take the read
//! side, and only shutdown takes the write side to remove the connection.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use hookwire_bridge::{
    BridgeError, FrameReader, Handshake, HandshakeConfig, Multiplexer, Side, StreamId,
    TransportError,
};
use hookwire_plugins::api::{Driver, HostApi};
use hookwire_plugins::rpc::{ControlClient, HooksClient};
use hookwire_plugins::{BundleInfo, HookError, HookSet, PluginHooks};
use serde::Serialize;
use strum::Display;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::launcher::{LaunchError, LaunchedPlugin, PluginLauncher, PluginProcess};

const SUPERVISOR_TARGET: &str = "hookwired::supervisor";

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Tunables for supervising a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Pings per health check before it counts as failed.
    pub ping_attempts: u32,
    /// Pause between failed pings.
    pub ping_retry_delay: Duration,
    /// Deadline for each ping.
    pub ping_deadline: Duration,
    /// Time allowed for the handshake, and for reporting implemented hooks
    /// when `hook_deadline` is `None`.
    pub handshake_timeout: Duration,
    /// Time allowed for the quit request and for the process to exit.
    pub shutdown_grace: Duration,
    /// Deadline applied to every hook call; `None` waits indefinitely.
    pub hook_deadline: Option<Duration>,
    /// Handshake the plugin must present.
    pub handshake: HandshakeConfig,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            ping_attempts: 3,
            ping_retry_delay: Duration::from_millis(100),
            ping_deadline: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(2),
            hook_deadline: Some(Duration::from_secs(30)),
            handshake: HandshakeConfig::default(),
        }
    }
}

/// Where a supervised plugin is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SupervisorState {
    /// Process launched, handshake pending.
    Created,
    /// Handshake done and capabilities known.
    Connected,
    /// The plugin's activate hook has run.
    Activated,
    /// The last health check passed.
    Healthy,
    /// The last health check or hook call failed at the transport level.
    Unhealthy,
    /// Shutdown in progress.
    ShuttingDown,
    /// The process is gone.
    Terminated,
}

/// Errors raised by a supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The process could not be started.
    #[error(transparent)]
    Launch(#[from] LaunchError),
    /// The plugin's handshake was missing or wrong.
    #[error("plugin '{plugin_id}' failed the handshake: {source}")]
    Handshake {
        /// Plugin being started.
        plugin_id: String,
        /// Underlying bridge error.
        #[source]
        source: BridgeError,
    },
    /// The bridge could not be set up.
    #[error("failed to connect to plugin '{plugin_id}': {source}")]
    Connection {
        /// Plugin being started.
        plugin_id: String,
        /// Underlying bridge error.
        #[source]
        source: BridgeError,
    },
    /// The plugin did not report its implemented hooks.
    #[error("plugin '{plugin_id}' did not report its hooks: {source}")]
    Capabilities {
        /// Plugin being started.
        plugin_id: String,
        /// Underlying hook error.
        #[source]
        source: HookError,
    },
    /// The plugin's activate hook failed.
    #[error("plugin '{plugin_id}' failed to activate: {source}")]
    Activation {
        /// Plugin being activated.
        plugin_id: String,
        /// Underlying hook error.
        #[source]
        source: HookError,
    },
    /// The supervisor has already shut down.
    #[error("plugin '{plugin_id}' is not connected")]
    NotConnected {
        /// Plugin that was addressed.
        plugin_id: String,
    },
    /// The plugin process is no longer running.
    #[error("plugin '{plugin_id}' process has exited")]
    ProcessExited {
        /// Plugin that was checked.
        plugin_id: String,
    },
    /// Every ping of a health check failed.
    #[error("plugin '{plugin_id}' failed {attempts} health-check pings: {source}")]
    HealthCheck {
        /// Plugin that was checked.
        plugin_id: String,
        /// Pings attempted.
        attempts: u32,
        /// Error from the last ping.
        #[source]
        source: BridgeError,
    },
}

struct Connection {
    mux: Multiplexer,
    hooks: Arc<HooksClient>,
    control: ControlClient,
}

/// Owns one plugin process and its bridge connection.
pub struct Supervisor {
    plugin_id: String,
    settings: SupervisorSettings,
    implemented: HookSet,
    healthy: Arc<AtomicBool>,
    state: Mutex<SupervisorState>,
    connection: RwLock<Option<Connection>>,
    process: Mutex<Box<dyn PluginProcess>>,
    shut_down: AtomicBool,
}

impl Supervisor {
    /// Launches the plugin in `bundle` and connects to it.
    ///
    /// On success the plugin is connected and its capability set is known,
    /// but its activate hook has not run yet.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError`] when the process cannot be launched, the
    /// handshake fails or the plugin does not report its hooks. The process
    /// is terminated before the error is returned.
    pub fn start(
        bundle: &BundleInfo,
        launcher: &dyn PluginLauncher,
        api: Arc<dyn HostApi>,
        driver: Arc<dyn Driver>,
        settings: SupervisorSettings,
    ) -> Result<Self, SupervisorError> {
        let plugin_id = bundle.id().to_owned();
        let LaunchedPlugin {
            reader,
            writer,
            mut process,
        } = launcher.launch(bundle)?;
        debug!(target: SUPERVISOR_TARGET, plugin_id, "plugin launched");

        let frames = match receive_handshake(&plugin_id, reader, &settings) {
            Ok(frames) => frames,
            Err(error) => {
                drop(writer);
                terminate(process.as_mut());
                return Err(error);
            }
        };

        let mux = match Multiplexer::start(frames, writer, Side::Host) {
            Ok(mux) => mux,
            Err(source) => {
                terminate(process.as_mut());
                return Err(SupervisorError::Connection { plugin_id, source });
            }
        };

        let healthy = Arc::new(AtomicBool::new(true));
        let connected = connect(&plugin_id, &mux, api, driver, &settings, &healthy);
        let (hooks, control, implemented) = match connected {
            Ok(parts) => parts,
            Err(error) => {
                mux.close();
                terminate(process.as_mut());
                return Err(error);
            }
        };
        info!(
            target: SUPERVISOR_TARGET,
            plugin_id,
            hooks = implemented.len(),
            "plugin connected"
        );

        Ok(Self {
            plugin_id,
            settings,
            implemented,
            healthy,
            state: Mutex::new(SupervisorState::Connected),
            connection: RwLock::new(Some(Connection {
                mux,
                hooks: Arc::new(hooks),
                control,
            })),
            process: Mutex::new(process),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Runs the plugin's activate hook, which also hands it the host's
    /// API and driver streams.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Activation`] when the hook fails.
    pub fn activate(&self) -> Result<(), SupervisorError> {
        let hooks = self.hooks().ok_or_else(|| SupervisorError::NotConnected {
            plugin_id: self.plugin_id.clone(),
        })?;
        match hooks.on_activate() {
            Ok(()) => {}
            Err(error) if error.is_not_implemented() => {}
            Err(source) => {
                return Err(SupervisorError::Activation {
                    plugin_id: self.plugin_id.clone(),
                    source,
                });
            }
        }
        self.set_state(SupervisorState::Activated);
        Ok(())
    }

    /// Id of the supervised plugin.
    #[must_use]
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Hooks the plugin reported when it connected.
    #[must_use]
    pub const fn implemented(&self) -> HookSet {
        self.implemented
    }

    /// The RPC-backed hooks, or `None` after shutdown.
    #[must_use]
    pub fn hooks(&self) -> Option<Arc<dyn PluginHooks>> {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|connection| Arc::clone(&connection.hooks) as Arc<dyn PluginHooks>)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SupervisorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns false once a health check or a hook call has failed at the
    /// transport level.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire) && !self.shut_down.load(Ordering::Acquire)
    }

    /// Checks the process is alive and answers pings.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::ProcessExited`] when the process is gone
    /// and [`SupervisorError::HealthCheck`] when every ping failed.
    pub fn perform_health_check(&self) -> Result<(), SupervisorError> {
        if self.lock_process().has_exited() {
            self.mark_unhealthy();
            return Err(SupervisorError::ProcessExited {
                plugin_id: self.plugin_id.clone(),
            });
        }

        let result = {
            let guard = self.connection.read().unwrap_or_else(PoisonError::into_inner);
            let Some(connection) = guard.as_ref() else {
                return Err(SupervisorError::NotConnected {
                    plugin_id: self.plugin_id.clone(),
                });
            };
            retry_health_check(
                self.settings.ping_attempts,
                self.settings.ping_retry_delay,
                || connection.control.ping(self.settings.ping_deadline),
            )
        };

        match result {
            Ok(()) => {
                self.healthy.store(true, Ordering::Release);
                self.set_state(SupervisorState::Healthy);
                Ok(())
            }
            Err(source) => {
                self.mark_unhealthy();
                Err(SupervisorError::HealthCheck {
                    plugin_id: self.plugin_id.clone(),
                    attempts: self.settings.ping_attempts.max(1),
                    source,
                })
            }
        }
    }

    /// Stops the plugin.
    ///
    /// Asks the plugin to quit, waits up to the shutdown grace for the
    /// process to exit and kills it otherwise. Calling it again is a no-op.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_state(SupervisorState::ShuttingDown);
        let connection = self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut process = self.lock_process();

        let mux = connection.map(|Connection { mux, control, .. }| {
            if request_quit(&self.plugin_id, control, self.settings.shutdown_grace) {
                wait_for_exit(&mut **process, self.settings.shutdown_grace);
            }
            mux
        });
        if !process.has_exited() {
            warn!(
                target: SUPERVISOR_TARGET,
                plugin_id = %self.plugin_id,
                "plugin did not exit in time, killing process"
            );
            process.kill();
        }
        // Killing first unblocks a quit request stuck on a full pipe, which
        // would otherwise hold the writer that closing needs.
        if let Some(live) = mux {
            live.close();
        }
        process.wait();

        self.healthy.store(false, Ordering::Release);
        self.set_state(SupervisorState::Terminated);
        info!(target: SUPERVISOR_TARGET, plugin_id = %self.plugin_id, "plugin stopped");
    }

    fn lock_process(&self) -> MutexGuard<'_, Box<dyn PluginProcess>> {
        self.process.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SupervisorState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            debug!(
                target: SUPERVISOR_TARGET,
                plugin_id = %self.plugin_id,
                from = %*state,
                to = %next,
                "state changed"
            );
            *state = next;
        }
    }

    fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::Release);
        self.set_state(SupervisorState::Unhealthy);
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("plugin_id", &self.plugin_id)
            .field("state", &self.state())
            .field("implemented", &self.implemented)
            .finish_non_exhaustive()
    }
}

fn connect(
    plugin_id: &str,
    mux: &Multiplexer,
    api: Arc<dyn HostApi>,
    driver: Arc<dyn Driver>,
    settings: &SupervisorSettings,
    healthy: &Arc<AtomicBool>,
) -> Result<(HooksClient, ControlClient, HookSet), SupervisorError> {
    let connection_error = |source| SupervisorError::Connection {
        plugin_id: plugin_id.to_owned(),
        source,
    };
    let control = ControlClient::new(mux.dial(StreamId::CONTROL).map_err(connection_error)?);
    let hooks = HooksClient::connect(mux, api, driver, settings.hook_deadline)
        .map_err(connection_error)?
        .with_health_flag(Arc::clone(healthy));
    let implemented = hooks
        .implemented_within(settings.hook_deadline.or(Some(settings.handshake_timeout)))
        .map_err(|source| SupervisorError::Capabilities {
            plugin_id: plugin_id.to_owned(),
            source,
        })?;
    Ok((hooks, control, implemented))
}

type HandshakeRead = (FrameReader<Box<dyn Read + Send>>, Result<Handshake, BridgeError>);

/// Reads the handshake on a helper thread so a silent plugin cannot stall
/// start-up past the handshake timeout.
fn receive_handshake(
    plugin_id: &str,
    reader: Box<dyn Read + Send>,
    settings: &SupervisorSettings,
) -> Result<FrameReader<Box<dyn Read + Send>>, SupervisorError> {
    let handshake_error = |source| SupervisorError::Handshake {
        plugin_id: plugin_id.to_owned(),
        source,
    };
    let (done, received) = mpsc::channel::<HandshakeRead>();
    let expected = settings.handshake.clone();
    thread::Builder::new()
        .name(format!("hookwired-handshake-{plugin_id}"))
        .spawn(move || {
            let mut frames = FrameReader::new(reader);
            let outcome = expected.receive(&mut frames);
            drop(done.send((frames, outcome)));
        })
        .map_err(|error| SupervisorError::Connection {
            plugin_id: plugin_id.to_owned(),
            source: BridgeError::Transport(TransportError::Io(error)),
        })?;

    match received.recv_timeout(settings.handshake_timeout) {
        Ok((frames, Ok(_))) => Ok(frames),
        Ok((_, Err(source))) => Err(handshake_error(source)),
        Err(RecvTimeoutError::Timeout) => {
            warn!(
                target: SUPERVISOR_TARGET,
                plugin_id,
                timeout_ms = settings.handshake_timeout.as_millis(),
                "plugin sent no handshake"
            );
            Err(handshake_error(BridgeError::Handshake {
                reason: format!(
                    "no handshake within {} ms",
                    settings.handshake_timeout.as_millis()
                ),
            }))
        }
        Err(RecvTimeoutError::Disconnected) => Err(handshake_error(BridgeError::Handshake {
            reason: "handshake reader stopped".to_owned(),
        })),
    }
}

/// Sends `quit` from a helper thread and waits up to `grace` for the
/// acknowledgement. Returns false when the request could not complete in
/// time, so the caller should stop waiting for a clean exit.
fn request_quit(plugin_id: &str, control: ControlClient, grace: Duration) -> bool {
    let (done, acknowledged) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name(format!("hookwired-quit-{plugin_id}"))
        .spawn(move || drop(done.send(control.quit(grace))));
    if let Err(error) = spawned {
        warn!(target: SUPERVISOR_TARGET, plugin_id, %error, "failed to send quit request");
        return false;
    }
    match acknowledged.recv_timeout(grace) {
        Ok(Ok(())) => true,
        Ok(Err(error)) => {
            debug!(target: SUPERVISOR_TARGET, plugin_id, %error, "quit not acknowledged");
            true
        }
        Err(_) => {
            warn!(target: SUPERVISOR_TARGET, plugin_id, "quit request stalled");
            false
        }
    }
}

fn terminate(process: &mut dyn PluginProcess) {
    if !process.has_exited() {
        process.kill();
    }
    process.wait();
}

fn wait_for_exit(process: &mut dyn PluginProcess, grace: Duration) {
    let give_up = Instant::now() + grace;
    while !process.has_exited() && Instant::now() < give_up {
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

/// Runs `ping` up to `attempts` times, sleeping `delay` between failures.
///
/// Succeeds as soon as one ping succeeds; otherwise returns the last error.
/// At least one attempt is always made.
///
/// # Errors
///
/// Returns the error of the final attempt when every attempt failed.
pub fn retry_health_check<E, F>(attempts: u32, delay: Duration, mut ping: F) -> Result<(), E>
where
    E: std::fmt::Display,
    F: FnMut() -> Result<(), E>,
{
    let limit = attempts.max(1);
    let mut attempt = 1;
    loop {
        match ping() {
            Ok(()) => return Ok(()),
            Err(error) if attempt >= limit => return Err(error),
            Err(error) => {
                debug!(target: SUPERVISOR_TARGET, attempt, %error, "health-check ping failed");
                attempt += 1;
                thread::sleep(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests;
