//! Registry of installed plugins and their running supervisors.
//!
//! An [`Environment`] maps each plugin id to one registration: the bundle it
//! was activated from, its lifecycle state and, while it runs a server
//! component, its [`Supervisor`]. Activation and deactivation of one id are
//! serialised by a per-id lock; reads never wait on a plugin process.

mod webapp;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::Duration;

use hookwire_plugins::{BundleInfo, HookId, HookSet, Manifest, PluginError, PluginHooks, scan};
use semver::Version;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::HostServices;
use crate::config::{ConfigError, RuntimeConfig};
use crate::health::{HealthCheckJob, HealthReporter, StructuredHealthReporter};
use crate::launcher::PluginLauncher;
use crate::supervisor::{Supervisor, SupervisorError, SupervisorSettings};

pub use webapp::bundle_file_name;

const ENVIRONMENT_TARGET: &str = "hookwired::environment";

/// Settings that shape an [`Environment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSettings {
    /// Directory scanned for bundles.
    pub plugin_directory: PathBuf,
    /// Directory receiving unpacked webapp bundles.
    pub webapp_directory: PathBuf,
    /// Version of this host.
    pub host_version: Version,
    /// Settings for each plugin's supervisor.
    pub supervisor: SupervisorSettings,
    /// Time a plugin's deactivate hook may take before it is torn down.
    pub deactivate_grace: Duration,
    /// Interval of the health-check job.
    pub health_check_interval: Duration,
    /// Restarts plugins that fail a health check.
    pub restart_on_failure: bool,
}

impl EnvironmentSettings {
    /// Creates settings with default timings.
    #[must_use]
    pub fn new(
        plugin_directory: impl Into<PathBuf>,
        webapp_directory: impl Into<PathBuf>,
        host_version: Version,
    ) -> Self {
        Self {
            plugin_directory: plugin_directory.into(),
            webapp_directory: webapp_directory.into(),
            host_version,
            supervisor: SupervisorSettings::default(),
            deactivate_grace: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(30),
            restart_on_failure: false,
        }
    }

    /// Derives settings from the runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the host version does not parse.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, ConfigError> {
        let supervisor = SupervisorSettings {
            ping_attempts: config.health_check.ping_attempts,
            hook_deadline: config.hook_timeout(),
            ..SupervisorSettings::default()
        };
        Ok(Self {
            supervisor,
            deactivate_grace: config.shutdown_grace(),
            health_check_interval: config.health_check.interval(),
            restart_on_failure: config.health_check.restart_on_failure,
            ..Self::new(
                &config.plugin_directory,
                &config.webapp_directory,
                config.parsed_host_version()?,
            )
        })
    }
}

/// Lifecycle state of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PluginState {
    /// Not running.
    NotRunning,
    /// Activated and serving.
    Running,
    /// The last activation attempt failed.
    FailedToStart,
}

/// Summary of one registered plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginStatus {
    /// Plugin id.
    pub plugin_id: String,
    /// Bundle directory.
    pub path: PathBuf,
    /// Lifecycle state.
    pub state: PluginState,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Plugin version.
    pub version: String,
}

/// Outcome of [`Environment::activate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    /// Manifest of the plugin.
    pub manifest: Manifest,
    /// False when the plugin was already running.
    pub activated: bool,
}

/// A running plugin with a server component, as seen by dispatchers.
#[derive(Clone)]
pub struct ActivePlugin {
    /// Manifest the plugin was activated from.
    pub manifest: Manifest,
    /// RPC-backed hooks.
    pub hooks: Arc<dyn PluginHooks>,
    /// Hooks the plugin implements.
    pub implemented: HookSet,
    /// Position of the bundle in scan order.
    pub discovery_index: usize,
}

impl std::fmt::Debug for ActivePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivePlugin")
            .field("plugin_id", &self.manifest.id())
            .field("implemented", &self.implemented)
            .field("discovery_index", &self.discovery_index)
            .finish_non_exhaustive()
    }
}

/// Errors raised by the environment.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// No bundle declares the id.
    #[error("plugin '{plugin_id}' is not installed")]
    NotFound {
        /// Requested plugin.
        plugin_id: String,
    },
    /// The plugin is not running.
    #[error("plugin '{plugin_id}' is not running")]
    NotActive {
        /// Requested plugin.
        plugin_id: String,
    },
    /// More than one bundle declares the id.
    #[error("plugin id '{plugin_id}' is declared by {} bundles", paths.len())]
    DuplicateId {
        /// Contested id.
        plugin_id: String,
        /// Bundles declaring it.
        paths: Vec<PathBuf>,
    },
    /// The bundle or its manifest is unusable.
    #[error(transparent)]
    Bundle(#[from] PluginError),
    /// The manifest declares no component.
    #[error("plugin '{plugin_id}' has neither a server nor a webapp component")]
    NoComponents {
        /// Offending plugin.
        plugin_id: String,
    },
    /// The manifest declares no webapp component.
    #[error("plugin '{plugin_id}' has no webapp component")]
    MissingWebapp {
        /// Offending plugin.
        plugin_id: String,
    },
    /// The plugin process failed.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    /// The webapp bundle path escapes the bundle or is hidden.
    #[error("invalid webapp bundle path '{}' for plugin '{plugin_id}'", path.display())]
    InvalidBundlePath {
        /// Offending plugin.
        plugin_id: String,
        /// Declared path.
        path: PathBuf,
    },
    /// Webapp assets could not be copied.
    #[error("failed to unpack webapp for plugin '{plugin_id}' at '{}': {source}", path.display())]
    Webapp {
        /// Plugin being unpacked.
        plugin_id: String,
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The health-check thread could not be started.
    #[error("failed to start the health-check job: {source}")]
    HealthJob {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

struct Registration {
    bundle: BundleInfo,
    state: PluginState,
    supervisor: Option<Arc<Supervisor>>,
    discovery_index: usize,
}

/// Process-wide plugin registry.
pub struct Environment {
    settings: EnvironmentSettings,
    launcher: Arc<dyn PluginLauncher>,
    services: Arc<dyn HostServices>,
    reporter: Arc<dyn HealthReporter>,
    registry: RwLock<HashMap<String, Registration>>,
    activation_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    health_job: Mutex<Option<HealthCheckJob>>,
}

impl Environment {
    /// Creates an empty environment.
    #[must_use]
    pub fn new(
        settings: EnvironmentSettings,
        launcher: Arc<dyn PluginLauncher>,
        services: Arc<dyn HostServices>,
    ) -> Self {
        Self {
            settings,
            launcher,
            services,
            reporter: Arc::new(StructuredHealthReporter::new()),
            registry: RwLock::new(HashMap::new()),
            activation_locks: Mutex::new(HashMap::new()),
            health_job: Mutex::new(None),
        }
    }

    /// Replaces the health reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn HealthReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &EnvironmentSettings {
        &self.settings
    }

    /// Activates a plugin.
    ///
    /// Returns `activated == false` without doing anything when the plugin
    /// already runs. Otherwise the bundle is resolved, the host version is
    /// checked, the server component is started and activated, and webapp
    /// assets are unpacked. The plugin only counts as running once every
    /// step succeeded; a failure leaves it `FailedToStart` with no
    /// supervisor.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError`] describing the failed step.
    pub fn activate(&self, plugin_id: &str) -> Result<Activation, EnvironmentError> {
        let lock = self.activation_lock(plugin_id);
        let _serialised = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(registration) = self.read_registry().get(plugin_id)
            && registration.state == PluginState::Running
        {
            return Ok(Activation {
                manifest: registration.bundle.manifest().clone(),
                activated: false,
            });
        }

        let (bundle, discovery_index) = match self.resolve_bundle(plugin_id) {
            Ok(found) => found,
            Err(error) => {
                self.reporter.activation_failed(plugin_id, &error);
                return Err(error);
            }
        };

        match self.start(&bundle) {
            Ok(supervisor) => {
                let manifest = bundle.manifest().clone();
                self.write_registry().insert(
                    plugin_id.to_owned(),
                    Registration {
                        bundle,
                        state: PluginState::Running,
                        supervisor,
                        discovery_index,
                    },
                );
                self.reporter.plugin_activated(plugin_id);
                Ok(Activation {
                    manifest,
                    activated: true,
                })
            }
            Err(error) => {
                self.write_registry().insert(
                    plugin_id.to_owned(),
                    Registration {
                        bundle,
                        state: PluginState::FailedToStart,
                        supervisor: None,
                        discovery_index,
                    },
                );
                self.reporter.activation_failed(plugin_id, &error);
                Err(error)
            }
        }
    }

    /// Deactivates a running plugin.
    ///
    /// The plugin's deactivate hook gets up to the configured grace; its
    /// failure is logged and the process is torn down regardless. Returns
    /// whether the plugin was running.
    pub fn deactivate(&self, plugin_id: &str) -> bool {
        let lock = self.activation_lock(plugin_id);
        let _serialised = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let supervisor = {
            let mut registry = self.write_registry();
            let Some(registration) = registry.get_mut(plugin_id) else {
                return false;
            };
            if registration.state != PluginState::Running {
                return false;
            }
            registration.state = PluginState::NotRunning;
            registration.supervisor.take()
        };
        if let Some(running) = supervisor {
            self.stop(plugin_id, &running);
        }
        self.reporter.plugin_deactivated(plugin_id);
        true
    }

    /// Deactivates the plugin if needed and forgets its registration.
    pub fn remove_plugin(&self, plugin_id: &str) {
        self.deactivate(plugin_id);
        self.write_registry().remove(plugin_id);
        self.activation_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(plugin_id);
        debug!(target: ENVIRONMENT_TARGET, plugin_id, "plugin removed");
    }

    /// Deactivates and activates a plugin again.
    ///
    /// # Errors
    ///
    /// Returns the activation error.
    pub fn restart_plugin(&self, plugin_id: &str) -> Result<Activation, EnvironmentError> {
        self.deactivate(plugin_id);
        self.activate(plugin_id)
    }

    /// Stops the health-check job and deactivates every running plugin.
    ///
    /// Plugins are stopped concurrently, so the total time is bounded by
    /// the slowest plugin rather than the number of plugins.
    pub fn shutdown(&self) {
        if let Some(job) = self.lock_health_job().take() {
            job.cancel();
        }
        let running: Vec<String> = self
            .read_registry()
            .iter()
            .filter(|(_, registration)| registration.state == PluginState::Running)
            .map(|(id, _)| id.clone())
            .collect();
        info!(target: ENVIRONMENT_TARGET, plugins = running.len(), "shutting down plugins");

        thread::scope(|scope| {
            for plugin_id in &running {
                let spawned = thread::Builder::new()
                    .name(format!("hookwired-stop-{plugin_id}"))
                    .spawn_scoped(scope, || self.deactivate(plugin_id));
                if let Err(error) = spawned {
                    warn!(target: ENVIRONMENT_TARGET, plugin_id, %error, "stopping plugin inline");
                    self.deactivate(plugin_id);
                }
            }
        });
    }

    /// Returns true when the plugin is running.
    #[must_use]
    pub fn is_active(&self, plugin_id: &str) -> bool {
        self.get_plugin_state(plugin_id) == PluginState::Running
    }

    /// Lifecycle state of a plugin; unknown plugins are `NotRunning`.
    #[must_use]
    pub fn get_plugin_state(&self, plugin_id: &str) -> PluginState {
        self.read_registry()
            .get(plugin_id)
            .map_or(PluginState::NotRunning, |registration| registration.state)
    }

    /// Status of every registered plugin, ordered by id.
    #[must_use]
    pub fn statuses(&self) -> Vec<PluginStatus> {
        let mut statuses: Vec<PluginStatus> = self
            .read_registry()
            .iter()
            .map(|(plugin_id, registration)| {
                let manifest = registration.bundle.manifest();
                PluginStatus {
                    plugin_id: plugin_id.clone(),
                    path: registration.bundle.path().to_path_buf(),
                    state: registration.state,
                    name: manifest.name().to_owned(),
                    description: manifest.description().to_owned(),
                    version: manifest.version().to_owned(),
                }
            })
            .collect();
        statuses.sort_by(|left, right| left.plugin_id.cmp(&right.plugin_id));
        statuses
    }

    /// Bundles of running plugins, in discovery order.
    #[must_use]
    pub fn active(&self) -> Vec<BundleInfo> {
        let registry = self.read_registry();
        let mut running: Vec<&Registration> = registry
            .values()
            .filter(|registration| registration.state == PluginState::Running)
            .collect();
        running.sort_by_key(|registration| registration.discovery_index);
        running
            .into_iter()
            .map(|registration| registration.bundle.clone())
            .collect()
    }

    /// Bundles currently on disk.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::Bundle`] when the plugin directory
    /// cannot be listed.
    pub fn available(&self) -> Result<Vec<BundleInfo>, EnvironmentError> {
        Ok(scan(&self.settings.plugin_directory)?)
    }

    /// Manifest of a registered plugin.
    #[must_use]
    pub fn get_manifest(&self, plugin_id: &str) -> Option<Manifest> {
        self.read_registry()
            .get(plugin_id)
            .map(|registration| registration.bundle.manifest().clone())
    }

    /// Hooks of a running plugin with a server component.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::NotActive`] otherwise.
    pub fn hooks_for_plugin(&self, plugin_id: &str) -> Result<Arc<dyn PluginHooks>, EnvironmentError> {
        self.supervisor(plugin_id)
            .and_then(|supervisor| supervisor.hooks())
            .ok_or_else(|| EnvironmentError::NotActive {
                plugin_id: plugin_id.to_owned(),
            })
    }

    /// Running plugins with a server component, in discovery order.
    #[must_use]
    pub fn active_plugins(&self) -> Vec<ActivePlugin> {
        let mut plugins: Vec<ActivePlugin> = self
            .read_registry()
            .values()
            .filter(|registration| registration.state == PluginState::Running)
            .filter_map(|registration| {
                let supervisor = registration.supervisor.as_ref()?;
                Some(ActivePlugin {
                    manifest: registration.bundle.manifest().clone(),
                    hooks: supervisor.hooks()?,
                    implemented: supervisor.implemented(),
                    discovery_index: registration.discovery_index,
                })
            })
            .collect();
        plugins.sort_by_key(|plugin| plugin.discovery_index);
        plugins
    }

    /// Calls `hook_fn` for each running plugin implementing `hook`, in
    /// discovery order, until it returns false.
    pub fn run_multi_plugin_hook<F>(&self, mut hook_fn: F, hook: HookId)
    where
        F: FnMut(&dyn PluginHooks, &Manifest) -> bool,
    {
        for plugin in self.active_plugins() {
            if !plugin.implemented.contains(hook) {
                continue;
            }
            if !hook_fn(plugin.hooks.as_ref(), &plugin.manifest) {
                break;
            }
        }
    }

    /// Directory of a running plugin's public files.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::NotActive`] when the plugin is not
    /// running.
    pub fn public_files_path(&self, plugin_id: &str) -> Result<PathBuf, EnvironmentError> {
        self.read_registry()
            .get(plugin_id)
            .filter(|registration| registration.state == PluginState::Running)
            .map(|registration| registration.bundle.path().join("public"))
            .ok_or_else(|| EnvironmentError::NotActive {
                plugin_id: plugin_id.to_owned(),
            })
    }

    /// Copies a plugin's webapp bundle into the webapp directory under a
    /// content-hashed name.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError`] when the plugin is unknown, declares no
    /// webapp or the copy fails.
    pub fn unpack_webapp_bundle(&self, plugin_id: &str) -> Result<PathBuf, EnvironmentError> {
        let (bundle, _) = self.resolve_bundle(plugin_id)?;
        webapp::unpack(&bundle, &self.settings.webapp_directory)
    }

    /// Health-checks one running plugin.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::NotActive`] when the plugin runs no
    /// server component, or the supervisor's health-check error.
    pub fn perform_health_check(&self, plugin_id: &str) -> Result<(), EnvironmentError> {
        let supervisor = self
            .supervisor(plugin_id)
            .ok_or_else(|| EnvironmentError::NotActive {
                plugin_id: plugin_id.to_owned(),
            })?;
        Ok(supervisor.perform_health_check()?)
    }

    /// Health-checks every running plugin, reporting failures and
    /// restarting failed plugins when configured to.
    pub fn check_all_plugins(&self) {
        let supervisors: Vec<(String, Arc<Supervisor>)> = self
            .read_registry()
            .iter()
            .filter_map(|(plugin_id, registration)| {
                registration
                    .supervisor
                    .as_ref()
                    .map(|supervisor| (plugin_id.clone(), Arc::clone(supervisor)))
            })
            .collect();

        for (plugin_id, supervisor) in supervisors {
            let Err(error) = supervisor.perform_health_check() else {
                continue;
            };
            self.reporter.health_check_failed(&plugin_id, &error);
            if !self.settings.restart_on_failure {
                continue;
            }
            match self.restart_plugin(&plugin_id) {
                Ok(_) => self.reporter.plugin_restarted(&plugin_id),
                Err(restart_error) => self.reporter.restart_failed(&plugin_id, &restart_error),
            }
        }
    }

    /// Starts (`enable == true`) or stops the periodic health-check job.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::HealthJob`] when the thread cannot start.
    pub fn init_health_check_job(self: &Arc<Self>, enable: bool) -> Result<(), EnvironmentError> {
        let mut job = self.lock_health_job();
        if enable {
            if job.is_none() {
                let started = HealthCheckJob::start(
                    Arc::downgrade(self),
                    self.settings.health_check_interval,
                )
                .map_err(|source| EnvironmentError::HealthJob {
                    source: Arc::new(source),
                })?;
                *job = Some(started);
            }
        } else if let Some(running) = job.take() {
            running.cancel();
        }
        Ok(())
    }

    /// Returns true while the health-check job runs.
    #[must_use]
    pub fn health_check_job_running(&self) -> bool {
        self.lock_health_job().is_some()
    }

    fn start(&self, bundle: &BundleInfo) -> Result<Option<Arc<Supervisor>>, EnvironmentError> {
        let manifest = bundle.manifest();
        manifest.check_host_version(&self.settings.host_version)?;
        if !manifest.has_server() && !manifest.has_webapp() {
            return Err(EnvironmentError::NoComponents {
                plugin_id: manifest.id().to_owned(),
            });
        }

        let supervisor = if manifest.has_server() {
            let started = Supervisor::start(
                bundle,
                self.launcher.as_ref(),
                self.services.api_for(manifest),
                self.services.driver_for(manifest),
                self.settings.supervisor.clone(),
            )?;
            if let Err(error) = started.activate() {
                started.shutdown();
                return Err(error.into());
            }
            Some(Arc::new(started))
        } else {
            None
        };

        if manifest.has_webapp()
            && let Err(error) = webapp::unpack(bundle, &self.settings.webapp_directory)
        {
            if let Some(running) = &supervisor {
                running.shutdown();
            }
            return Err(error);
        }
        Ok(supervisor)
    }

    fn stop(&self, plugin_id: &str, supervisor: &Arc<Supervisor>) {
        let (done, finished) = mpsc::channel();
        let target = Arc::clone(supervisor);
        let spawned = thread::Builder::new()
            .name(format!("hookwired-deactivate-{plugin_id}"))
            .spawn(move || {
                let outcome = target.hooks().map(|hooks| hooks.on_deactivate());
                drop(done.send(outcome));
            });
        match spawned {
            Ok(_) => match finished.recv_timeout(self.settings.deactivate_grace) {
                Ok(Some(Err(error))) if !error.is_not_implemented() => {
                    warn!(target: ENVIRONMENT_TARGET, plugin_id, %error, "deactivate hook failed");
                }
                Ok(_) => {}
                Err(_) => {
                    warn!(target: ENVIRONMENT_TARGET, plugin_id, "deactivate hook timed out");
                }
            },
            Err(error) => {
                warn!(target: ENVIRONMENT_TARGET, plugin_id, %error, "cannot run deactivate hook");
            }
        }
        supervisor.shutdown();
    }

    fn resolve_bundle(&self, plugin_id: &str) -> Result<(BundleInfo, usize), EnvironmentError> {
        let mut matches: Vec<(usize, BundleInfo)> = self
            .available()?
            .into_iter()
            .enumerate()
            .filter(|(_, bundle)| bundle.id() == plugin_id)
            .collect();
        match matches.len() {
            0 => Err(EnvironmentError::NotFound {
                plugin_id: plugin_id.to_owned(),
            }),
            1 => matches
                .pop()
                .map(|(index, bundle)| (bundle, index))
                .ok_or_else(|| EnvironmentError::NotFound {
                    plugin_id: plugin_id.to_owned(),
                }),
            _ => Err(EnvironmentError::DuplicateId {
                plugin_id: plugin_id.to_owned(),
                paths: matches
                    .into_iter()
                    .map(|(_, bundle)| bundle.path().to_path_buf())
                    .collect(),
            }),
        }
    }

    fn supervisor(&self, plugin_id: &str) -> Option<Arc<Supervisor>> {
        self.read_registry()
            .get(plugin_id)
            .filter(|registration| registration.state == PluginState::Running)
            .and_then(|registration| registration.supervisor.clone())
    }

    fn activation_lock(&self, plugin_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .activation_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(plugin_id.to_owned()).or_default())
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, HashMap<String, Registration>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, HashMap<String, Registration>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_health_job(&self) -> MutexGuard<'_, Option<HealthCheckJob>> {
        self.health_job.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("plugin_directory", &self.settings.plugin_directory)
            .field("registered", &self.read_registry().len())
            .finish_non_exhaustive()
    }
}
