//! Host services handed to each connected plugin.

use std::sync::Arc;

use hookwire_bridge::RemoteError;
use hookwire_plugins::Manifest;
use hookwire_plugins::api::{Driver, ExecResult, HostApi, KvSetOptions, LogLevel, Row};
use hookwire_plugins::manifest::ConfigSetting;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::configuration::ConfigurationStore;
use crate::kv::KeyValueStore;

const PLUGIN_LOG_TARGET: &str = "hookwired::plugin_log";

/// Builds the services served to a plugin on activation.
pub trait HostServices: Send + Sync {
    /// API scoped to the plugin described by `manifest`.
    fn api_for(&self, manifest: &Manifest) -> Arc<dyn HostApi>;

    /// Data-access driver for the plugin.
    fn driver_for(&self, manifest: &Manifest) -> Arc<dyn Driver>;
}

/// [`HostServices`] backed by the host's stores.
#[derive(Clone)]
pub struct StoreServices {
    kv: Arc<dyn KeyValueStore>,
    configuration: Arc<dyn ConfigurationStore>,
    driver: Arc<dyn Driver>,
}

impl StoreServices {
    /// Creates services that refuse database access.
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, configuration: Arc<dyn ConfigurationStore>) -> Self {
        Self {
            kv,
            configuration,
            driver: Arc::new(DisabledDriver),
        }
    }

    /// Replaces the data-access driver.
    #[must_use]
    pub fn with_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = driver;
        self
    }
}

impl std::fmt::Debug for StoreServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreServices").finish_non_exhaustive()
    }
}

impl HostServices for StoreServices {
    fn api_for(&self, manifest: &Manifest) -> Arc<dyn HostApi> {
        Arc::new(PluginApi {
            plugin_id: manifest.id().to_owned(),
            defaults: manifest.default_configuration(),
            kv: Arc::clone(&self.kv),
            configuration: Arc::clone(&self.configuration),
        })
    }

    fn driver_for(&self, _manifest: &Manifest) -> Arc<dyn Driver> {
        Arc::clone(&self.driver)
    }
}

/// [`HostApi`] bound to one plugin id.
pub struct PluginApi {
    plugin_id: String,
    defaults: Vec<ConfigSetting>,
    kv: Arc<dyn KeyValueStore>,
    configuration: Arc<dyn ConfigurationStore>,
}

impl std::fmt::Debug for PluginApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginApi")
            .field("plugin_id", &self.plugin_id)
            .finish_non_exhaustive()
    }
}

impl HostApi for PluginApi {
    fn kv_set_with_options(
        &self,
        key: &str,
        value: Option<&[u8]>,
        options: &KvSetOptions,
    ) -> Result<bool, RemoteError> {
        self.kv
            .set(&self.plugin_id, key, value, options)
            .map_err(RemoteError::message)
    }

    fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        self.kv.get(&self.plugin_id, key).map_err(RemoteError::message)
    }

    fn kv_delete(&self, key: &str) -> Result<(), RemoteError> {
        self.kv
            .delete(&self.plugin_id, key)
            .map_err(RemoteError::message)
    }

    fn kv_delete_all(&self) -> Result<(), RemoteError> {
        self.kv
            .delete_all(&self.plugin_id)
            .map_err(RemoteError::message)
    }

    fn kv_list(&self, page: u32, per_page: u32) -> Result<Vec<String>, RemoteError> {
        self.kv
            .list(&self.plugin_id, page, per_page)
            .map_err(RemoteError::message)
    }

    fn load_configuration(&self) -> Result<Vec<ConfigSetting>, RemoteError> {
        let stored = self
            .configuration
            .load(&self.plugin_id, None)
            .map_err(RemoteError::message)?;
        Ok(stored.map_or_else(|| self.defaults.clone(), |found| found.configuration))
    }

    fn log(&self, level: LogLevel, message: &str) -> Result<(), RemoteError> {
        let plugin_id = self.plugin_id.as_str();
        match level {
            LogLevel::Debug => debug!(target: PLUGIN_LOG_TARGET, plugin_id, "{message}"),
            LogLevel::Info => info!(target: PLUGIN_LOG_TARGET, plugin_id, "{message}"),
            LogLevel::Warn => warn!(target: PLUGIN_LOG_TARGET, plugin_id, "{message}"),
            LogLevel::Error => error!(target: PLUGIN_LOG_TARGET, plugin_id, "{message}"),
        }
        Ok(())
    }
}

/// Driver used when the host offers no database.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledDriver;

impl Driver for DisabledDriver {
    fn query(&self, _statement: &str, _args: &[Value]) -> Result<Vec<Row>, RemoteError> {
        Err(RemoteError::BadConnection)
    }

    fn exec(&self, _statement: &str, _args: &[Value]) -> Result<ExecResult, RemoteError> {
        Err(RemoteError::BadConnection)
    }
}
