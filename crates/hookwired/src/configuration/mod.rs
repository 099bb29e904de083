//! Stored plugin configuration.
//!
//! A plugin may carry one global configuration (no channel) or, when its
//! manifest allows it, one configuration per channel.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hookwire_plugins::manifest::ConfigSetting;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by configuration stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// The backing store failed.
    #[error("configuration store failure: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },
}

/// Persisted settings for one (plugin, channel) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfiguration {
    /// Plugin the settings belong to.
    pub plugin_id: String,
    /// Channel the settings target; `None` for the global configuration.
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Whether this instance takes part in dispatch.
    pub active: bool,
    /// Ordered settings.
    #[serde(default)]
    pub configuration: Vec<ConfigSetting>,
}

impl PluginConfiguration {
    /// Creates a configuration.
    #[must_use]
    pub fn new(
        plugin_id: impl Into<String>,
        channel_id: Option<String>,
        active: bool,
        configuration: Vec<ConfigSetting>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            channel_id,
            active,
            configuration,
        }
    }

    /// Looks a setting up by name.
    #[must_use]
    pub fn setting(&self, name: &str) -> Option<&ConfigSetting> {
        self.configuration.iter().find(|setting| setting.name == name)
    }
}

/// Storage contract for plugin configuration.
pub trait ConfigurationStore: Send + Sync {
    /// Loads the configuration for a plugin and channel.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] when the store fails.
    fn load(
        &self,
        plugin_id: &str,
        channel_id: Option<&str>,
    ) -> Result<Option<PluginConfiguration>, ConfigurationError>;

    /// Lists every stored configuration of a plugin, global first.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] when the store fails.
    fn list(&self, plugin_id: &str) -> Result<Vec<PluginConfiguration>, ConfigurationError>;

    /// Inserts or replaces a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] when the store fails.
    fn save(&self, configuration: PluginConfiguration) -> Result<(), ConfigurationError>;

    /// Deletes every configuration of a plugin.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] when the store fails.
    fn delete(&self, plugin_id: &str) -> Result<(), ConfigurationError>;
}

type ConfigurationKey = (String, Option<String>);

/// In-memory [`ConfigurationStore`].
#[derive(Debug, Default)]
pub struct MemoryConfigurationStore {
    entries: Mutex<BTreeMap<ConfigurationKey, PluginConfiguration>>,
}

impl MemoryConfigurationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ConfigurationKey, PluginConfiguration>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConfigurationStore for MemoryConfigurationStore {
    fn load(
        &self,
        plugin_id: &str,
        channel_id: Option<&str>,
    ) -> Result<Option<PluginConfiguration>, ConfigurationError> {
        let key = (plugin_id.to_owned(), channel_id.map(str::to_owned));
        Ok(self.lock().get(&key).cloned())
    }

    fn list(&self, plugin_id: &str) -> Result<Vec<PluginConfiguration>, ConfigurationError> {
        // `None` sorts before `Some`, so the global entry leads.
        Ok(self
            .lock()
            .iter()
            .filter(|((id, _), _)| id == plugin_id)
            .map(|(_, configuration)| configuration.clone())
            .collect())
    }

    fn save(&self, configuration: PluginConfiguration) -> Result<(), ConfigurationError> {
        let key = (
            configuration.plugin_id.clone(),
            configuration.channel_id.clone(),
        );
        self.lock().insert(key, configuration);
        Ok(())
    }

    fn delete(&self, plugin_id: &str) -> Result<(), ConfigurationError> {
        self.lock().retain(|(id, _), _| id != plugin_id);
        Ok(())
    }
}
