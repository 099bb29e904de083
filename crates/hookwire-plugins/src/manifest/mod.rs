//! Plugin manifest types describing identity, components and settings.
//!
//! A [`Manifest`] is read once from `plugin.json` inside a bundle and is
//! immutable afterwards; a new activation reads a new manifest. Manifests are
//! validated on load so malformed bundles never reach activation.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::error::PluginError;

/// File name of the manifest inside a bundle directory.
pub const MANIFEST_FILE_NAME: &str = "plugin.json";

const MIN_ID_LEN: usize = 3;
const MAX_ID_LEN: usize = 190;

/// Returns true if `id` is a valid plugin identifier.
///
/// Identifiers are 3 to 190 characters drawn from ASCII letters, digits,
/// `-`, `_` and `.`.
///
/// # Example
///
/// ```
/// use hookwire_plugins::manifest::is_valid_plugin_id;
///
/// assert!(is_valid_plugin_id("tax.avalara"));
/// assert!(!is_valid_plugin_id("../etc"));
/// ```
#[must_use]
pub fn is_valid_plugin_id(id: &str) -> bool {
    (MIN_ID_LEN..=MAX_ID_LEN).contains(&id.len())
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !id.starts_with('.')
}

/// Value type of a configuration field.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SettingKind {
    /// Single-line text.
    String,
    /// Multi-line text.
    Multiline,
    /// True or false.
    Boolean,
    /// Single-line secret, masked in outward views.
    Secret,
    /// Multi-line secret.
    SecretMultiline,
    /// Password.
    Password,
    /// Written by the plugin only; callers may not set it.
    OutputOnly,
}

impl SettingKind {
    /// Returns true if `value` has the JSON shape this kind expects.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Boolean => value.is_boolean(),
            Self::String
            | Self::Multiline
            | Self::Secret
            | Self::SecretMultiline
            | Self::Password
            | Self::OutputOnly => value.is_string() || value.is_null(),
        }
    }
}

/// One field of a plugin's configuration schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingField {
    key: String,
    #[serde(rename = "type")]
    kind: SettingKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    help_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<Value>,
}

impl SettingField {
    /// Creates a field without a default value.
    #[must_use]
    pub fn new(key: impl Into<String>, kind: SettingKind) -> Self {
        Self {
            key: key.into(),
            kind,
            display_name: String::new(),
            help_text: String::new(),
            default: None,
        }
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Returns the setting key.
    #[must_use]
    pub const fn key(&self) -> &str {
        self.key.as_str()
    }

    /// Returns the value type.
    #[must_use]
    pub const fn kind(&self) -> SettingKind {
        self.kind
    }

    /// Returns the human-readable label, falling back to the key.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.key
        } else {
            &self.display_name
        }
    }

    /// Returns the default value, if any.
    #[must_use]
    pub const fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }
}

/// A named configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSetting {
    /// Setting key.
    pub name: String,
    /// Setting value.
    pub value: Value,
}

impl ConfigSetting {
    /// Creates a setting.
    #[must_use]
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Server-side component: the executable the host launches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerComponent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    executable: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    executables: HashMap<String, PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
}

impl ServerComponent {
    /// Creates a component with a single executable for every platform.
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: Some(executable.into()),
            executables: HashMap::new(),
            args: Vec::new(),
        }
    }

    /// Adds a platform-specific executable, keyed as `<os>-<arch>`.
    #[must_use]
    pub fn with_platform_executable(
        mut self,
        platform: impl Into<String>,
        executable: impl Into<PathBuf>,
    ) -> Self {
        self.executables.insert(platform.into(), executable.into());
        self
    }

    /// Sets arguments passed to the executable.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Returns the executable for `platform`, falling back to the generic one.
    #[must_use]
    pub fn executable_for(&self, platform: &str) -> Option<&Path> {
        self.executables
            .get(platform)
            .or(self.executable.as_ref())
            .map(PathBuf::as_path)
    }

    /// Returns the executable for the running platform.
    #[must_use]
    pub fn current_executable(&self) -> Option<&Path> {
        self.executable_for(&current_platform())
    }

    /// Returns the arguments passed to the executable.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Platform key of the running host, e.g. `linux-x86_64`.
#[must_use]
pub fn current_platform() -> String {
    format!("{}-{}", env::consts::OS, env::consts::ARCH)
}

/// Webapp component: a static bundle served to browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebappComponent {
    bundle_path: PathBuf,
}

impl WebappComponent {
    /// Creates a component from a bundle path relative to the plugin root.
    #[must_use]
    pub fn new(bundle_path: impl Into<PathBuf>) -> Self {
        Self {
            bundle_path: bundle_path.into(),
        }
    }

    /// Returns the bundle path relative to the plugin root.
    #[must_use]
    pub fn bundle_path(&self) -> &Path {
        &self.bundle_path
    }
}

/// Declarative description of a plugin.
///
/// # Example
///
/// ```
/// use hookwire_plugins::manifest::{Manifest, ServerComponent};
///
/// let manifest = Manifest::new("tax.flat", "Flat tax", "1.0.0")
///     .with_server(ServerComponent::new("bin/flat-tax"))
///     .with_priority(10);
///
/// assert!(manifest.validate().is_ok());
/// assert!(manifest.has_server());
/// assert!(!manifest.has_webapp());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    id: String,
    name: String,
    version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_host_version: Option<String>,
    #[serde(default)]
    priority: i32,
    #[serde(default = "default_active")]
    default_active: bool,
    #[serde(default)]
    configuration_per_channel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server: Option<ServerComponent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    webapp: Option<WebappComponent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    settings: Vec<SettingField>,
}

const fn default_active() -> bool {
    true
}

impl Manifest {
    /// Creates a manifest with no components and no settings.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            description: String::new(),
            min_host_version: None,
            priority: 0,
            default_active: true,
            configuration_per_channel: false,
            server: None,
            webapp: None,
            settings: Vec::new(),
        }
    }

    /// Reads and validates a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ManifestRead`], [`PluginError::ManifestParse`]
    /// or [`PluginError::Manifest`] when the file is missing, malformed or
    /// invalid.
    pub fn from_path(path: &Path) -> Result<Self, PluginError> {
        let contents = fs::read(path).map_err(|source| PluginError::ManifestRead {
            path: path.to_path_buf(),
            source: Arc::new(source),
        })?;
        let manifest: Self =
            serde_json::from_slice(&contents).map_err(|source| PluginError::ManifestParse {
                path: path.to_path_buf(),
                source: Arc::new(source),
            })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declares the minimum host version.
    #[must_use]
    pub fn with_min_host_version(mut self, version: impl Into<String>) -> Self {
        self.min_host_version = Some(version.into());
        self
    }

    /// Sets the chain priority; lower runs first.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets whether a plugin without stored configuration starts active.
    #[must_use]
    pub const fn with_default_active(mut self, active: bool) -> Self {
        self.default_active = active;
        self
    }

    /// Sets whether configuration is stored per channel.
    #[must_use]
    pub const fn with_configuration_per_channel(mut self, per_channel: bool) -> Self {
        self.configuration_per_channel = per_channel;
        self
    }

    /// Declares a server component.
    #[must_use]
    pub fn with_server(mut self, server: ServerComponent) -> Self {
        self.server = Some(server);
        self
    }

    /// Declares a webapp component.
    #[must_use]
    pub fn with_webapp(mut self, webapp: WebappComponent) -> Self {
        self.webapp = Some(webapp);
        self
    }

    /// Declares the configuration schema.
    #[must_use]
    pub fn with_settings(mut self, settings: Vec<SettingField>) -> Self {
        self.settings = settings;
        self
    }

    /// Validates the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Manifest`] if the id is invalid, the name is
    /// empty, a version does not parse, a server component names no
    /// executable, or setting keys repeat.
    pub fn validate(&self) -> Result<(), PluginError> {
        if !is_valid_plugin_id(&self.id) {
            return Err(manifest_error(format!("invalid plugin id '{}'", self.id)));
        }
        if self.name.trim().is_empty() {
            return Err(manifest_error(format!("plugin '{}' has no name", self.id)));
        }
        Version::parse(&self.version).map_err(|error| {
            manifest_error(format!("plugin '{}' has invalid version: {error}", self.id))
        })?;
        if let Some(required) = &self.min_host_version {
            Version::parse(required).map_err(|error| {
                manifest_error(format!(
                    "plugin '{}' has invalid min_host_version: {error}",
                    self.id
                ))
            })?;
        }
        if let Some(server) = &self.server
            && server.executable.is_none()
            && server.executables.is_empty()
        {
            return Err(manifest_error(format!(
                "plugin '{}' declares a server component without an executable",
                self.id
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for field in &self.settings {
            if !seen.insert(field.key.as_str()) {
                return Err(manifest_error(format!(
                    "plugin '{}' repeats setting '{}'",
                    self.id, field.key
                )));
            }
        }
        Ok(())
    }

    /// Checks the minimum host version constraint.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::HostVersionUnsupported`] when `host` is older
    /// than the declared minimum.
    pub fn check_host_version(&self, host: &Version) -> Result<(), PluginError> {
        let Some(required) = &self.min_host_version else {
            return Ok(());
        };
        let minimum = Version::parse(required).map_err(|error| {
            manifest_error(format!(
                "plugin '{}' has invalid min_host_version: {error}",
                self.id
            ))
        })?;
        if *host < minimum {
            return Err(PluginError::HostVersionUnsupported {
                id: self.id.clone(),
                required: required.clone(),
                host: host.to_string(),
            });
        }
        Ok(())
    }

    /// Returns the parsed plugin version.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Manifest`] if the version does not parse.
    pub fn parsed_version(&self) -> Result<Version, PluginError> {
        Version::parse(&self.version).map_err(|error| {
            manifest_error(format!("plugin '{}' has invalid version: {error}", self.id))
        })
    }

    /// Returns the plugin id.
    #[must_use]
    pub const fn id(&self) -> &str {
        self.id.as_str()
    }

    /// Returns the display name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the version string.
    #[must_use]
    pub const fn version(&self) -> &str {
        self.version.as_str()
    }

    /// Returns the description.
    #[must_use]
    pub const fn description(&self) -> &str {
        self.description.as_str()
    }

    /// Returns the declared minimum host version.
    #[must_use]
    pub fn min_host_version(&self) -> Option<&str> {
        self.min_host_version.as_deref()
    }

    /// Returns the chain priority.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Returns whether the plugin starts active without stored configuration.
    #[must_use]
    pub const fn default_active(&self) -> bool {
        self.default_active
    }

    /// Returns whether configuration is stored per channel.
    #[must_use]
    pub const fn configuration_per_channel(&self) -> bool {
        self.configuration_per_channel
    }

    /// Returns the server component.
    #[must_use]
    pub const fn server(&self) -> Option<&ServerComponent> {
        self.server.as_ref()
    }

    /// Returns the webapp component.
    #[must_use]
    pub const fn webapp(&self) -> Option<&WebappComponent> {
        self.webapp.as_ref()
    }

    /// Returns true if the plugin ships a server executable.
    #[must_use]
    pub const fn has_server(&self) -> bool {
        self.server.is_some()
    }

    /// Returns true if the plugin ships webapp assets.
    #[must_use]
    pub const fn has_webapp(&self) -> bool {
        self.webapp.is_some()
    }

    /// Returns the configuration schema.
    #[must_use]
    pub fn settings(&self) -> &[SettingField] {
        &self.settings
    }

    /// Looks up a schema field by key.
    #[must_use]
    pub fn setting(&self, key: &str) -> Option<&SettingField> {
        self.settings.iter().find(|field| field.key == key)
    }

    /// Returns the default configuration in schema order.
    #[must_use]
    pub fn default_configuration(&self) -> Vec<ConfigSetting> {
        self.settings
            .iter()
            .map(|field| {
                ConfigSetting::new(
                    field.key.clone(),
                    field.default.clone().unwrap_or(Value::Null),
                )
            })
            .collect()
    }
}

fn manifest_error(message: String) -> PluginError {
    PluginError::Manifest { message }
}

#[cfg(test)]
mod tests;
