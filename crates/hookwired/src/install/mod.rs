//! Installs and removes plugin bundles from archives.

mod archive;

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hookwire_plugins::bundle::{FILESTORE_MARKER, find_manifest};
use hookwire_plugins::{Manifest, PluginError};
use thiserror::Error;
use tracing::{debug, info};

use crate::environment::{Environment, EnvironmentError};
use crate::signature::{SignatureError, SignaturePolicy};

pub use archive::extract_tar_gz;

const INSTALL_TARGET: &str = "hookwired::install";

/// How an archive interacts with an already installed plugin of the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallStrategy {
    /// Replace whatever is installed.
    #[default]
    Always,
    /// Install only when the id is not installed yet.
    OnlyIfNew,
    /// Install when new, or when the archive carries a higher version.
    OnlyIfNewOrUpgrade,
}

/// Options for one installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstallRequest {
    /// Replacement rule.
    pub strategy: InstallStrategy,
    /// Marks the bundle as managed by an external file store.
    pub filestore_managed: bool,
    /// Activates the plugin once installed.
    pub activate: bool,
}

/// Result of [`PluginInstaller::install`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The strategy kept the installed plugin.
    Skipped {
        /// Manifest found in the archive.
        manifest: Manifest,
    },
    /// The bundle was installed.
    Installed {
        /// Installed manifest.
        manifest: Manifest,
        /// Whether this call started the plugin.
        activated: bool,
    },
}

/// Errors raised while installing or removing plugins.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The archive stream could not be read.
    #[error("failed to read plugin archive: {source}")]
    Read {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The signature policy refused the archive.
    #[error(transparent)]
    Signature(#[from] SignatureError),
    /// The archive is malformed or could not be unpacked.
    #[error("invalid plugin archive: {source}")]
    Archive {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// An archive entry points outside the bundle.
    #[error("archive entry '{}' escapes the bundle directory", path.display())]
    UnsafePath {
        /// Offending entry path.
        path: PathBuf,
    },
    /// The archive holds no manifest.
    #[error("plugin archive contains no manifest")]
    NoManifest,
    /// The manifest is invalid or the host is too old.
    #[error(transparent)]
    Plugin(#[from] PluginError),
    /// Webapp unpacking or activation failed.
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    /// No installed bundle has the id.
    #[error("plugin '{plugin_id}' is not installed")]
    NotInstalled {
        /// Requested plugin.
        plugin_id: String,
    },
    /// A bundle directory could not be written or removed.
    #[error("failed to update plugin files at '{}': {source}", path.display())]
    Filesystem {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

/// Installs archives into an environment's plugin directory.
#[derive(Debug)]
pub struct PluginInstaller {
    environment: Arc<Environment>,
    signatures: SignaturePolicy,
}

impl PluginInstaller {
    /// Creates an installer that accepts unsigned archives.
    #[must_use]
    pub fn new(environment: Arc<Environment>) -> Self {
        Self {
            environment,
            signatures: SignaturePolicy::permissive(),
        }
    }

    /// Replaces the signature policy.
    #[must_use]
    pub fn with_signatures(mut self, signatures: SignaturePolicy) -> Self {
        self.signatures = signatures;
        self
    }

    /// Installs the bundle in a `.tar.gz` archive.
    ///
    /// The archive is unpacked into a staging directory next to the plugin
    /// directory, so a failed install never disturbs an installed bundle.
    /// An archive holding a single top-level directory is unwrapped.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError`] describing the failed step.
    pub fn install<R: Read>(
        &self,
        mut source: R,
        signature: Option<&[u8]>,
        request: &InstallRequest,
    ) -> Result<InstallOutcome, InstallError> {
        let mut bytes = Vec::new();
        source
            .read_to_end(&mut bytes)
            .map_err(|error| InstallError::Read {
                source: Arc::new(error),
            })?;
        self.signatures.check(&bytes, signature)?;

        let plugin_directory = &self.environment.settings().plugin_directory;
        fs::create_dir_all(plugin_directory).map_err(|error| filesystem(plugin_directory, error))?;
        let staging = tempfile::Builder::new()
            .prefix(".install-")
            .tempdir_in(plugin_directory)
            .map_err(|error| filesystem(plugin_directory, error))?;
        extract_tar_gz(bytes.as_slice(), staging.path())?;

        let bundle_root = unwrap_single_directory(staging.path())?;
        let manifest_path = find_manifest(&bundle_root).ok_or(InstallError::NoManifest)?;
        let manifest = Manifest::from_path(&manifest_path)?;
        manifest.check_host_version(&self.environment.settings().host_version)?;
        let plugin_id = manifest.id().to_owned();

        let installed = self
            .environment
            .available()?
            .into_iter()
            .find(|bundle| bundle.id() == plugin_id);
        if let Some(existing) = &installed
            && !should_replace(request.strategy, existing.manifest(), &manifest)
        {
            debug!(target: INSTALL_TARGET, plugin_id, strategy = ?request.strategy, "install skipped");
            return Ok(InstallOutcome::Skipped { manifest });
        }
        if let Some(existing) = installed {
            self.environment.remove_plugin(&plugin_id);
            remove_directory(existing.path())?;
        }

        let destination = plugin_directory.join(&plugin_id);
        remove_directory(&destination)?;
        fs::rename(&bundle_root, &destination).map_err(|error| filesystem(&destination, error))?;
        if request.filestore_managed {
            let marker = destination.join(FILESTORE_MARKER);
            fs::write(&marker, b"").map_err(|error| filesystem(&marker, error))?;
        }
        if manifest.has_webapp() {
            self.environment.unpack_webapp_bundle(&plugin_id)?;
        }
        info!(target: INSTALL_TARGET, plugin_id, version = manifest.version(), "plugin installed");

        let activated = if request.activate {
            self.environment.activate(&plugin_id)?.activated
        } else {
            false
        };
        Ok(InstallOutcome::Installed {
            manifest,
            activated,
        })
    }

    /// Stops and deletes an installed plugin, including its webapp assets.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::NotInstalled`] or a filesystem failure.
    pub fn remove(&self, plugin_id: &str) -> Result<(), InstallError> {
        let bundle = self
            .environment
            .available()?
            .into_iter()
            .find(|bundle| bundle.id() == plugin_id)
            .ok_or_else(|| InstallError::NotInstalled {
                plugin_id: plugin_id.to_owned(),
            })?;
        self.environment.remove_plugin(plugin_id);
        remove_directory(bundle.path())?;
        remove_directory(&self.environment.settings().webapp_directory.join(plugin_id))?;
        info!(target: INSTALL_TARGET, plugin_id, "plugin removed");
        Ok(())
    }
}

fn should_replace(strategy: InstallStrategy, installed: &Manifest, candidate: &Manifest) -> bool {
    match strategy {
        InstallStrategy::Always => true,
        InstallStrategy::OnlyIfNew => false,
        InstallStrategy::OnlyIfNewOrUpgrade => {
            match (installed.parsed_version(), candidate.parsed_version()) {
                (Ok(current), Ok(offered)) => offered > current,
                _ => false,
            }
        }
    }
}

/// Returns `root` when it holds a manifest, otherwise its only child
/// directory.
fn unwrap_single_directory(root: &Path) -> Result<PathBuf, InstallError> {
    if find_manifest(root).is_some() {
        return Ok(root.to_path_buf());
    }
    let mut children = fs::read_dir(root)
        .map_err(|error| filesystem(root, error))?
        .filter_map(Result::ok)
        .map(|entry| entry.path());
    match (children.next(), children.next()) {
        (Some(only), None) if only.is_dir() => Ok(only),
        _ => Err(InstallError::NoManifest),
    }
}

fn remove_directory(path: &Path) -> Result<(), InstallError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(filesystem(path, error)),
    }
}

fn filesystem(path: &Path, source: io::Error) -> InstallError {
    InstallError::Filesystem {
        path: path.to_path_buf(),
        source: Arc::new(source),
    }
}
