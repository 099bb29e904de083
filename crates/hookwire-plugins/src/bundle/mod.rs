//! Bundle discovery on disk.
//!
//! A bundle is a directory `<plugin_dir>/<name>/` holding a `plugin.json`
//! manifest plus whatever executables and web assets the manifest names.
//! Scanning is shallow and manifest-gated: only immediate, non-hidden
//! subdirectories with a loadable manifest become [`BundleInfo`] records.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::PluginError;
use crate::manifest::{MANIFEST_FILE_NAME, Manifest};

const BUNDLE_TARGET: &str = "hookwire_plugins::bundle";

/// Marker file indicating the bundle is managed by an external file store.
pub const FILESTORE_MARKER: &str = ".filestore";

/// A manifest discovered on disk together with its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleInfo {
    path: PathBuf,
    manifest_path: PathBuf,
    manifest: Manifest,
    filestore_managed: bool,
}

impl BundleInfo {
    /// Creates a record from parts.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, manifest: Manifest) -> Self {
        let bundle_path = path.into();
        Self {
            manifest_path: bundle_path.join(MANIFEST_FILE_NAME),
            path: bundle_path,
            manifest,
            filestore_managed: false,
        }
    }

    /// Loads the bundle rooted at `directory`.
    ///
    /// Returns `Ok(None)` when the directory holds no manifest file.
    ///
    /// # Errors
    ///
    /// Returns a manifest error when the file exists but cannot be loaded.
    pub fn from_directory(directory: &Path) -> Result<Option<Self>, PluginError> {
        let Some(manifest_path) = find_manifest(directory) else {
            return Ok(None);
        };
        let manifest = Manifest::from_path(&manifest_path)?;
        Ok(Some(Self {
            path: directory.to_path_buf(),
            manifest_path,
            manifest,
            filestore_managed: directory.join(FILESTORE_MARKER).is_file(),
        }))
    }

    /// Returns the bundle directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the manifest file path.
    #[must_use]
    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Returns the manifest.
    #[must_use]
    pub const fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Returns the plugin id declared by the manifest.
    #[must_use]
    pub const fn id(&self) -> &str {
        self.manifest.id()
    }

    /// Returns true when an external file store manages the bundle.
    #[must_use]
    pub const fn is_filestore_managed(&self) -> bool {
        self.filestore_managed
    }

    /// Resolves the server executable for the running platform.
    #[must_use]
    pub fn server_executable(&self) -> Option<PathBuf> {
        self.manifest
            .server()
            .and_then(|server| server.current_executable())
            .map(|executable| self.path.join(executable))
    }
}

/// Returns the manifest path inside `directory`, if one exists.
#[must_use]
pub fn find_manifest(directory: &Path) -> Option<PathBuf> {
    let candidate = directory.join(MANIFEST_FILE_NAME);
    candidate.is_file().then_some(candidate)
}

/// Scans `directory` for bundles.
///
/// Results are ordered by directory name, which defines discovery order.
/// Entries that are not directories, whose names start with a dot, or that
/// hold no loadable manifest are skipped.
///
/// # Errors
///
/// Returns [`PluginError::Scan`] only when `directory` itself cannot be
/// listed.
pub fn scan(directory: &Path) -> Result<Vec<BundleInfo>, PluginError> {
    let entries = fs::read_dir(directory).map_err(|source| PluginError::Scan {
        path: directory.to_path_buf(),
        source: Arc::new(source),
    })?;

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    candidates.sort();

    let mut bundles = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match BundleInfo::from_directory(&candidate) {
            Ok(Some(bundle)) => bundles.push(bundle),
            Ok(None) => {
                debug!(target: BUNDLE_TARGET, path = %candidate.display(), "no manifest, skipping");
            }
            Err(error) => {
                debug!(
                    target: BUNDLE_TARGET,
                    path = %candidate.display(),
                    %error,
                    "unloadable manifest, skipping"
                );
            }
        }
    }
    Ok(bundles)
}
