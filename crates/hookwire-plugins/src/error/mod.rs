//! Errors raised while reading manifests and scanning bundles.
//!
//! I/O and JSON errors are wrapped in `Arc` so the enum stays `Clone` and
//! `Send + Sync`.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Errors arising from manifest and bundle handling.
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    /// A manifest failed validation.
    #[error("manifest error: {message}")]
    Manifest {
        /// Description of the validation failure.
        message: String,
    },

    /// A manifest file could not be read.
    #[error("failed to read manifest '{path}': {source}")]
    ManifestRead {
        /// Manifest path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A manifest file is not valid JSON for the manifest schema.
    #[error("failed to parse manifest '{path}': {source}")]
    ManifestParse {
        /// Manifest path.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// The plugin requires a newer host.
    #[error("plugin '{id}' requires host version {required}, running {host}")]
    HostVersionUnsupported {
        /// Plugin id.
        id: String,
        /// Minimum host version declared by the manifest.
        required: String,
        /// Version of the running host.
        host: String,
    },

    /// The plugin directory could not be listed.
    #[error("failed to scan plugin directory '{path}': {source}")]
    Scan {
        /// Directory that was scanned.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
}
