//! Unpacks webapp bundles into the served webapp directory.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use hookwire_plugins::BundleInfo;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{ENVIRONMENT_TARGET, EnvironmentError};

const HASH_PREFIX_BYTES: usize = 8;

/// Name under which a webapp bundle is served: the plugin id followed by a
/// short content hash, so browsers refetch changed bundles.
#[must_use]
pub fn bundle_file_name(plugin_id: &str, contents: &[u8]) -> String {
    let digest = Sha256::digest(contents);
    let mut hash = String::with_capacity(HASH_PREFIX_BYTES * 2);
    for byte in digest.iter().take(HASH_PREFIX_BYTES) {
        // Writing to a String cannot fail.
        let _written = write!(hash, "{byte:02x}");
    }
    format!("{plugin_id}_{hash}_bundle.js")
}

fn is_safe_bundle_path(path: &Path) -> bool {
    path.components().next().is_some()
        && path.components().all(|component| match component {
            Component::Normal(name) => !name.to_string_lossy().starts_with('.'),
            _ => false,
        })
}

pub(super) fn unpack(bundle: &BundleInfo, webapp_directory: &Path) -> Result<PathBuf, EnvironmentError> {
    let manifest = bundle.manifest();
    let plugin_id = manifest.id();
    let webapp = manifest
        .webapp()
        .ok_or_else(|| EnvironmentError::MissingWebapp {
            plugin_id: plugin_id.to_owned(),
        })?;
    let relative = webapp.bundle_path();
    if !is_safe_bundle_path(relative) {
        return Err(EnvironmentError::InvalidBundlePath {
            plugin_id: plugin_id.to_owned(),
            path: relative.to_path_buf(),
        });
    }

    let source = bundle.path().join(relative);
    let contents = fs::read(&source).map_err(|error| webapp_error(plugin_id, &source, error))?;

    let destination = webapp_directory.join(plugin_id);
    match fs::remove_dir_all(&destination) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => return Err(webapp_error(plugin_id, &destination, error)),
    }
    fs::create_dir_all(&destination).map_err(|error| webapp_error(plugin_id, &destination, error))?;

    let target = destination.join(bundle_file_name(plugin_id, &contents));
    fs::write(&target, &contents).map_err(|error| webapp_error(plugin_id, &target, error))?;
    debug!(target: ENVIRONMENT_TARGET, plugin_id, path = %target.display(), "webapp unpacked");
    Ok(target)
}

fn webapp_error(plugin_id: &str, path: &Path, source: io::Error) -> EnvironmentError {
    EnvironmentError::Webapp {
        plugin_id: plugin_id.to_owned(),
        path: path.to_path_buf(),
        source: Arc::new(source),
    }
}
