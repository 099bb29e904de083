//! Detached-signature checks for plugin archives and the trusted key ring.
//!
//! The cryptographic check itself is a [`SignatureVerifier`] supplied by the
//! embedding host; this module decides which keys to try and when a
//! signature is mandatory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SignatureConfig;

const SIGNATURE_TARGET: &str = "hookwired::signature";

/// Checks a detached signature against one public key.
pub trait SignatureVerifier: Send + Sync {
    /// Returns true when `signature` is a valid signature of `message`
    /// under `public_key`.
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;
}

/// Errors raised by signature checks and key management.
#[derive(Debug, Clone, Error)]
pub enum SignatureError {
    /// A signature is required but none was supplied.
    #[error("a plugin signature is required")]
    Missing,
    /// No trusted key accepts the signature.
    #[error("plugin signature does not match any trusted key")]
    Invalid,
    /// The key name is empty, hidden or contains a path separator.
    #[error("invalid public key name '{name}'")]
    InvalidKeyName {
        /// Rejected name.
        name: String,
    },
    /// No key with this name exists.
    #[error("public key '{name}' not found")]
    KeyNotFound {
        /// Requested name.
        name: String,
    },
    /// A key file could not be accessed.
    #[error("public key file '{}' is not accessible: {source}", path.display())]
    KeyIo {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

/// Public key files kept in one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyRing {
    directory: PathBuf,
}

impl PublicKeyRing {
    /// Key ring stored in `directory`.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Directory holding the keys.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Stores a key under `name`, replacing any key of that name.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::InvalidKeyName`] or
    /// [`SignatureError::KeyIo`].
    pub fn add(&self, name: &str, key: &[u8]) -> Result<(), SignatureError> {
        let path = self.key_path(name)?;
        fs::create_dir_all(&self.directory).map_err(|error| key_io(&self.directory, error))?;
        fs::write(&path, key).map_err(|error| key_io(&path, error))?;
        debug!(target: SIGNATURE_TARGET, name, "public key added");
        Ok(())
    }

    /// Reads the key stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::KeyNotFound`] when it does not exist.
    pub fn read(&self, name: &str) -> Result<Vec<u8>, SignatureError> {
        let path = self.key_path(name)?;
        fs::read(&path).map_err(|error| not_found_or_io(name, &path, error))
    }

    /// Names of the stored keys, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::KeyIo`] when the directory cannot be
    /// listed. A missing directory holds no keys.
    pub fn list(&self) -> Result<Vec<String>, SignatureError> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(key_io(&self.directory, error)),
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_file())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| is_valid_key_name(name))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Deletes the key stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::KeyNotFound`] when it does not exist.
    pub fn delete(&self, name: &str) -> Result<(), SignatureError> {
        let path = self.key_path(name)?;
        fs::remove_file(&path).map_err(|error| not_found_or_io(name, &path, error))?;
        debug!(target: SIGNATURE_TARGET, name, "public key deleted");
        Ok(())
    }

    fn key_path(&self, name: &str) -> Result<PathBuf, SignatureError> {
        if is_valid_key_name(name) {
            Ok(self.directory.join(name))
        } else {
            Err(SignatureError::InvalidKeyName {
                name: name.to_owned(),
            })
        }
    }
}

fn is_valid_key_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && Path::new(name).file_name().is_some_and(|file| file == name)
}

fn key_io(path: &Path, source: io::Error) -> SignatureError {
    SignatureError::KeyIo {
        path: path.to_path_buf(),
        source: Arc::new(source),
    }
}

fn not_found_or_io(name: &str, path: &Path, error: io::Error) -> SignatureError {
    if error.kind() == io::ErrorKind::NotFound {
        SignatureError::KeyNotFound {
            name: name.to_owned(),
        }
    } else {
        key_io(path, error)
    }
}

/// Decides whether an archive may be installed given its signature.
#[derive(Clone)]
pub struct SignaturePolicy {
    require: bool,
    builtin_key: Option<Vec<u8>>,
    key_ring: Option<PublicKeyRing>,
    trusted_keys: Vec<String>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
}

impl SignaturePolicy {
    /// Policy that accepts every archive.
    #[must_use]
    pub const fn permissive() -> Self {
        Self {
            require: false,
            builtin_key: None,
            key_ring: None,
            trusted_keys: Vec::new(),
            verifier: None,
        }
    }

    /// Policy that requires a signature checked by `verifier`.
    #[must_use]
    pub fn required(verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self {
            require: true,
            verifier: Some(verifier),
            ..Self::permissive()
        }
    }

    /// Builds the policy described by the runtime configuration.
    ///
    /// The key ring lives in the configured directory; `public_key_files`
    /// name the keys in it that are trusted alongside the built-in key.
    #[must_use]
    pub fn from_config(config: &SignatureConfig, verifier: Option<Arc<dyn SignatureVerifier>>) -> Self {
        Self {
            require: config.require,
            builtin_key: None,
            key_ring: config.public_key_directory.as_deref().map(PublicKeyRing::new),
            trusted_keys: config.public_key_files.clone(),
            verifier,
        }
    }

    /// Trusts `key` ahead of every configured key.
    #[must_use]
    pub fn with_builtin_key(mut self, key: Vec<u8>) -> Self {
        self.builtin_key = Some(key);
        self
    }

    /// Trusts the named keys from `key_ring`.
    #[must_use]
    pub fn with_key_ring(mut self, key_ring: PublicKeyRing, trusted_keys: Vec<String>) -> Self {
        self.key_ring = Some(key_ring);
        self.trusted_keys = trusted_keys;
        self
    }

    /// Returns true when unsigned archives are refused.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.require
    }

    /// The configured key ring, if any.
    #[must_use]
    pub const fn key_ring(&self) -> Option<&PublicKeyRing> {
        self.key_ring.as_ref()
    }

    /// Checks `signature` over `archive`.
    ///
    /// Nothing is checked unless signatures are required. Otherwise the
    /// built-in key is tried first, then every trusted key in order; an
    /// unreadable key is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::Missing`] or [`SignatureError::Invalid`].
    pub fn check(&self, archive: &[u8], signature: Option<&[u8]>) -> Result<(), SignatureError> {
        if !self.require {
            return Ok(());
        }
        let Some(provided) = signature else {
            return Err(SignatureError::Missing);
        };
        let Some(verifier) = self.verifier.as_ref() else {
            warn!(target: SIGNATURE_TARGET, "signatures are required but no verifier is installed");
            return Err(SignatureError::Invalid);
        };

        if let Some(key) = &self.builtin_key
            && verifier.verify(key, archive, provided)
        {
            debug!(target: SIGNATURE_TARGET, key = "builtin", "signature verified");
            return Ok(());
        }
        let Some(ring) = &self.key_ring else {
            return Err(SignatureError::Invalid);
        };
        for name in &self.trusted_keys {
            match ring.read(name) {
                Ok(key) if verifier.verify(&key, archive, provided) => {
                    debug!(target: SIGNATURE_TARGET, key = %name, "signature verified");
                    return Ok(());
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(target: SIGNATURE_TARGET, key = %name, %error, "skipping unreadable key");
                }
            }
        }
        Err(SignatureError::Invalid)
    }
}

impl Default for SignaturePolicy {
    fn default() -> Self {
        Self::permissive()
    }
}

impl std::fmt::Debug for SignaturePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignaturePolicy")
            .field("require", &self.require)
            .field("builtin_key", &self.builtin_key.is_some())
            .field("key_ring", &self.key_ring)
            .field("trusted_keys", &self.trusted_keys)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
