//! Services the host exposes back to a plugin.
//!
//! Both traits return [`RemoteError`] so that sentinel kinds such as
//! [`RemoteError::NoRows`] survive the trip across the process boundary.

use hookwire_bridge::RemoteError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::manifest::ConfigSetting;

/// Options for [`HostApi::kv_set_with_options`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KvSetOptions {
    /// Only write when the stored value equals `old_value`.
    #[serde(default)]
    pub atomic: bool,
    /// Expected current value for atomic writes; `None` means "absent".
    #[serde(default)]
    pub old_value: Option<Vec<u8>>,
    /// Seconds until the entry expires; zero keeps it forever.
    #[serde(default)]
    pub expire_in_seconds: i64,
}

/// Invalid combinations of [`KvSetOptions`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvOptionsError {
    /// An old value was supplied for a non-atomic write.
    #[error("old value given for a non-atomic set")]
    OldValueWithoutAtomic,
    /// The expiry is negative.
    #[error("negative expiry: {seconds}s")]
    NegativeExpiry {
        /// Offending expiry.
        seconds: i64,
    },
}

impl KvSetOptions {
    /// Atomic write guarded by `old_value`.
    #[must_use]
    pub const fn compare(old_value: Option<Vec<u8>>) -> Self {
        Self {
            atomic: true,
            old_value,
            expire_in_seconds: 0,
        }
    }

    /// Sets the expiry.
    #[must_use]
    pub const fn with_expiry(mut self, seconds: i64) -> Self {
        self.expire_in_seconds = seconds;
        self
    }

    /// Checks the options are coherent.
    ///
    /// # Errors
    ///
    /// Returns a [`KvOptionsError`] describing the first problem found.
    pub const fn validate(&self) -> Result<(), KvOptionsError> {
        if !self.atomic && self.old_value.is_some() {
            return Err(KvOptionsError::OldValueWithoutAtomic);
        }
        if self.expire_in_seconds < 0 {
            return Err(KvOptionsError::NegativeExpiry {
                seconds: self.expire_in_seconds,
            });
        }
        Ok(())
    }
}

/// Severity of a plugin log line.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    /// Debug detail.
    Debug,
    /// Informational.
    Info,
    /// Something unexpected.
    Warn,
    /// A failure.
    Error,
}

/// Host services available to an activated plugin.
///
/// Key-value operations are namespaced to the calling plugin by the host.
pub trait HostApi: Send + Sync {
    /// Writes or deletes (`value = None`) an entry.
    ///
    /// Returns whether the write happened; atomic writes return `false` when
    /// the precondition does not hold.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid options or store failures.
    fn kv_set_with_options(
        &self,
        key: &str,
        value: Option<&[u8]>,
        options: &KvSetOptions,
    ) -> Result<bool, RemoteError>;

    /// Writes an entry unconditionally.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures.
    fn kv_set(&self, key: &str, value: &[u8]) -> Result<(), RemoteError> {
        self.kv_set_with_options(key, Some(value), &KvSetOptions::default())
            .map(|_| ())
    }

    /// Writes `new` only if the stored value equals `old` (`None` = absent).
    ///
    /// # Errors
    ///
    /// Returns an error for store failures.
    fn kv_compare_and_set(
        &self,
        key: &str,
        old: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, RemoteError> {
        let options = KvSetOptions::compare(old.map(<[u8]>::to_vec));
        self.kv_set_with_options(key, Some(new), &options)
    }

    /// Deletes the entry only if it currently equals `old`.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures.
    fn kv_compare_and_delete(&self, key: &str, old: &[u8]) -> Result<bool, RemoteError> {
        let options = KvSetOptions::compare(Some(old.to_vec()));
        self.kv_set_with_options(key, None, &options)
    }

    /// Reads an entry.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures.
    fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError>;

    /// Deletes an entry.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures.
    fn kv_delete(&self, key: &str) -> Result<(), RemoteError>;

    /// Deletes every entry of the calling plugin.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures.
    fn kv_delete_all(&self) -> Result<(), RemoteError>;

    /// Lists keys in order, `per_page` at a time.
    ///
    /// # Errors
    ///
    /// Returns an error for store failures.
    fn kv_list(&self, page: u32, per_page: u32) -> Result<Vec<String>, RemoteError>;

    /// Returns the plugin's stored configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration store fails.
    fn load_configuration(&self) -> Result<Vec<ConfigSetting>, RemoteError>;

    /// Writes a line to the host log.
    ///
    /// # Errors
    ///
    /// Returns an error when the host cannot be reached.
    fn log(&self, level: LogLevel, message: &str) -> Result<(), RemoteError>;
}

/// A result row keyed by column name.
pub type Row = Map<String, Value>;

/// Outcome of a statement that modifies data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecResult {
    /// Rows changed by the statement.
    pub rows_affected: i64,
    /// Identifier generated by an insert, when the backend reports one.
    #[serde(default)]
    pub last_insert_id: Option<i64>,
}

/// Data-access driver exposed to plugins.
pub trait Driver: Send + Sync {
    /// Runs a query and returns its rows.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NoRows`] and the other sentinel kinds where the
    /// backend reports them.
    fn query(&self, statement: &str, args: &[Value]) -> Result<Vec<Row>, RemoteError>;

    /// Runs a statement that modifies data.
    ///
    /// # Errors
    ///
    /// Returns the backend's failure.
    fn exec(&self, statement: &str, args: &[Value]) -> Result<ExecResult, RemoteError>;
}
