//! Per-plugin key-value storage.
//!
//! Every operation is namespaced by plugin id, so one plugin can never see
//! or clobber another's entries. Entries may carry an expiry; expired
//! entries behave as absent until [`KeyValueStore::delete_all_expired`]
//! purges them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use hookwire_plugins::api::{KvOptionsError, KvSetOptions};
use thiserror::Error;

/// Longest accepted key, in characters.
pub const MAX_KEY_LENGTH: usize = 150;

/// Errors raised by key-value stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvError {
    /// The key is empty or too long.
    #[error("invalid key '{key}': keys must be 1 to {MAX_KEY_LENGTH} characters")]
    InvalidKey {
        /// Offending key.
        key: String,
    },
    /// The set options are contradictory.
    #[error(transparent)]
    InvalidOptions(#[from] KvOptionsError),
    /// The backing store failed.
    #[error("key-value store failure: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },
}

/// Storage contract for plugin key-value data.
pub trait KeyValueStore: Send + Sync {
    /// Writes (`Some`) or deletes (`None`) a value.
    ///
    /// Atomic writes compare the current value with `options.old_value`
    /// first and return `Ok(false)` without writing when they differ.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] for invalid keys or options.
    fn set(
        &self,
        plugin_id: &str,
        key: &str,
        value: Option<&[u8]>,
        options: &KvSetOptions,
    ) -> Result<bool, KvError>;

    /// Reads a live value.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when the store fails.
    fn get(&self, plugin_id: &str, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    /// Deletes a value.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when the store fails.
    fn delete(&self, plugin_id: &str, key: &str) -> Result<(), KvError>;

    /// Deletes all of a plugin's values.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when the store fails.
    fn delete_all(&self, plugin_id: &str) -> Result<(), KvError>;

    /// Lists live keys in ascending order, one page at a time.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when the store fails.
    fn list(&self, plugin_id: &str, page: u32, per_page: u32) -> Result<Vec<String>, KvError>;

    /// Purges every expired entry and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] when the store fails.
    fn delete_all_expired(&self) -> Result<usize, KvError>;
}

/// Source of wall-clock time, replaceable in tests.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> SystemTime;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<SystemTime>,
}

impl Entry {
    fn is_live(&self, now: SystemTime) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

type Namespace = BTreeMap<String, Entry>;

/// In-memory [`KeyValueStore`].
pub struct MemoryKeyValueStore {
    namespaces: Mutex<HashMap<String, Namespace>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl MemoryKeyValueStore {
    /// Creates an empty store using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store reading time from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            namespaces: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Namespace>> {
        self.namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for MemoryKeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeyValueStore").finish_non_exhaustive()
    }
}

fn check_key(key: &str) -> Result<(), KvError> {
    let length = key.chars().count();
    if length == 0 || length > MAX_KEY_LENGTH {
        return Err(KvError::InvalidKey {
            key: key.to_owned(),
        });
    }
    Ok(())
}

fn expiry(now: SystemTime, seconds: i64) -> Option<SystemTime> {
    u64::try_from(seconds)
        .ok()
        .filter(|secs| *secs > 0)
        .and_then(|secs| now.checked_add(Duration::from_secs(secs)))
}

impl KeyValueStore for MemoryKeyValueStore {
    fn set(
        &self,
        plugin_id: &str,
        key: &str,
        value: Option<&[u8]>,
        options: &KvSetOptions,
    ) -> Result<bool, KvError> {
        check_key(key)?;
        options.validate()?;
        let now = self.clock.now();
        let mut namespaces = self.lock();
        let namespace = namespaces.entry(plugin_id.to_owned()).or_default();

        if options.atomic {
            let current = namespace
                .get(key)
                .filter(|entry| entry.is_live(now))
                .map(|entry| entry.value.as_slice());
            if current != options.old_value.as_deref() {
                return Ok(false);
            }
        }

        match value {
            Some(bytes) => {
                namespace.insert(
                    key.to_owned(),
                    Entry {
                        value: bytes.to_vec(),
                        expires_at: expiry(now, options.expire_in_seconds),
                    },
                );
            }
            None => {
                namespace.remove(key);
            }
        }
        Ok(true)
    }

    fn get(&self, plugin_id: &str, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        check_key(key)?;
        let now = self.clock.now();
        Ok(self
            .lock()
            .get(plugin_id)
            .and_then(|namespace| namespace.get(key))
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    fn delete(&self, plugin_id: &str, key: &str) -> Result<(), KvError> {
        check_key(key)?;
        if let Some(namespace) = self.lock().get_mut(plugin_id) {
            namespace.remove(key);
        }
        Ok(())
    }

    fn delete_all(&self, plugin_id: &str) -> Result<(), KvError> {
        self.lock().remove(plugin_id);
        Ok(())
    }

    fn list(&self, plugin_id: &str, page: u32, per_page: u32) -> Result<Vec<String>, KvError> {
        let now = self.clock.now();
        let page_size = usize::try_from(per_page).unwrap_or(usize::MAX);
        let skip = usize::try_from(page)
            .unwrap_or(usize::MAX)
            .saturating_mul(page_size);
        Ok(self
            .lock()
            .get(plugin_id)
            .map(|namespace| {
                namespace
                    .iter()
                    .filter(|(_, entry)| entry.is_live(now))
                    .skip(skip)
                    .take(page_size)
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn delete_all_expired(&self) -> Result<usize, KvError> {
        let now = self.clock.now();
        let mut removed = 0;
        for namespace in self.lock().values_mut() {
            let before = namespace.len();
            namespace.retain(|_, entry| entry.is_live(now));
            removed += before - namespace.len();
        }
        Ok(removed)
    }
}
