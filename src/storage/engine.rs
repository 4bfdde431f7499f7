//! Thread-Safe Store with TTL Support
//!
//! This module implements the core store for kvstore: a string-to-string map
//! plus an [`ExpirationIndex`] recording which keys carry a TTL.
//!
//! ## Design Decisions
//!
//! 1. **One lock, one unit of consistency**: the map and the expiration index
//!    live together in a [`Keyspace`] behind a single `RwLock`. Every mutation
//!    updates both inside the same critical section, so no reader ever sees an
//!    entry flagged as expiring without a matching index record (or the
//!    reverse).
//! 2. **Active expiry only**: expired keys are removed by the background
//!    watcher (see [`crate::storage::watcher`]). Reads never mutate.
//! 3. **I/O outside the lock**: `save`/`restore` copy or build the keyspace
//!    without holding the lock across disk access.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │                 RwLock<Keyspace>                      │  │
//! │  │   entries: HashMap<String, Entry>                     │  │
//! │  │   expirations: ExpirationIndex (by key, by time, heap)│  │
//! │  └───────────────────────────────────────────────────────┘  │
//! │        ▲ read: get / exists / showall / save                │
//! │        ▲ write: set / getset / del / ex / restore / reaper  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::storage::expiration::{truncate_to_second, ExpirationIndex, Timestamp};
use crate::storage::persistence::{
    self, Autosave, AutosaveStatus, PersistenceError, Snapshot, SnapshotEntry, SnapshotExpiration,
};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default file the autosave loop writes to.
pub const DEFAULT_AUTOSAVE_PATH: &str = "autosave.json";

/// One stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The actual value stored
    pub value: String,
    /// True while the key has a live record in the expiration index
    pub has_expiration: bool,
}

impl Entry {
    /// Creates a new entry without expiry.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            has_expiration: false,
        }
    }
}

/// The map and its expiration index, always locked together.
#[derive(Debug, Default)]
pub(crate) struct Keyspace {
    entries: HashMap<String, Entry>,
    expirations: ExpirationIndex,
}

impl Keyspace {
    /// Upserts `key` and drops any pending expiration. Returns the old value.
    fn put(&mut self, key: String, value: String) -> Option<String> {
        self.expirations.clear_expiration(&key);
        self.entries
            .insert(key, Entry::new(value))
            .map(|old| old.value)
    }

    fn remove(&mut self, key: &str) -> bool {
        if self.entries.remove(key).is_some() {
            self.expirations.clear_expiration(key);
            true
        } else {
            false
        }
    }

    fn schedule(&mut self, key: &str, expire_at: Timestamp) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.has_expiration = true;
                self.expirations.set_expiration(key, expire_at);
                true
            }
            None => false,
        }
    }

    fn to_snapshot(&self) -> Snapshot {
        let mut entries: Vec<SnapshotEntry> = self
            .entries
            .iter()
            .map(|(key, entry)| SnapshotEntry {
                key: key.clone(),
                value: entry.value.clone(),
                has_expiration: entry.has_expiration,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        let expirations = self
            .expirations
            .pairs()
            .into_iter()
            .map(|(key, expire_at)| SnapshotExpiration { key, expire_at })
            .collect();

        Snapshot {
            entries,
            expirations,
        }
    }

    /// Rebuilds a keyspace, replaying every expiration into a fresh index.
    ///
    /// The expiration list is authoritative: an entry ends up flagged as
    /// expiring exactly when a pair for it was replayed.
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut keyspace = Keyspace::default();

        for SnapshotEntry { key, value, .. } in snapshot.entries {
            keyspace.entries.insert(key, Entry::new(value));
        }

        for SnapshotExpiration { key, expire_at } in snapshot.expirations {
            if !keyspace.schedule(&key, expire_at) {
                warn!(key = %key, "Snapshot expiration refers to a missing key, skipping");
            }
        }

        keyspace
    }
}

/// Configuration for a [`Store`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Where the autosave loop writes its snapshots
    pub autosave_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            autosave_path: PathBuf::from(DEFAULT_AUTOSAVE_PATH),
        }
    }
}

/// Point-in-time counters for a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub keys: usize,
    pub expiring_keys: usize,
    pub expiration_instants: usize,
    pub expired_total: u64,
}

/// The shared key-value store.
///
/// Wrap it in an `Arc` and hand a clone to every connection task, the
/// expiration watcher and the autosave loop.
///
/// # Example
///
/// ```
/// use kvstore::storage::Store;
/// use std::time::Duration;
///
/// let store = Store::new();
///
/// store.set("name".to_string(), "Ariz".to_string());
/// assert_eq!(store.get("name"), Some("Ariz".to_string()));
///
/// assert!(store.expire("name", Duration::from_secs(60)));
/// assert!(store.expiration_of("name").is_some());
/// ```
pub struct Store {
    keyspace: RwLock<Keyspace>,

    /// Total number of keys removed by the watcher
    expired_count: AtomicU64,

    autosave: Autosave,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("keys", &self.len())
            .field("expired_count", &self.expired_count.load(Ordering::Relaxed))
            .field("autosave", &self.autosave)
            .finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates an empty store with default settings.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            keyspace: RwLock::new(Keyspace::default()),
            expired_count: AtomicU64::new(0),
            autosave: Autosave::new(config.autosave_path),
        }
    }

    // Critical sections never leave the keyspace half-updated before a
    // possible panic point, so a poisoned lock still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, Keyspace> {
        self.keyspace.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Keyspace> {
        self.keyspace.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets a key-value pair and clears any expiration on the key.
    pub fn set(&self, key: String, value: String) {
        self.write().put(key, value);
    }

    /// Gets the value for a key.
    pub fn get(&self, key: &str) -> Option<String> {
        self.read().entries.get(key).map(|entry| entry.value.clone())
    }

    /// Writes `value` and returns the previous value, atomically.
    ///
    /// Like [`Store::set`], this clears any expiration on the key.
    pub fn getset(&self, key: String, value: String) -> Option<String> {
        self.write().put(key, value)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.read().entries.contains_key(key)
    }

    /// Deletes every listed key under one lock.
    ///
    /// # Returns
    ///
    /// Returns the number of keys that were deleted.
    pub fn delete_many<K: AsRef<str>>(&self, keys: &[K]) -> usize {
        let mut keyspace = self.write();
        let mut deleted = 0;
        for key in keys {
            if keyspace.remove(key.as_ref()) {
                deleted += 1;
            }
        }
        deleted
    }

    /// Schedules `key` to expire `ttl` from now, truncated to the second.
    ///
    /// Returns `false` (and schedules nothing) if the key doesn't exist.
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        let delta = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let expire_at = Utc::now()
            .checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.expire_at(key, expire_at)
    }

    /// Schedules `key` to expire at an absolute instant.
    pub fn expire_at(&self, key: &str, expire_at: Timestamp) -> bool {
        self.write().schedule(key, truncate_to_second(expire_at))
    }

    /// The scheduled expiration of `key`, if any.
    pub fn expiration_of(&self, key: &str) -> Option<Timestamp> {
        self.read().expirations.expiration_of(key)
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        let keyspace = self.read();
        StoreStats {
            keys: keyspace.entries.len(),
            expiring_keys: keyspace.expirations.len(),
            expiration_instants: keyspace.expirations.instants(),
            expired_total: self.expired_count.load(Ordering::Relaxed),
        }
    }

    /// Removes every key whose expiration is strictly before `now`.
    ///
    /// Called periodically by the expiration watcher.
    ///
    /// # Returns
    ///
    /// Returns the number of keys removed.
    pub fn remove_expired(&self, now: Timestamp) -> usize {
        let mut keyspace = self.write();
        let due = keyspace.expirations.pull_expired(now);

        let mut removed = 0;
        for key in &due {
            // A key rewritten by set/getset lost both its flag and its record,
            // so it can only show up here through a stale pull.
            if keyspace.entries.get(key).is_some_and(|entry| entry.has_expiration) {
                keyspace.entries.remove(key);
                removed += 1;
            }
        }
        drop(keyspace);

        if removed > 0 {
            self.expired_count
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(expired = removed, "Removed expired keys");
        }

        removed
    }

    /// Copies the whole keyspace into a serializable snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.read().to_snapshot()
    }

    /// Replaces the whole keyspace with the contents of `snapshot`.
    pub fn restore(&self, snapshot: Snapshot) {
        let rebuilt = Keyspace::from_snapshot(snapshot);
        *self.write() = rebuilt;
    }

    /// Writes a snapshot of the store to `path`.
    ///
    /// The lock is only held while copying the keyspace.
    pub async fn save_to(&self, path: &Path) -> Result<(), PersistenceError> {
        let snapshot = self.snapshot();
        persistence::write_snapshot(path, &snapshot).await?;
        info!(path = %path.display(), keys = snapshot.entries.len(), "Snapshot saved");
        Ok(())
    }

    /// Replaces the store with the snapshot stored at `path`.
    ///
    /// On any read or decode error the store is left untouched.
    pub async fn restore_from(&self, path: &Path) -> Result<(), PersistenceError> {
        let snapshot = persistence::read_snapshot(path).await?;
        let keys = snapshot.entries.len();
        self.restore(snapshot);
        info!(path = %path.display(), keys, "Snapshot restored");
        Ok(())
    }

    /// Starts, retunes or stops (`interval == 0`) the autosave loop.
    pub fn autosave(self: &Arc<Self>, interval: Duration) -> AutosaveStatus {
        self.autosave.configure(Arc::downgrade(self), interval)
    }

    /// Whether an autosave loop is currently running.
    pub fn is_autosaving(&self) -> bool {
        self.autosave.is_running()
    }

    /// Human-readable dump of every entry and the expiration index.
    pub fn dump(&self) -> String {
        let keyspace = self.read();

        let mut keys: Vec<&String> = keyspace.entries.keys().collect();
        keys.sort();

        let mut out = String::from("data store:\n");
        for key in keys {
            if let Some(entry) = keyspace.entries.get(key) {
                let _ = writeln!(
                    out,
                    "  {{{} : <value: {} | has_expiration: {}>}}",
                    key, entry.value, entry.has_expiration
                );
            }
        }

        out.push_str("expirations:\n");
        let _ = write!(out, "{}", keyspace.expirations);
        out
    }
}
