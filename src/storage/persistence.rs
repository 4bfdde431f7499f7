//! Snapshot Persistence
//!
//! Snapshots are JSON documents holding a flat projection of the keyspace:
//!
//! ```text
//! {
//!   "entries":     [ { "key": "a", "value": "1", "has_expiration": true }, ... ],
//!   "expirations": [ { "key": "a", "expire_at": "2024-01-01T12:00:05Z" }, ... ]
//! }
//! ```
//!
//! The heap and the by-time index are runtime structures and are never
//! written. Loading a snapshot replays every `(key, expire_at)` pair into a
//! fresh [`ExpirationIndex`](crate::storage::ExpirationIndex).
//!
//! ## Autosave
//!
//! The autosave loop is a Tokio task that periodically writes a snapshot to a
//! fixed path. It is controlled through a single-slot `watch` mailbox: a new
//! interval overwrites any pending one, and dropping the sender stops the
//! loop. A write that is already running always completes first.

use crate::storage::engine::Store;
use crate::storage::expiration::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Serializable copy of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entries: Vec<SnapshotEntry>,
    pub expirations: Vec<SnapshotExpiration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub value: String,
    pub has_expiration: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotExpiration {
    pub key: String,
    pub expire_at: Timestamp,
}

/// Errors from writing or reading snapshots.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("can't write snapshot to '{}': {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("can't read snapshot from '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("can't encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("can't decode snapshot: {0}")]
    Decode(#[source] serde_json::Error),
}

impl Snapshot {
    pub fn to_json(&self) -> Result<Vec<u8>, PersistenceError> {
        serde_json::to_vec_pretty(self).map_err(PersistenceError::Encode)
    }

    pub fn from_json(data: &[u8]) -> Result<Self, PersistenceError> {
        serde_json::from_slice(data).map_err(PersistenceError::Decode)
    }
}

/// Encodes `snapshot` and writes it to `path`, replacing any existing file.
pub async fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), PersistenceError> {
    let data = snapshot.to_json()?;
    tokio::fs::write(path, &data)
        .await
        .map_err(|source| PersistenceError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// Reads and decodes the snapshot at `path`.
pub async fn read_snapshot(path: &Path) -> Result<Snapshot, PersistenceError> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|source| PersistenceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    Snapshot::from_json(&data)
}

/// What an autosave request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosaveStatus {
    Started(Duration),
    Retuned(Duration),
    Stopped,
    AlreadyOff,
}

impl fmt::Display for AutosaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutosaveStatus::Started(interval) => {
                write!(f, "autosave is on, interval {}s", interval.as_secs())
            }
            AutosaveStatus::Retuned(interval) => {
                write!(f, "autosave interval changed to {}s", interval.as_secs())
            }
            AutosaveStatus::Stopped => write!(f, "autosave is off"),
            AutosaveStatus::AlreadyOff => write!(f, "autosave is already off"),
        }
    }
}

/// Control state for the autosave loop, owned by the store.
#[derive(Debug)]
pub struct Autosave {
    path: PathBuf,
    /// Sender half of the running loop's mailbox
    mailbox: Mutex<Option<watch::Sender<Duration>>>,
}

impl Autosave {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            mailbox: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.mailbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Starts, retunes or stops the loop. Must be called inside a Tokio runtime.
    pub(crate) fn configure(&self, store: Weak<Store>, interval: Duration) -> AutosaveStatus {
        let mut mailbox = self.mailbox.lock().unwrap_or_else(PoisonError::into_inner);

        // The loop may have ended on its own (store dropped)
        if mailbox.as_ref().is_some_and(|tx| tx.is_closed()) {
            *mailbox = None;
        }

        match (mailbox.as_ref(), interval.is_zero()) {
            (Some(_), true) => {
                // Dropping the sender ends the loop after any in-flight write
                *mailbox = None;
                AutosaveStatus::Stopped
            }
            (None, true) => AutosaveStatus::AlreadyOff,
            (Some(tx), false) => {
                tx.send_replace(interval);
                AutosaveStatus::Retuned(interval)
            }
            (None, false) => {
                let (tx, rx) = watch::channel(interval);
                tokio::spawn(autosave_loop(store, self.path.clone(), rx));
                *mailbox = Some(tx);
                AutosaveStatus::Started(interval)
            }
        }
    }
}

async fn autosave_loop(store: Weak<Store>, path: PathBuf, mut interval_rx: watch::Receiver<Duration>) {
    let mut interval = *interval_rx.borrow_and_update();
    let mut last_save = Instant::now();
    info!(path = %path.display(), interval_secs = interval.as_secs(), "Autosave started");

    loop {
        tokio::select! {
            biased;

            changed = interval_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = *interval_rx.borrow_and_update();
                if next.is_zero() {
                    break;
                }
                debug!(interval_secs = next.as_secs(), "Autosave interval changed");
                interval = next;
                continue;
            }
            _ = next_deadline(last_save, interval) => {}
        }

        let Some(store) = store.upgrade() else {
            break;
        };
        if let Err(e) = store.save_to(&path).await {
            warn!(error = %e, "Autosave failed");
        }
        last_save = Instant::now();
    }

    info!(path = %path.display(), "Autosave stopped");
}

/// Sleeps until `last_save + interval`. An instant past the clock's range never arrives.
async fn next_deadline(last_save: Instant, interval: Duration) {
    match last_save.checked_add(interval) {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
