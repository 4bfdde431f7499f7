//! Expiration Index
//!
//! Tracks which keys carry a TTL and when they are due. Three structures are
//! kept in lockstep:
//!
//! ```text
//!   by_key:  "session" ──┐
//!            "token"   ──┼──► Handle ──► ExpirationRecord { expire_at: 12:00:05,
//!                        │                                 keys: {session, token} }
//!   by_time: 12:00:05 ───┘                      ▲
//!                                               │ ordered by expire_at
//!   queue:   PriorityQueue<ExpirationRecord> ───┘
//! ```
//!
//! Expiration instants are truncated to whole seconds, so every key that
//! expires in the same second shares one record. The heap therefore grows with
//! the number of distinct instants rather than the number of keys.
//!
//! The index does no locking of its own. It lives inside the store's keyspace
//! and is only touched while the keyspace lock is held.

use crate::storage::queue::{Handle, Prioritized, PriorityQueue};
use chrono::{DateTime, SubsecRound, Utc};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Wall-clock instant used for expirations.
pub type Timestamp = DateTime<Utc>;

/// Drops the sub-second part of a timestamp.
#[inline]
pub fn truncate_to_second(at: Timestamp) -> Timestamp {
    at.trunc_subsecs(0)
}

/// One scheduled expiration instant and every key due at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpirationRecord {
    pub expire_at: Timestamp,
    pub keys: BTreeSet<String>,
}

impl Prioritized for ExpirationRecord {
    type Priority = Timestamp;

    fn priority(&self) -> Timestamp {
        self.expire_at
    }
}

/// Key → expiration lookup plus a time-ordered queue of pending expirations.
#[derive(Debug, Default)]
pub struct ExpirationIndex {
    by_key: HashMap<String, Handle>,
    by_time: HashMap<Timestamp, Handle>,
    queue: PriorityQueue<ExpirationRecord>,
}

impl ExpirationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `key` to expire at `expire_at` (truncated to the second).
    ///
    /// Any previous expiration for the key is fully unlinked first, so a key
    /// never has more than one live record.
    pub fn set_expiration(&mut self, key: &str, expire_at: Timestamp) {
        let expire_at = truncate_to_second(expire_at);
        self.clear_expiration(key);

        let handle = match self.by_time.get(&expire_at) {
            Some(&handle) => {
                if let Some(record) = self.queue.get_mut(handle) {
                    record.keys.insert(key.to_string());
                }
                handle
            }
            None => {
                let record = ExpirationRecord {
                    expire_at,
                    keys: BTreeSet::from([key.to_string()]),
                };
                let handle = self.queue.push(record);
                self.by_time.insert(expire_at, handle);
                handle
            }
        };

        self.by_key.insert(key.to_string(), handle);
    }

    /// Cancels the expiration of `key`.
    ///
    /// Returns `false` if the key had none.
    pub fn clear_expiration(&mut self, key: &str) -> bool {
        let Some(handle) = self.by_key.remove(key) else {
            return false;
        };

        let emptied = match self.queue.get_mut(handle) {
            Some(record) => {
                record.keys.remove(key);
                record.keys.is_empty().then_some(record.expire_at)
            }
            None => None,
        };

        if let Some(expire_at) = emptied {
            self.by_time.remove(&expire_at);
            self.queue.remove(handle);
        }

        true
    }

    /// Removes and returns every key whose expiration is strictly before `as_of`.
    ///
    /// Key order is unspecified.
    pub fn pull_expired(&mut self, as_of: Timestamp) -> Vec<String> {
        let mut expired = Vec::new();

        while let Some((_, record)) = self.queue.peek_min() {
            if record.expire_at >= as_of {
                break;
            }

            let Some(record) = self.queue.pop_min() else {
                break;
            };
            self.by_time.remove(&record.expire_at);

            for key in record.keys {
                self.by_key.remove(&key);
                expired.push(key);
            }
        }

        expired
    }

    /// The expiration instant of `key`, if it has one.
    pub fn expiration_of(&self, key: &str) -> Option<Timestamp> {
        let handle = self.by_key.get(key)?;
        self.queue.get(*handle).map(|record| record.expire_at)
    }

    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Number of keys with a pending expiration.
    #[inline]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Number of distinct expiration instants (heap size).
    #[inline]
    pub fn instants(&self) -> usize {
        self.queue.len()
    }

    /// Flattened `(key, expire_at)` pairs, sorted by key.
    pub fn pairs(&self) -> Vec<(String, Timestamp)> {
        let mut pairs: Vec<_> = self
            .by_key
            .iter()
            .filter_map(|(key, handle)| {
                self.queue
                    .get(*handle)
                    .map(|record| (key.clone(), record.expire_at))
            })
            .collect();
        pairs.sort();
        pairs
    }
}

impl fmt::Display for ExpirationIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "by key:")?;
        for (key, expire_at) in self.pairs() {
            writeln!(f, "  {} : {}", key, expire_at.to_rfc3339())?;
        }

        writeln!(f, "by time:")?;
        let mut instants: Vec<_> = self.by_time.iter().collect();
        instants.sort_by_key(|(expire_at, _)| **expire_at);
        for (expire_at, handle) in instants {
            if let Some(record) = self.queue.get(*handle) {
                let keys: Vec<&str> = record.keys.iter().map(String::as_str).collect();
                writeln!(f, "  {} : [{}]", expire_at.to_rfc3339(), keys.join(", "))?;
            }
        }

        writeln!(f, "heap:")?;
        for (position, record) in self.queue.iter() {
            writeln!(f, "  position: {}; expire_at: {}", position, record.expire_at.to_rfc3339())?;
        }

        Ok(())
    }
}
