//! Storage Module
//!
//! This module provides the core storage functionality for kvstore: the
//! key-value map, the TTL expiration index, the background watcher that
//! reaps expired keys, and snapshot persistence.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │   RwLock ─┬─ entries:     HashMap<String, Entry>            │
//! │           └─ expirations: ExpirationIndex                   │
//! │                             ├─ by_key  / by_time maps       │
//! │                             └─ PriorityQueue (min-heap)     │
//! └─────────────────────────────────────────────────────────────┘
//!          ▲                                   ▲
//!          │ remove_expired()                  │ snapshot()
//!  ┌───────┴───────────┐             ┌─────────┴─────────┐
//!  │ ExpirationWatcher │             │   Autosave loop   │
//!  │  (Tokio task)     │             │   (Tokio task)    │
//!  └───────────────────┘             └───────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use kvstore::storage::Store;
//! use std::time::Duration;
//!
//! let store = Store::new();
//!
//! store.set("session".to_string(), "token123".to_string());
//! assert!(store.expire("session", Duration::from_secs(3600)));
//! assert_eq!(store.stats().expiring_keys, 1);
//! ```

pub mod engine;
pub mod expiration;
pub mod persistence;
pub mod queue;
pub mod watcher;

// Re-export commonly used types
pub use engine::{Entry, Store, StoreConfig, StoreStats, DEFAULT_AUTOSAVE_PATH};
pub use expiration::{ExpirationIndex, ExpirationRecord, Timestamp};
pub use persistence::{AutosaveStatus, PersistenceError, Snapshot};
pub use queue::{Handle, Prioritized, PriorityQueue};
pub use watcher::{start_expiration_watcher, ExpirationWatcher, WatcherConfig};
