//! Background Expiration Watcher
//!
//! This module implements the background task that removes keys whose TTL
//! has elapsed. Reads never check expiry themselves, so this task is the only
//! thing that reclaims expired keys.
//!
//! ## Design
//!
//! The watcher runs as a Tokio task and on every tick:
//! 1. Captures the current wall-clock time
//! 2. Pulls every due key out of the expiration index
//! 3. Deletes those keys that still exist and are still flagged as expiring
//!
//! Steps 2 and 3 happen under one exclusive lock (see
//! [`Store::remove_expired`]), so a client write can never slip in between.

use crate::storage::Store;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

/// Configuration for the expiration watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Interval between sweeps (default: 1s)
    pub interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

/// A handle to the running expiration watcher.
///
/// When this handle is dropped, the watcher task will be stopped.
#[derive(Debug)]
pub struct ExpirationWatcher {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirationWatcher {
    /// Starts the expiration watcher as a background task.
    ///
    /// # Example
    ///
    /// ```
    /// use kvstore::storage::{ExpirationWatcher, Store, WatcherConfig};
    /// use std::sync::Arc;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let store = Arc::new(Store::new());
    ///     let watcher = ExpirationWatcher::start(Arc::clone(&store), WatcherConfig::default());
    ///
    ///     store.set("k".to_string(), "v".to_string());
    ///     assert!(store.exists("k"));
    ///
    ///     // Dropping the watcher stops it
    ///     drop(watcher);
    /// }
    /// ```
    pub fn start(store: Arc<Store>, config: WatcherConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(watcher_loop(store, config, shutdown_rx));

        info!("Expiration watcher started");

        Self { shutdown_tx }
    }

    /// Stops the expiration watcher.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!("Expiration watcher stopped");
        }
    }
}

impl Drop for ExpirationWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main watcher loop.
async fn watcher_loop(store: Arc<Store>, config: WatcherConfig, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiration watcher received shutdown signal");
                    return;
                }
            }
        }

        let expired = store.remove_expired(Utc::now());
        trace!(expired, keys_remaining = store.len(), "Expiration sweep finished");
    }
}

/// Starts the expiration watcher with default configuration.
pub fn start_expiration_watcher(store: Arc<Store>) -> ExpirationWatcher {
    ExpirationWatcher::start(store, WatcherConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> WatcherConfig {
        WatcherConfig {
            interval: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_watcher_removes_expired_keys() {
        let store = Arc::new(Store::new());
        let past = Utc::now() - chrono::TimeDelta::seconds(2);

        for i in 0..10 {
            let key = format!("key{}", i);
            store.set(key.clone(), "value".to_string());
            store.expire_at(&key, past);
        }
        store.set("persistent".to_string(), "value".to_string());
        assert_eq!(store.len(), 11);

        let _watcher = ExpirationWatcher::start(Arc::clone(&store), fast());
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(store.len(), 1);
        assert!(store.exists("persistent"));
        assert_eq!(store.stats().expired_total, 10);
    }

    #[tokio::test]
    async fn test_zero_ttl_gone_after_next_tick() {
        let store = Arc::new(Store::new());
        store.set("a".to_string(), "1".to_string());
        assert!(store.expire("a", Duration::ZERO));

        let _watcher = ExpirationWatcher::start(Arc::clone(&store), WatcherConfig::default());

        // Truncation puts the deadline at or before now, so one full second suffices
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(!store.exists("a"));
    }

    #[tokio::test]
    async fn test_rewritten_key_survives() {
        let store = Arc::new(Store::new());
        store.set("k".to_string(), "old".to_string());
        store.expire_at("k", Utc::now() - chrono::TimeDelta::seconds(1));
        store.set("k".to_string(), "new".to_string());

        let _watcher = ExpirationWatcher::start(Arc::clone(&store), fast());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.get("k"), Some("new".to_string()));
    }

    #[tokio::test]
    async fn test_watcher_stops_on_drop() {
        let store = Arc::new(Store::new());

        {
            let _watcher = ExpirationWatcher::start(Arc::clone(&store), fast());
            tokio::time::sleep(Duration::from_millis(50)).await;
            // Watcher is dropped here
        }

        store.set("key".to_string(), "value".to_string());
        store.expire_at("key", Utc::now() - chrono::TimeDelta::seconds(1));

        tokio::time::sleep(Duration::from_millis(100)).await;

        // No sweeper left and reads don't expire lazily
        assert!(store.exists("key"));
    }
}
