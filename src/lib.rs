//! # kvstore - A Networked Key-Value Store with TTL Expiration
//!
//! kvstore is an in-memory string key-value store served over TCP. Keys can
//! be given a time-to-live, the whole store can be snapshotted to and restored
//! from JSON files, and a background loop can autosave it periodically.
//!
//! ## Features
//!
//! - **Simple wire format**: `<length>:<command line>` frames, replies framed the same way
//! - **TTL Support**: second-granularity expirations kept in a min-heap index
//! - **Active Expiry**: a background task removes keys once their deadline passes
//! - **Snapshots**: `save`/`restore` to JSON, plus an adjustable autosave loop
//! - **Async I/O**: Built on Tokio, one task per client connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              kvstore                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │                         │
//! │                                               ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐   │
//! │  │  Netstring  │    │                   Store                      │   │
//! │  │  framing +  │    │  RwLock ─┬─ entries (HashMap)                │   │
//! │  │  tokenizer  │    │          └─ ExpirationIndex (maps + heap)    │   │
//! │  └─────────────┘    └──────────────────────────────────────────────┘   │
//! │                               ▲                      ▲                  │
//! │                               │                      │                  │
//! │                  ┌────────────┴──────┐   ┌───────────┴───────┐          │
//! │                  │ ExpirationWatcher │   │   Autosave loop   │          │
//! │                  │  (Tokio task)     │   │   (Tokio task)    │          │
//! │                  └───────────────────┘   └───────────────────┘          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use kvstore::storage::{Store, start_expiration_watcher};
//! use kvstore::commands::CommandHandler;
//! use kvstore::connection::{handle_connection, ConnectionStats};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(Store::new());
//!
//!     // Start the background expiration watcher
//!     let _watcher = start_expiration_watcher(Arc::clone(&store));
//!
//!     let stats = Arc::new(ConnectionStats::new());
//!     let listener = TcpListener::bind("127.0.0.1:16998").await.unwrap();
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await.unwrap();
//!         let handler = CommandHandler::new(Arc::clone(&store));
//!         let stats = Arc::clone(&stats);
//!
//!         tokio::spawn(handle_connection(stream, addr, handler, stats));
//!     }
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `set key value`
//! - `get key`
//! - `getset key value`
//! - `exist key` / `exists key`
//! - `del key [key ...]`
//! - `ex key seconds`
//! - `save path` / `restore path`
//! - `autosave seconds` (`0` turns it off)
//! - `showall`
//!
//! ## Module Overview
//!
//! - [`protocol`]: length-prefixed framing and the command-line tokenizer
//! - [`storage`]: the store, its expiration index, the watcher and persistence
//! - [`commands`]: the command table and its handlers
//! - [`connection`]: Client connection management
//!
//! ## Design Highlights
//!
//! ### One Lock
//!
//! The map and the expiration index sit behind a single `RwLock`, so a key's
//! TTL flag and its index record always change together. Readers (`get`,
//! `exist`, `showall`, `save`) share the lock; everything else takes it
//! exclusively.
//!
//! ### Active Expiry Only
//!
//! Reads never check deadlines. An expired key stays visible until the next
//! watcher tick removes it, roughly one second later.

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandError, CommandHandler};
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{Command, FrameError, TokenizeError};
pub use storage::{start_expiration_watcher, ExpirationWatcher, Store, StoreConfig, WatcherConfig};

/// The default port kvstore listens on
pub const DEFAULT_PORT: u16 = 16998;

/// The default host kvstore binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of kvstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
