//! Command Handler Module
//!
//! This module implements the command processing layer for kvstore.
//! It receives tokenized commands, validates them against the command table,
//! executes them against the store, and returns the reply text.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ Frame + Tokens  │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Lookup       │
//! │  - Validate     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │     Store       │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `set`, `get`, `getset`, `exist`/`exists`, `del`
//! - `ex`
//! - `save`, `restore`, `autosave`
//! - `showall`

pub mod handler;

// Re-export the main command handler
pub use handler::{Arity, CommandError, CommandHandler, CommandKind, OK};
