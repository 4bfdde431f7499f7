//! Command Handler Module
//!
//! This module implements the command table for kvstore. It validates a
//! tokenized [`Command`] against the table and runs it against the [`Store`].
//!
//! ## Supported Commands
//!
//! - `set key value` - Set a key, clearing any TTL
//! - `get key` - Get a key's value
//! - `getset key value` - Set a key and return its old value
//! - `exist key` / `exists key` - Check if a key exists
//! - `del key [key ...]` - Delete keys
//! - `ex key seconds` - Set a TTL on an existing key
//! - `save path` - Write a snapshot to a file
//! - `restore path` - Replace the store with a snapshot from a file
//! - `autosave seconds` - Start, retune or stop (`0`) periodic snapshots
//! - `showall` - Dump the store and its expiration index
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  lookup()   │───>│  arity()    │───>│ dispatch()  │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                             Store           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::protocol::Command;
use crate::storage::{PersistenceError, Store};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Reply for commands that succeed without a value.
pub const OK: &str = "OK";

/// How many arguments a command accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
        }
    }
}

/// Every command the store understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Set,
    Get,
    GetSet,
    Exists,
    Del,
    Expire,
    Save,
    Restore,
    Autosave,
    ShowAll,
}

impl CommandKind {
    /// The whole command table.
    pub const ALL: [CommandKind; 10] = [
        CommandKind::Set,
        CommandKind::Get,
        CommandKind::GetSet,
        CommandKind::Exists,
        CommandKind::Del,
        CommandKind::Expire,
        CommandKind::Save,
        CommandKind::Restore,
        CommandKind::Autosave,
        CommandKind::ShowAll,
    ];

    /// Resolves a command name, ignoring ASCII case.
    pub fn lookup(name: &str) -> Option<Self> {
        let kind = match name.to_ascii_lowercase().as_str() {
            "set" => CommandKind::Set,
            "get" => CommandKind::Get,
            "getset" => CommandKind::GetSet,
            "exist" | "exists" => CommandKind::Exists,
            "del" => CommandKind::Del,
            "ex" => CommandKind::Expire,
            "save" => CommandKind::Save,
            "restore" => CommandKind::Restore,
            "autosave" => CommandKind::Autosave,
            "showall" => CommandKind::ShowAll,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandKind::Set => "set",
            CommandKind::Get => "get",
            CommandKind::GetSet => "getset",
            CommandKind::Exists => "exist",
            CommandKind::Del => "del",
            CommandKind::Expire => "ex",
            CommandKind::Save => "save",
            CommandKind::Restore => "restore",
            CommandKind::Autosave => "autosave",
            CommandKind::ShowAll => "showall",
        }
    }

    pub fn arity(self) -> Arity {
        match self {
            CommandKind::Set | CommandKind::GetSet | CommandKind::Expire => Arity::Exact(2),
            CommandKind::Get
            | CommandKind::Exists
            | CommandKind::Save
            | CommandKind::Restore
            | CommandKind::Autosave => Arity::Exact(1),
            CommandKind::Del => Arity::AtLeast(1),
            CommandKind::ShowAll => Arity::Exact(0),
        }
    }
}

/// Errors reported back to the client as a reply payload.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{command}' command: expected {expected}, got {actual}")]
    WrongArity {
        command: &'static str,
        expected: Arity,
        actual: usize,
    },

    #[error("ERR invalid duration '{0}': not an integer")]
    InvalidDuration(String),

    #[error("ERR invalid duration {0}: must not be negative")]
    NegativeDuration(i64),

    #[error("ERR no such key '{0}'")]
    NoSuchKey(String),

    #[error("ERR {0}")]
    Persistence(#[from] PersistenceError),
}

/// Runs commands against a shared [`Store`].
#[derive(Debug, Clone)]
pub struct CommandHandler {
    store: Arc<Store>,
}

impl CommandHandler {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Validates and executes a command.
    ///
    /// # Returns
    ///
    /// The reply text on success, or a [`CommandError`] whose `Display` is the
    /// error reply.
    pub async fn execute(&self, command: Command) -> Result<String, CommandError> {
        let kind = CommandKind::lookup(&command.name)
            .ok_or_else(|| CommandError::UnknownCommand(command.name.clone()))?;

        let expected = kind.arity();
        if !expected.accepts(command.args.len()) {
            return Err(CommandError::WrongArity {
                command: kind.name(),
                expected,
                actual: command.args.len(),
            });
        }

        debug!(command = kind.name(), args = command.args.len(), "Executing command");
        self.dispatch(kind, &command.args).await
    }

    /// Dispatches a validated command to its handler.
    async fn dispatch(&self, kind: CommandKind, args: &[String]) -> Result<String, CommandError> {
        match kind {
            CommandKind::Set => Ok(self.cmd_set(args)),
            CommandKind::Get => self.cmd_get(args),
            CommandKind::GetSet => self.cmd_getset(args),
            CommandKind::Exists => Ok(self.cmd_exists(args)),
            CommandKind::Del => Ok(self.cmd_del(args)),
            CommandKind::Expire => self.cmd_expire(args),
            CommandKind::Save => self.cmd_save(args).await,
            CommandKind::Restore => self.cmd_restore(args).await,
            CommandKind::Autosave => self.cmd_autosave(args),
            CommandKind::ShowAll => Ok(self.store.dump()),
        }
    }

    /// set key value
    fn cmd_set(&self, args: &[String]) -> String {
        self.store.set(args[0].clone(), args[1].clone());
        OK.to_string()
    }

    /// get key
    fn cmd_get(&self, args: &[String]) -> Result<String, CommandError> {
        self.store
            .get(&args[0])
            .ok_or_else(|| CommandError::NoSuchKey(args[0].clone()))
    }

    /// getset key value
    ///
    /// The new value is written even when the key was missing.
    fn cmd_getset(&self, args: &[String]) -> Result<String, CommandError> {
        self.store
            .getset(args[0].clone(), args[1].clone())
            .ok_or_else(|| CommandError::NoSuchKey(args[0].clone()))
    }

    /// exist key
    fn cmd_exists(&self, args: &[String]) -> String {
        self.store.exists(&args[0]).to_string()
    }

    /// del key [key ...]
    fn cmd_del(&self, args: &[String]) -> String {
        self.store.delete_many(args).to_string()
    }

    /// ex key seconds
    fn cmd_expire(&self, args: &[String]) -> Result<String, CommandError> {
        let ttl = parse_seconds(&args[1])?;
        Ok(self.store.expire(&args[0], ttl).to_string())
    }

    /// save path
    async fn cmd_save(&self, args: &[String]) -> Result<String, CommandError> {
        self.store.save_to(Path::new(&args[0])).await?;
        Ok(OK.to_string())
    }

    /// restore path
    async fn cmd_restore(&self, args: &[String]) -> Result<String, CommandError> {
        self.store.restore_from(Path::new(&args[0])).await?;
        Ok(OK.to_string())
    }

    /// autosave seconds
    fn cmd_autosave(&self, args: &[String]) -> Result<String, CommandError> {
        let interval = parse_seconds(&args[0])?;
        Ok(self.store.autosave(interval).to_string())
    }
}

/// Parses a non-negative whole number of seconds.
fn parse_seconds(raw: &str) -> Result<Duration, CommandError> {
    let seconds: i64 = raw
        .parse()
        .map_err(|_| CommandError::InvalidDuration(raw.to_string()))?;
    let seconds = u64::try_from(seconds).map_err(|_| CommandError::NegativeDuration(seconds))?;
    Ok(Duration::from_secs(seconds))
}
