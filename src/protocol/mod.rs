//! Wire Protocol Implementation
//!
//! Requests and responses travel as length-prefixed frames whose payload is a
//! plain text command line.
//!
//! ## Overview
//!
//! ```text
//! bytes ──> netstring::parse_frame ──> UTF-8 text ──> tokenizer::parse_command ──> Command
//! reply ──> netstring::encode_frame ──> bytes
//! ```
//!
//! ## Modules
//!
//! - `netstring`: `<length>:<payload>` framing (no trailing comma)
//! - `tokenizer`: splits a command line into a name and arguments
//!
//! ## Example
//!
//! ```
//! use kvstore::protocol::{encode_frame, parse_command, parse_frame};
//!
//! let (payload, _) = parse_frame(b"13:set key 'a b'").unwrap().unwrap();
//! let command = parse_command(std::str::from_utf8(&payload).unwrap()).unwrap();
//! assert_eq!(command.args, vec!["key", "a b"]);
//!
//! assert_eq!(&encode_frame(b"OK")[..], b"2:OK");
//! ```

pub mod netstring;
pub mod tokenizer;

// Re-export commonly used types for convenience
pub use netstring::{
    encode_frame, encode_frame_into, parse_frame, FrameError, FrameResult, MAX_FRAME_SIZE,
};
pub use tokenizer::{parse_command, tokenize, Command, TokenizeError};
