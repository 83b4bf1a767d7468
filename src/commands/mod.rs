//! Command Module
//!
//! This module implements the command processing layer. It maps command
//! names to handlers, and the handlers execute against the keyspace and
//! append their replies to the client.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ Multibulk Parser│  (protocol module)
//! └────────┬────────┘
//!          │ argv
//!          ▼
//! ┌─────────────────┐
//! │  CommandTable   │  (this module)
//! │                 │
//! │  - Lookup       │
//! │  - Arity        │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    Keyspace     │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `get`, `set`
//! - `expire`, `ttl`, `pttl`
//!
//! `quit` is handled by the server before table lookup.

pub mod handler;
pub mod table;

pub use handler::{parse_i64, CommandError};
pub use table::{CommandProc, CommandTable, RedisCommand, DEFAULT_COMMANDS};
