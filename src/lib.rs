//! # RediKV - A Small In-Memory Key-Value Server
//!
//! RediKV is an in-memory key-value server that speaks the Redis multibulk
//! request format. It keeps one keyspace with per-key expiry and bounds its
//! memory with sampled, approximate-LRU eviction.
//!
//! ## Features
//!
//! - **Single-threaded core**: one [`Server`] owns every key and client; no locks
//! - **Expiry**: lazy on access plus an adaptive, time-bounded active cycle
//! - **Eviction**: six `maxmemory` policies fed by a 16-slot candidate pool
//! - **Pluggable I/O**: the core talks to the network through a [`Transport`]
//!   trait; a Tokio TCP adapter is included
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                               RediKV                                │
//! │                                                                     │
//! │  ┌─────────────┐  events  ┌──────────────────────────────────────┐  │
//! │  │ Tokio TCP   │────────> │               Server                 │  │
//! │  │ adapter     │ <─────── │                                      │  │
//! │  └─────────────┘ Transport│  Client ──> multibulk parser         │  │
//! │                           │     │                                │  │
//! │                           │     ▼                                │  │
//! │                           │  CommandTable ──> Keyspace           │  │
//! │                           │                   ├ Dict data        │  │
//! │                           │                   ├ Dict expires     │  │
//! │                           │                   └ EvictionPool     │  │
//! │                           │                                      │  │
//! │                           │  on_tick: LRU clock, expire cycle,   │  │
//! │                           │           eviction                   │  │
//! │                           └──────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use redikv::config::Config;
//! use redikv::connection::{bind, serve, ConnectionStats};
//! use redikv::server::Server;
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> std::io::Result<()> {
//!     let config = Config::default();
//!     let listener = bind(&config).await?;
//!     let stats = Arc::new(ConnectionStats::new());
//!
//!     serve(listener, Server::new(config), stats).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! Command names are matched exactly and are lowercase.
//!
//! - `get key`
//! - `set key value [nx|xx] [ex seconds|px milliseconds]`
//! - `expire key seconds`
//! - `ttl key` / `pttl key`
//! - `quit`

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

pub use config::Config;
pub use connection::{ConnectionId, Transport};
pub use protocol::Reply;
pub use server::Server;
pub use storage::Keyspace;

/// The default port RediKV listens on
pub const DEFAULT_PORT: u16 = 6389;

/// The default host RediKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of RediKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
