//! Connection Module
//!
//! Per-connection state and the seam between the server core and the
//! network.
//!
//! - [`Client`] holds one connection's query buffer, parsed arguments and
//!   reply buffer.
//! - [`Transport`] is what the server writes replies through and asks to
//!   close connections.
//! - [`handler`] drives a server from Tokio TCP sockets.
//!
//! ## Example
//!
//! ```no_run
//! use redikv::config::Config;
//! use redikv::connection::{bind, serve, ConnectionStats};
//! use redikv::server::Server;
//! use std::sync::Arc;
//!
//! # async fn run() -> std::io::Result<()> {
//! let config = Config::default();
//! let listener = bind(&config).await?;
//! serve(listener, Server::new(config), Arc::new(ConnectionStats::new())).await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod handler;
pub mod transport;

pub use client::{Client, CLOSE_AFTER_REPLY};
pub use handler::{bind, serve, ChannelTransport, ConnectionStats};
pub use transport::{ConnectionId, Transport, TransportError};
