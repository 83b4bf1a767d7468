//! Transport Contract
//!
//! The server core never touches sockets. It is driven by an event source
//! (accept, data, close and tick events) and talks back through a
//! [`Transport`], which only needs to know how to write bytes to a connection
//! and how to close one.

use std::fmt;
use thiserror::Error;

/// Opaque identifier the transport assigns to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Errors a transport may report.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection id is not known to the transport
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The connection has already been closed
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    /// Too many reply bytes are queued for a connection that is not reading
    #[error("output buffer of {conn} is over its limit ({queued} bytes queued)")]
    OutputLimit { conn: ConnectionId, queued: usize },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound half of the event-driven transport.
pub trait Transport {
    /// Hands bytes to the connection. Returns how many were accepted, which
    /// may be fewer than `data.len()`.
    fn write(&mut self, conn: ConnectionId, data: &[u8]) -> Result<usize, TransportError>;

    /// Closes the connection. Closing twice is not an error.
    fn close(&mut self, conn: ConnectionId) -> Result<(), TransportError>;
}
