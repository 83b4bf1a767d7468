//! Reply Types
//!
//! The server only ever sends five kinds of reply, each a single line or a
//! length-prefixed block terminated with CRLF (`\r\n`):
//!
//! - `+` Status: `+OK\r\n`
//! - `-` Error: `-ERR syntax error\r\n`
//! - `:` Integer: `:1000\r\n`
//! - `$` Bulk string: `$5\r\nhello\r\n`
//! - Null bulk string: `$-1\r\n`

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used by every reply
pub const CRLF: &[u8] = b"\r\n";

/// Reply type prefixes
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const MULTIBULK: u8 = b'*';
}

/// A reply to a client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Single-line status. Must not contain CRLF.
    /// Format: `+<status>\r\n`
    Status(&'static str),

    /// Error line, starting with an error code such as `ERR` or `WRONGTYPE`.
    /// Format: `-<message>\r\n`
    Error(String),

    /// Signed 64-bit integer.
    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// Binary-safe string.
    /// Format: `$<length>\r\n<data>\r\n`
    Bulk(Bytes),

    /// Absent value.
    /// Format: `$-1\r\n`
    NullBulk,
}

impl Reply {
    /// `+OK`
    pub fn ok() -> Self {
        Reply::Status("OK")
    }

    /// Creates an error reply. The message should start with its error code.
    ///
    /// # Example
    /// ```
    /// use redikv::protocol::Reply;
    /// let err = Reply::error("ERR syntax error");
    /// assert_eq!(err.serialize(), b"-ERR syntax error\r\n");
    /// ```
    pub fn error(msg: impl Into<String>) -> Self {
        Reply::Error(msg.into())
    }

    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    /// `:0`
    pub fn czero() -> Self {
        Reply::Integer(0)
    }

    /// `:1`
    pub fn cone() -> Self {
        Reply::Integer(1)
    }

    /// `$-1`
    pub fn null_bulk() -> Self {
        Reply::NullBulk
    }

    /// Serializes the reply to its wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Appends the wire format to an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Status(s) => {
                buf.push(prefix::STATUS);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Bulk(data) => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            Reply::NullBulk => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Error(s) => write!(f, "(error) {}", s),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Reply::NullBulk => write!(f, "(nil)"),
        }
    }
}
