//! Wire Protocol
//!
//! Requests arrive as multibulk frames; replies go out as one of five simple
//! encodings.
//!
//! ## Modules
//!
//! - `types`: the `Reply` enum and its serialization
//! - `parser`: frame classification and the line-oriented multibulk scanner
//!
//! ## Example
//!
//! ```
//! use redikv::protocol::{process_multibulk, Reply};
//! use bytes::Bytes;
//!
//! // Parsing an incoming request
//! let data = b"*2\r\n$3\r\nget\r\n$4\r\nname\r\n";
//! let (args, consumed) = process_multibulk(data).unwrap().unwrap();
//! assert_eq!(args[1], Bytes::from("name"));
//! assert_eq!(consumed, data.len());
//!
//! // Encoding a reply
//! let response = Reply::bulk(Bytes::from("Ariz"));
//! assert_eq!(response.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{
    parse_request, process_inline, process_multibulk, ParseResult, ProtocolError, RequestType,
};
pub use types::Reply;
