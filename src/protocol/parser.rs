//! Request Parser
//!
//! Clients send commands as multibulk requests:
//!
//! ```text
//! *3\r\n
//! $3\r\n
//! set\r\n
//! $4\r\n
//! name\r\n
//! $4\r\n
//! Ariz\r\n
//! ```
//!
//! The scanner here is line oriented rather than length counted. The first
//! line gives the argument count; after that, each `$<len>` header line is
//! parsed as an integer and skipped, and the line following it is taken as
//! the argument value. Lines that appear without a header are taken as values
//! too. The declared length is never checked against the payload, which means
//! argument values must not contain a line feed.
//!
//! ## Incremental parsing
//!
//! The parser works on whatever bytes have arrived so far and returns:
//! - `Ok(Some((args, consumed)))` - a full request, `consumed` bytes were used
//! - `Ok(None)` - the request is incomplete, wait for more data
//! - `Err(ProtocolError)` - the bytes can never form a valid request
//!
//! Inline requests (plain text without a leading `*`) are recognised but not
//! supported; they always produce [`ProtocolError::InlineUnsupported`].

use crate::protocol::types::prefix;
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while parsing a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The `*<argc>` line is not an integer
    #[error("invalid multibulk length")]
    InvalidMultibulkLength,

    /// A `$<len>` line is not an integer
    #[error("invalid bulk length")]
    InvalidBulkLength,

    /// The argument count exceeds [`MAX_MULTIBULK_LEN`]
    #[error("too many arguments: {argc} (max: {max})")]
    TooManyArguments { argc: i64, max: i64 },

    /// The request is not a multibulk request
    #[error("inline requests are not supported")]
    InlineUnsupported,
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ProtocolError>;

/// Upper bound on the argument count of a single request.
pub const MAX_MULTIBULK_LEN: i64 = 1024 * 1024;

/// How a request is framed, decided by its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Inline,
    Multibulk,
}

impl RequestType {
    /// Classifies a pending request. Returns `None` for an empty buffer.
    pub fn classify(buf: &[u8]) -> Option<Self> {
        match buf.first()? {
            &prefix::MULTIBULK => Some(RequestType::Multibulk),
            _ => Some(RequestType::Inline),
        }
    }
}

/// Finds the next `\n` at or after `from`.
#[inline]
fn find_lf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .iter()
        .position(|&b| b == b'\n')
        .map(|i| from + i)
}

/// Strips a trailing `\r`.
#[inline]
fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_int(digits: &[u8]) -> Option<i64> {
    std::str::from_utf8(digits).ok()?.trim().parse().ok()
}

/// Reads the line starting at `pos`. Returns the line without its
/// terminator and the position just past it.
#[inline]
fn next_line(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let end = find_lf(buf, pos)?;
    Some((trim_cr(&buf[pos..end]), end + 1))
}

/// Parses one multibulk request from the front of `buf`.
///
/// A count of zero or less yields an empty argument vector; the caller
/// treats that as a no-op request.
pub fn process_multibulk(buf: &[u8]) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
    debug_assert_eq!(buf.first(), Some(&prefix::MULTIBULK));

    let Some((header, mut pos)) = next_line(buf, 0) else {
        return Ok(None);
    };
    let argc = parse_int(&header[1..]).ok_or(ProtocolError::InvalidMultibulkLength)?;

    if argc <= 0 {
        return Ok(Some((Vec::new(), pos)));
    }
    if argc > MAX_MULTIBULK_LEN {
        return Err(ProtocolError::TooManyArguments {
            argc,
            max: MAX_MULTIBULK_LEN,
        });
    }

    let argc = argc as usize;
    let mut args = Vec::with_capacity(argc.min(64));
    while args.len() < argc {
        let Some((line, next)) = next_line(buf, pos) else {
            return Ok(None);
        };
        pos = next;

        let value = if line.first() == Some(&prefix::BULK_STRING) {
            parse_int(&line[1..]).ok_or(ProtocolError::InvalidBulkLength)?;
            let Some((payload, next)) = next_line(buf, pos) else {
                return Ok(None);
            };
            pos = next;
            payload
        } else {
            line
        };
        args.push(Bytes::copy_from_slice(value));
    }

    Ok(Some((args, pos)))
}

/// Parses an inline request. Not supported.
pub fn process_inline(_buf: &[u8]) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
    Err(ProtocolError::InlineUnsupported)
}

/// Parses one request of the given type from the front of `buf`.
pub fn parse_request(
    reqtype: RequestType,
    buf: &[u8],
) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
    match reqtype {
        RequestType::Multibulk => process_multibulk(buf),
        RequestType::Inline => process_inline(buf),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn parse(input: &[u8]) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
        let reqtype = RequestType::classify(input).unwrap();
        parse_request(reqtype, input)
    }

    fn args(items: &[&str]) -> Vec<Bytes> {
        items
            .iter()
            .map(|s| Bytes::copy_from_slice(s.as_bytes()))
            .collect()
    }

    #[test]
    fn test_classify() {
        assert_eq!(RequestType::classify(b"*1\r\n"), Some(RequestType::Multibulk));
        assert_eq!(RequestType::classify(b"PING\r\n"), Some(RequestType::Inline));
        assert_eq!(RequestType::classify(b""), None);
    }

    #[test]
    fn test_parse_set() {
        let input = b"*3\r\n$3\r\nset\r\n$4\r\nname\r\n$4\r\nAriz\r\n";
        let (argv, consumed) = parse(input).unwrap().unwrap();
        assert_eq!(argv, args(&["set", "name", "Ariz"]));
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_parse_pipelined() {
        let input = b"*2\r\n$3\r\nget\r\n$1\r\na\r\n*2\r\n$3\r\nttl\r\n$1\r\nb\r\n";
        let (first, consumed) = parse(input).unwrap().unwrap();
        assert_eq!(first, args(&["get", "a"]));

        let (second, rest) = parse(&input[consumed..]).unwrap().unwrap();
        assert_eq!(second, args(&["ttl", "b"]));
        assert_eq!(consumed + rest, input.len());
    }

    #[test]
    fn test_incomplete_at_every_cut() {
        let input = b"*2\r\n$3\r\nget\r\n$3\r\nkey\r\n";
        for cut in 1..input.len() {
            assert_eq!(
                parse(&input[..cut]),
                Ok(None),
                "cut at {} should be incomplete",
                cut
            );
        }
        assert!(parse(input).unwrap().is_some());
    }

    #[test]
    fn test_value_starting_with_dollar() {
        let input = b"*3\r\n$3\r\nset\r\n$1\r\nk\r\n$4\r\n$100\r\n";
        let (argv, _) = parse(input).unwrap().unwrap();
        assert_eq!(argv, args(&["set", "k", "$100"]));
    }

    #[test]
    fn test_bulk_length_not_checked() {
        let input = b"*2\r\n$99\r\nget\r\n$0\r\nkey\r\n";
        let (argv, _) = parse(input).unwrap().unwrap();
        assert_eq!(argv, args(&["get", "key"]));
    }

    #[test]
    fn test_lines_without_headers() {
        let (argv, consumed) = parse(b"*2\r\nget\r\nkey\r\n").unwrap().unwrap();
        assert_eq!(argv, args(&["get", "key"]));
        assert_eq!(consumed, 14);
    }

    #[test]
    fn test_bare_lf_terminators() {
        let (argv, _) = parse(b"*2\n$3\nget\n$1\nk\n").unwrap().unwrap();
        assert_eq!(argv, args(&["get", "k"]));
    }

    #[test]
    fn test_empty_and_negative_count() {
        let (argv, consumed) = assert_ok!(parse(b"*0\r\n")).unwrap();
        assert!(argv.is_empty());
        assert_eq!(consumed, 4);

        let (argv, _) = assert_ok!(parse(b"*-1\r\n")).unwrap();
        assert!(argv.is_empty());
    }

    #[test]
    fn test_invalid_multibulk_length() {
        let err = assert_err!(parse(b"*abc\r\n"));
        assert_eq!(err, ProtocolError::InvalidMultibulkLength);
    }

    #[test]
    fn test_invalid_bulk_length() {
        let err = assert_err!(parse(b"*1\r\n$x\r\nget\r\n"));
        assert_eq!(err, ProtocolError::InvalidBulkLength);
    }

    #[test]
    fn test_too_many_arguments() {
        let err = assert_err!(parse(b"*99999999\r\n"));
        assert!(matches!(err, ProtocolError::TooManyArguments { .. }));
    }

    #[test]
    fn test_inline_unsupported() {
        let err = assert_err!(parse(b"GET key\r\n"));
        assert_eq!(err, ProtocolError::InlineUnsupported);
        assert_eq!(err.to_string(), "inline requests are not supported");
    }

    #[test]
    fn test_binary_value() {
        let input = b"*2\r\n$3\r\nget\r\n$3\r\n\x00\xff\x01\r\n";
        let (argv, _) = parse(input).unwrap().unwrap();
        assert_eq!(argv[1], Bytes::from_static(b"\x00\xff\x01"));
    }
}
