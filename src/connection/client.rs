//! Client State
//!
//! One [`Client`] exists per open connection. It carries the bytes received
//! but not yet parsed, the arguments of the command being executed, and the
//! reply buffer with its two cursors:
//!
//! ```text
//!   buf:  [ already sent | pending ........ ][ free ]
//!         0          sentlen            bufpos
//! ```
//!
//! Handlers append replies at `bufpos`; the server hands `sentlen..bufpos` to
//! the transport and advances `sentlen` by whatever the transport accepted.
//! Once everything is sent both cursors go back to zero.

use crate::commands::RedisCommand;
use crate::connection::transport::ConnectionId;
use crate::protocol::{Reply, RequestType};
use bytes::{Buf, Bytes, BytesMut};

/// Close the connection once the pending reply has been flushed.
pub const CLOSE_AFTER_REPLY: u32 = 1 << 6;

/// Initial capacity of the query buffer.
const QUERY_BUF_INITIAL: usize = 4096;

/// Per-connection client state.
#[derive(Debug)]
pub struct Client {
    id: u64,
    conn: ConnectionId,
    db: u32,
    query_buf: BytesMut,
    argv: Vec<Bytes>,
    reqtype: Option<RequestType>,
    buf: Vec<u8>,
    bufpos: usize,
    sentlen: usize,
    cmd: Option<RedisCommand>,
    lastcmd: Option<&'static str>,
    flags: u32,
}

impl Client {
    /// Creates the state for a freshly accepted connection, bound to
    /// database `db`.
    pub fn new(id: u64, conn: ConnectionId, db: u32) -> Self {
        Self {
            id,
            conn,
            db,
            query_buf: BytesMut::with_capacity(QUERY_BUF_INITIAL),
            argv: Vec::new(),
            reqtype: None,
            buf: Vec::new(),
            bufpos: 0,
            sentlen: 0,
            cmd: None,
            lastcmd: None,
            flags: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn conn(&self) -> ConnectionId {
        self.conn
    }

    pub fn db(&self) -> u32 {
        self.db
    }

    /// Appends received bytes to the query buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.query_buf.extend_from_slice(data);
    }

    /// Bytes received but not yet parsed.
    pub fn query_buf(&self) -> &[u8] {
        &self.query_buf
    }

    /// Drops `n` parsed bytes from the front of the query buffer.
    pub fn consume(&mut self, n: usize) {
        self.query_buf.advance(n.min(self.query_buf.len()));
    }

    /// Drops everything in the query buffer.
    pub fn discard_query_buffer(&mut self) {
        self.query_buf.clear();
    }

    /// Arguments of the current command; `argv()[0]` is the command name.
    pub fn argv(&self) -> &[Bytes] {
        &self.argv
    }

    pub fn set_argv(&mut self, argv: Vec<Bytes>) {
        self.argv = argv;
    }

    pub fn reqtype(&self) -> Option<RequestType> {
        self.reqtype
    }

    pub fn set_reqtype(&mut self, reqtype: RequestType) {
        self.reqtype = Some(reqtype);
    }

    pub fn cmd(&self) -> Option<&RedisCommand> {
        self.cmd.as_ref()
    }

    /// Records the command about to run.
    pub fn set_cmd(&mut self, cmd: RedisCommand) {
        self.lastcmd = Some(cmd.name);
        self.cmd = Some(cmd);
    }

    /// Name of the most recently executed command.
    pub fn lastcmd(&self) -> Option<&'static str> {
        self.lastcmd
    }

    /// Appends an encoded reply at the write cursor.
    pub fn add_reply(&mut self, reply: &Reply) {
        self.buf.truncate(self.bufpos);
        reply.serialize_into(&mut self.buf);
        self.bufpos = self.buf.len();
    }

    /// Reply bytes not yet handed to the transport.
    pub fn pending_reply(&self) -> &[u8] {
        &self.buf[self.sentlen..self.bufpos]
    }

    pub fn has_pending_reply(&self) -> bool {
        self.sentlen < self.bufpos
    }

    /// Records that the transport accepted `n` more bytes.
    pub fn advance_sent(&mut self, n: usize) {
        self.sentlen = (self.sentlen + n).min(self.bufpos);
        if self.sentlen == self.bufpos {
            self.buf.clear();
            self.bufpos = 0;
            self.sentlen = 0;
        }
    }

    /// Write cursor of the reply buffer.
    pub fn bufpos(&self) -> usize {
        self.bufpos
    }

    /// How much of the reply buffer has been handed to the transport.
    pub fn sentlen(&self) -> usize {
        self.sentlen
    }

    /// Prepares for the next request. Unparsed input is kept.
    pub fn reset(&mut self) {
        self.argv.clear();
        self.reqtype = None;
        self.cmd = None;
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Marks the connection to be closed once the pending reply is flushed.
    pub fn close_after_reply(&mut self) {
        self.flags |= CLOSE_AFTER_REPLY;
    }

    pub fn is_closing(&self) -> bool {
        self.flags & CLOSE_AFTER_REPLY != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client::new(1, ConnectionId(7), 0)
    }

    #[test]
    fn test_query_buffer() {
        let mut c = client();
        c.feed(b"*1\r\n");
        c.feed(b"$3\r\n");
        assert_eq!(c.query_buf(), b"*1\r\n$3\r\n");

        c.consume(4);
        assert_eq!(c.query_buf(), b"$3\r\n");

        c.consume(100);
        assert!(c.query_buf().is_empty());
    }

    #[test]
    fn test_reply_cursors() {
        let mut c = client();
        c.add_reply(&Reply::ok());
        c.add_reply(&Reply::cone());
        assert_eq!(c.pending_reply(), b"+OK\r\n:1\r\n");
        assert_eq!(c.bufpos(), 9);

        // Partial write
        c.advance_sent(3);
        assert_eq!(c.sentlen(), 3);
        assert_eq!(c.pending_reply(), b"\r\n:1\r\n");

        c.advance_sent(6);
        assert!(!c.has_pending_reply());
        assert_eq!(c.bufpos(), 0);
        assert_eq!(c.sentlen(), 0);
    }

    #[test]
    fn test_reset_keeps_unparsed_input() {
        let mut c = client();
        c.feed(b"*1\r\n");
        c.set_argv(vec![Bytes::from("get")]);
        c.set_reqtype(RequestType::Multibulk);

        c.reset();
        assert!(c.argv().is_empty());
        assert!(c.reqtype().is_none());
        assert!(c.cmd().is_none());
        assert_eq!(c.query_buf(), b"*1\r\n");
    }

    #[test]
    fn test_close_after_reply_flag() {
        let mut c = client();
        assert!(!c.is_closing());
        c.close_after_reply();
        assert!(c.is_closing());
        assert_eq!(c.flags() & CLOSE_AFTER_REPLY, CLOSE_AFTER_REPLY);
    }
}
