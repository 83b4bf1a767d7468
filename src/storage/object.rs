//! Value Objects
//!
//! Every value in the keyspace is wrapped in a [`RedisObject`]: a tagged cell
//! carrying the payload, a reference count and the LRU clock reading of its
//! last access.
//!
//! The payload is a closed sum type. Consumers match on it exhaustively, so
//! adding a new kind is a compile error at every site that has to handle it.

use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;

/// Fixed per-entry overhead used by memory estimates.
pub const ENTRY_OVERHEAD: usize = 64;

/// Logical type of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    String,
    List,
}

impl ObjectType {
    /// Name as reported to clients.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::String => "string",
            ObjectType::List => "list",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical representation of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    LinkedList,
}

/// The data held by an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Binary-safe string
    Str(Bytes),
    /// Reserved for list values; no command creates one yet
    List(VecDeque<Bytes>),
}

impl Payload {
    /// Approximate number of bytes held by the payload.
    pub fn size(&self) -> usize {
        match self {
            Payload::Str(data) => data.len(),
            Payload::List(items) => items.iter().map(Bytes::len).sum(),
        }
    }
}

/// A value stored in the keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisObject {
    kind: ObjectType,
    encoding: Encoding,
    lru: u32,
    refcount: u32,
    payload: Payload,
}

impl RedisObject {
    /// Creates an object with a reference count of one.
    pub fn new(payload: Payload, lru: u32) -> Self {
        let (kind, encoding) = match &payload {
            Payload::Str(_) => (ObjectType::String, Encoding::Raw),
            Payload::List(_) => (ObjectType::List, Encoding::LinkedList),
        };
        Self {
            kind,
            encoding,
            lru,
            refcount: 1,
            payload,
        }
    }

    /// Creates a string object.
    pub fn string(data: impl Into<Bytes>, lru: u32) -> Self {
        Self::new(Payload::Str(data.into()), lru)
    }

    /// Creates an empty list object.
    pub fn list(lru: u32) -> Self {
        Self::new(Payload::List(VecDeque::new()), lru)
    }

    pub fn kind(&self) -> ObjectType {
        self.kind
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// LRU clock reading of the last access.
    pub fn lru(&self) -> u32 {
        self.lru
    }

    /// Records an access at the given LRU clock reading.
    pub fn touch(&mut self, lru: u32) {
        self.lru = lru;
    }

    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    pub fn incr_refcount(&mut self) {
        self.refcount = self.refcount.saturating_add(1);
    }

    /// Drops one reference. Returns true once the object is unreferenced
    /// and may be reclaimed.
    pub fn decr_refcount(&mut self) -> bool {
        self.refcount = self.refcount.saturating_sub(1);
        self.refcount == 0
    }

    /// Approximate memory held by this object.
    pub fn size(&self) -> usize {
        self.payload.size()
    }
}
