//! Storage Module
//!
//! Everything that holds or ages data: the dictionary abstraction, value
//! objects, the keyspace, and the two background policies that keep it in
//! check (active expiry and eviction).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Keyspace                          │
//! │   ┌──────────────────────┐   ┌──────────────────────┐    │
//! │   │ data: Dict<key, obj> │   │ expires: Dict<key,ms>│    │
//! │   └──────────────────────┘   └──────────────────────┘    │
//! │   ┌──────────────────────┐   ┌──────────────────────┐    │
//! │   │   EvictionPool (16)  │   │  LruClock (24 bits)  │    │
//! │   └──────────────────────┘   └──────────────────────┘    │
//! └──────────────────────────────────────────────────────────┘
//!          ▲                              ▲
//!          │ before each command          │ every tick
//!  ┌───────┴──────────────┐     ┌─────────┴──────────────┐
//!  │ free_memory_if_needed│     │  active_expire_cycle   │
//!  └──────────────────────┘     └────────────────────────┘
//! ```
//!
//! Nothing here is shared between threads; the keyspace is owned by the
//! server's event loop.
//!
//! ## Example
//!
//! ```
//! use redikv::storage::{Keyspace, ManualClock, RedisObject};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! let clock = Arc::new(ManualClock::new(1_000));
//! let mut db = Keyspace::new(0, 10, clock.clone());
//!
//! let lru = db.lru_clock();
//! db.set_key(Bytes::from("session"), RedisObject::string("token123", lru));
//! db.set_expire(b"session", 2_000);
//!
//! clock.set_ms(2_001);
//! assert!(db.lookup(b"session").is_none());
//! ```

pub mod clock;
pub mod db;
pub mod dict;
pub mod eviction;
pub mod expiry;
pub mod object;

// Re-export commonly used types
pub use clock::{Clock, LruClock, ManualClock, SharedClock, SystemClock};
pub use db::{Keyspace, KeyspaceStats};
pub use dict::{Dict, DictError, Replace};
pub use eviction::{
    free_memory_if_needed, EstimatedMemory, EvictionError, EvictionPool, EvictionReport,
    MaxMemoryPolicy, MemoryLimits, MemoryUsage, UnaccountedMemory,
};
pub use expiry::{active_expire_cycle, ExpireCycleStats, ExpiryConfig};
pub use object::{Encoding, ObjectType, Payload, RedisObject};
