//! Keyspace
//!
//! The single logical database: a main dictionary from keys to value objects,
//! a second dictionary from keys to absolute expiry times (milliseconds since
//! the epoch), and the candidate pool used by LRU eviction.
//!
//! ## Invariants
//!
//! - Every key in `expires` is also present in `data`. Expiry times are only
//!   ever set on existing keys, and deleting a key removes it from both
//!   dictionaries in the same call.
//! - `lookup` applies lazy expiration before the find, so an expired key is
//!   never returned to a command.
//!
//! The keyspace is owned by the server context and is only touched from the
//! event loop, so none of this needs locking.

use crate::storage::clock::{LruClock, SharedClock};
use crate::storage::dict::Dict;
use crate::storage::eviction::EvictionPool;
use crate::storage::object::{RedisObject, ENTRY_OVERHEAD};
use bytes::Bytes;
use tracing::trace;

/// Counters kept by the keyspace.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KeyspaceStats {
    /// Lookups that found a live key
    pub hits: u64,
    /// Lookups that found nothing (including keys that just expired)
    pub misses: u64,
    /// Keys removed because their expiry time passed
    pub expired_keys: u64,
    /// Keys removed by the eviction engine
    pub evicted_keys: u64,
}

/// The key-value database.
pub struct Keyspace {
    id: u32,
    pub(crate) data: Dict<Bytes, RedisObject>,
    pub(crate) expires: Dict<Bytes, i64>,
    pub(crate) eviction_pool: EvictionPool,
    clock: SharedClock,
    lru_clock: LruClock,
    estimated_bytes: usize,
    pub(crate) stats: KeyspaceStats,
}

impl std::fmt::Debug for Keyspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyspace")
            .field("id", &self.id)
            .field("keys", &self.data.len())
            .field("volatile_keys", &self.expires.len())
            .field("estimated_bytes", &self.estimated_bytes)
            .finish()
    }
}

/// Approximate footprint of one entry.
#[inline]
fn entry_size(key: &[u8], value: &RedisObject) -> usize {
    key.len() + value.size() + ENTRY_OVERHEAD
}

impl Keyspace {
    /// Creates an empty keyspace.
    ///
    /// `hz` is the server tick frequency; it decides whether the cached LRU
    /// clock is precise enough to be used on key access.
    pub fn new(id: u32, hz: u32, clock: SharedClock) -> Self {
        let lru_clock = LruClock::new(hz, clock.now_ms());
        Self {
            id,
            data: Dict::new(),
            expires: Dict::new(),
            eviction_pool: EvictionPool::new(),
            clock,
            lru_clock,
            estimated_bytes: 0,
            stats: KeyspaceStats::default(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current wall-clock time in milliseconds.
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Current wall-clock time in microseconds.
    pub fn now_us(&self) -> i64 {
        self.clock.now_us()
    }

    /// Current LRU clock reading, used to stamp new and accessed objects.
    pub fn lru_clock(&self) -> u32 {
        self.lru_clock.current(self.clock.now_ms())
    }

    /// Refreshes the cached LRU clock. Called once per server tick.
    pub fn refresh_lru_clock(&mut self) {
        self.lru_clock.refresh(self.clock.now_ms());
    }

    /// Looks up a key for reading.
    ///
    /// Expired keys are deleted first and reported as absent. A hit refreshes
    /// the object's access time.
    pub fn lookup(&mut self, key: &[u8]) -> Option<&RedisObject> {
        self.expire_if_needed(key);

        let lru = self.lru_clock();
        match self.data.find_mut(key) {
            Some(obj) => {
                obj.touch(lru);
                self.stats.hits += 1;
                Some(&*obj)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Reads a key without expiring it or touching its access time.
    pub fn peek(&self, key: &[u8]) -> Option<&RedisObject> {
        self.data.find(key)
    }

    /// Inserts or overwrites a key.
    ///
    /// The stored object gains a reference. Expiry metadata is left alone;
    /// callers manage it with [`set_expire`](Self::set_expire) and
    /// [`remove_expire`](Self::remove_expire).
    pub fn set_key(&mut self, key: Bytes, mut value: RedisObject) {
        value.incr_refcount();
        let size = entry_size(&key, &value);

        if let Some(old) = self.data.find(&key[..]) {
            let old_size = entry_size(&key, old);
            self.estimated_bytes = self.estimated_bytes.saturating_sub(old_size);
            trace!(key = ?key, "Overwriting key");
        }
        self.data.replace(key, value);
        self.estimated_bytes += size;
    }

    /// Sets an absolute expiry time in milliseconds.
    ///
    /// Does nothing and returns false if the key does not exist.
    pub fn set_expire(&mut self, key: &[u8], when_ms: i64) -> bool {
        match self.data.find_key(key) {
            Some(owned) => {
                self.expires.replace(owned, when_ms);
                true
            }
            None => false,
        }
    }

    /// Returns the absolute expiry time in milliseconds, or -1 when the key
    /// has none.
    pub fn get_expire(&self, key: &[u8]) -> i64 {
        if self.expires.is_empty() {
            return -1;
        }
        self.expires.find(key).copied().unwrap_or(-1)
    }

    /// Drops the expiry of a key. Returns true if one was set.
    pub fn remove_expire(&mut self, key: &[u8]) -> bool {
        self.expires.delete(key).is_ok()
    }

    /// Deletes a key from both dictionaries. Returns true if it existed.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.expires.delete(key).ok();
        match self.data.delete(key) {
            Ok(old) => {
                self.estimated_bytes = self
                    .estimated_bytes
                    .saturating_sub(entry_size(key, &old));
                true
            }
            Err(_) => false,
        }
    }

    /// Returns true if the key is present, without applying expiration.
    pub fn exists(&self, key: &[u8]) -> bool {
        self.data.contains(key)
    }

    /// Deletes the key if its expiry time is strictly in the past.
    ///
    /// Returns true if the key was expired by this call.
    pub fn expire_if_needed(&mut self, key: &[u8]) -> bool {
        let when = self.get_expire(key);
        if when < 0 {
            return false;
        }
        if self.now_ms() <= when {
            return false;
        }
        self.expire_key(key)
    }

    /// Removes a key whose expiry time has passed and counts it.
    pub(crate) fn expire_key(&mut self, key: &[u8]) -> bool {
        let deleted = self.delete(key);
        if deleted {
            self.stats.expired_keys += 1;
            trace!(key = ?Bytes::copy_from_slice(key), "Expired key");
        }
        deleted
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of keys with an expiry time.
    pub fn volatile_len(&self) -> usize {
        self.expires.len()
    }

    /// Approximate bytes held by all entries: key + payload + fixed overhead.
    pub fn estimated_memory(&self) -> usize {
        self.estimated_bytes
    }

    pub fn stats(&self) -> KeyspaceStats {
        self.stats
    }

    /// The LRU eviction candidate pool.
    pub fn eviction_pool(&self) -> &EvictionPool {
        &self.eviction_pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::clock::ManualClock;
    use crate::storage::object::Payload;
    use std::sync::Arc;

    fn keyspace_at(now_ms: i64) -> (Keyspace, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now_ms));
        (Keyspace::new(0, 10, clock.clone()), clock)
    }

    fn string(db: &Keyspace, v: &'static str) -> RedisObject {
        RedisObject::string(v, db.lru_clock())
    }

    #[test]
    fn test_set_and_lookup() {
        let (mut db, _) = keyspace_at(1_000);
        let value = string(&db, "value");
        db.set_key(Bytes::from("key"), value);

        let obj = db.lookup(b"key").unwrap();
        assert_eq!(obj.payload(), &Payload::Str(Bytes::from("value")));
        assert_eq!(db.get_expire(b"key"), -1);
        assert_eq!(db.stats().hits, 1);
    }

    #[test]
    fn test_lookup_missing() {
        let (mut db, _) = keyspace_at(0);
        assert!(db.lookup(b"nope").is_none());
        assert_eq!(db.stats().misses, 1);
    }

    #[test]
    fn test_set_key_increments_refcount() {
        let (mut db, _) = keyspace_at(0);
        let value = string(&db, "v");
        assert_eq!(value.refcount(), 1);
        db.set_key(Bytes::from("k"), value);
        assert_eq!(db.peek(b"k").unwrap().refcount(), 2);
    }

    #[test]
    fn test_overwrite_keeps_expiry() {
        let (mut db, _) = keyspace_at(0);
        let v1 = string(&db, "v1");
        db.set_key(Bytes::from("k"), v1);
        assert!(db.set_expire(b"k", 5_000));

        let v2 = string(&db, "v2");
        db.set_key(Bytes::from("k"), v2);
        assert_eq!(db.len(), 1);
        assert_eq!(db.get_expire(b"k"), 5_000);
    }

    #[test]
    fn test_set_expire_on_missing_key_is_noop() {
        let (mut db, _) = keyspace_at(0);
        assert!(!db.set_expire(b"ghost", 10));
        assert_eq!(db.get_expire(b"ghost"), -1);
        assert_eq!(db.volatile_len(), 0);
    }

    #[test]
    fn test_delete_removes_both() {
        let (mut db, _) = keyspace_at(0);
        let value = string(&db, "v");
        db.set_key(Bytes::from("k"), value);
        db.set_expire(b"k", 10_000);

        assert!(db.delete(b"k"));
        assert!(!db.exists(b"k"));
        assert_eq!(db.volatile_len(), 0);
        assert_eq!(db.estimated_memory(), 0);

        // Idempotent
        assert!(!db.delete(b"k"));
    }

    #[test]
    fn test_lazy_expiry_boundary() {
        let (mut db, clock) = keyspace_at(1_000);
        let value = string(&db, "v");
        db.set_key(Bytes::from("k"), value);
        db.set_expire(b"k", 2_000);

        // now == when is not yet expired
        clock.set_ms(2_000);
        assert!(db.lookup(b"k").is_some());
        assert_eq!(db.stats().expired_keys, 0);

        clock.set_ms(2_001);
        assert!(db.lookup(b"k").is_none());
        assert!(!db.exists(b"k"));
        assert_eq!(db.volatile_len(), 0);
        assert_eq!(db.stats().expired_keys, 1);
    }

    #[test]
    fn test_lookup_without_expiry_never_expires() {
        let (mut db, clock) = keyspace_at(0);
        let value = string(&db, "v");
        db.set_key(Bytes::from("k"), value);

        clock.advance_ms(1_000_000_000);
        assert!(db.lookup(b"k").is_some());
        assert_eq!(db.stats().expired_keys, 0);
    }

    #[test]
    fn test_lookup_touches_lru() {
        let (mut db, clock) = keyspace_at(0);
        let value = string(&db, "v");
        db.set_key(Bytes::from("k"), value);
        assert_eq!(db.peek(b"k").unwrap().lru(), 0);

        clock.set_ms(42_000);
        db.refresh_lru_clock();
        db.lookup(b"k");
        assert_eq!(db.peek(b"k").unwrap().lru(), 42);
    }

    #[test]
    fn test_remove_expire() {
        let (mut db, _) = keyspace_at(0);
        let value = string(&db, "v");
        db.set_key(Bytes::from("k"), value);
        db.set_expire(b"k", 100);

        assert!(db.remove_expire(b"k"));
        assert!(!db.remove_expire(b"k"));
        assert_eq!(db.get_expire(b"k"), -1);
    }

    #[test]
    fn test_estimated_memory_tracks_overwrites() {
        let (mut db, _) = keyspace_at(0);
        let v1 = string(&db, "aaaa");
        db.set_key(Bytes::from("k"), v1);
        assert_eq!(db.estimated_memory(), 1 + 4 + ENTRY_OVERHEAD);

        let v2 = string(&db, "aa");
        db.set_key(Bytes::from("k"), v2);
        assert_eq!(db.estimated_memory(), 1 + 2 + ENTRY_OVERHEAD);
    }
}
