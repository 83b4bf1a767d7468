//! Memory Eviction
//!
//! When a memory ceiling (`maxmemory`) is configured the server calls
//! [`free_memory_if_needed`] before executing each command. If usage is over
//! the ceiling, keys are deleted according to the configured
//! [`MaxMemoryPolicy`] until enough memory has been reclaimed.
//!
//! ## Approximate LRU
//!
//! Keeping every key in access order would cost a linked-list update on each
//! read. Instead each object records the LRU clock of its last access, and
//! eviction samples a handful of keys, estimates their idle time and merges
//! them into a small pool ordered by idle time:
//!
//! ```text
//!   index:   0      1      2      3     ...    15
//!          ┌──────┬──────┬──────┬──────┬─────┬──────┐
//!   pool:  │ 12s  │ 40s  │ 95s  │ 310s │ ... │empty │
//!          └──────┴──────┴──────┴──────┴─────┴──────┘
//!            least idle                 most idle ──> evicted first
//! ```
//!
//! The pool survives between evictions, so good candidates found by earlier
//! samples are kept around.
//!
//! ## Memory accounting
//!
//! How many bytes the server uses is not decided here. It is supplied by a
//! [`MemoryUsage`] collaborator; [`UnaccountedMemory`] always reports zero,
//! while [`EstimatedMemory`] uses the keyspace's per-entry estimate.

use crate::storage::clock::{LRU_CLOCK_MAX, LRU_CLOCK_RESOLUTION};
use crate::storage::db::Keyspace;
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Number of slots in the eviction pool.
pub const EVICTION_POOL_SIZE: usize = 16;

/// Populate-and-pop rounds before LRU eviction gives up on finding a key.
pub const EVICTION_POOL_ROUNDS: usize = 4;

/// Default number of keys sampled per eviction attempt.
pub const DEFAULT_MAXMEMORY_SAMPLES: usize = 5;

/// Which keys may be evicted, and how the victim is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaxMemoryPolicy {
    /// Approximate LRU among keys with an expiry
    VolatileLru,
    /// Nearest expiry among sampled keys with an expiry
    VolatileTtl,
    /// Random key with an expiry
    VolatileRandom,
    /// Approximate LRU among all keys
    AllKeysLru,
    /// Random key
    AllKeysRandom,
    /// Never evict; commands fail with an out-of-memory error instead
    #[default]
    NoEviction,
}

impl MaxMemoryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaxMemoryPolicy::VolatileLru => "volatile-lru",
            MaxMemoryPolicy::VolatileTtl => "volatile-ttl",
            MaxMemoryPolicy::VolatileRandom => "volatile-random",
            MaxMemoryPolicy::AllKeysLru => "allkeys-lru",
            MaxMemoryPolicy::AllKeysRandom => "allkeys-random",
            MaxMemoryPolicy::NoEviction => "noeviction",
        }
    }

    /// Returns true if the policy only considers keys with an expiry.
    pub fn is_volatile(&self) -> bool {
        matches!(
            self,
            MaxMemoryPolicy::VolatileLru
                | MaxMemoryPolicy::VolatileTtl
                | MaxMemoryPolicy::VolatileRandom
        )
    }
}

impl fmt::Display for MaxMemoryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown policy name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown maxmemory policy '{0}'")]
pub struct ParsePolicyError(pub String);

impl FromStr for MaxMemoryPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "volatile-lru" => Ok(MaxMemoryPolicy::VolatileLru),
            "volatile-ttl" => Ok(MaxMemoryPolicy::VolatileTtl),
            "volatile-random" => Ok(MaxMemoryPolicy::VolatileRandom),
            "allkeys-lru" => Ok(MaxMemoryPolicy::AllKeysLru),
            "allkeys-random" => Ok(MaxMemoryPolicy::AllKeysRandom),
            "noeviction" => Ok(MaxMemoryPolicy::NoEviction),
            _ => Err(ParsePolicyError(s.to_string())),
        }
    }
}

/// The eviction settings the server runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    /// Memory ceiling in bytes; zero disables eviction entirely
    pub maxmemory: u64,
    pub policy: MaxMemoryPolicy,
    /// Keys sampled per LRU/TTL eviction attempt
    pub samples: usize,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            maxmemory: 0,
            policy: MaxMemoryPolicy::NoEviction,
            samples: DEFAULT_MAXMEMORY_SAMPLES,
        }
    }
}

/// Reports how much memory the server is using.
pub trait MemoryUsage: Send {
    fn used_memory(&self, db: &Keyspace) -> u64;
}

/// Memory accounting that is not implemented: always reports zero bytes,
/// so a configured ceiling is never reached.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnaccountedMemory;

impl MemoryUsage for UnaccountedMemory {
    fn used_memory(&self, _db: &Keyspace) -> u64 {
        0
    }
}

/// Uses the keyspace's running per-entry estimate.
#[derive(Debug, Default, Clone, Copy)]
pub struct EstimatedMemory;

impl MemoryUsage for EstimatedMemory {
    fn used_memory(&self, db: &Keyspace) -> u64 {
        db.estimated_memory() as u64
    }
}

/// What an eviction run accomplished.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvictionReport {
    pub evicted: usize,
    pub bytes_freed: u64,
}

/// Eviction could not bring usage under the ceiling.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EvictionError {
    #[error("used memory {used} exceeds maxmemory {maxmemory}")]
    OutOfMemory { used: u64, maxmemory: u64 },
}

/// One slot of the eviction pool. `key == None` marks an empty slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolEntry {
    pub key: Option<Bytes>,
    pub idle: u64,
}

/// Fixed-size array of eviction candidates in ascending idle-time order.
///
/// Occupied slots always form a prefix of the array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionPool {
    entries: Vec<PoolEntry>,
}

impl Default for EvictionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl EvictionPool {
    pub fn new() -> Self {
        Self {
            entries: vec![PoolEntry::default(); EVICTION_POOL_SIZE],
        }
    }

    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.key.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries[0].key.is_none()
    }

    fn position(&self, key: &[u8]) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.key.as_deref() == Some(key))
    }

    /// Clears slot `k` and shifts the following entries left by one.
    fn remove_at(&mut self, k: usize) {
        self.entries[k..].rotate_left(1);
        if let Some(last) = self.entries.last_mut() {
            *last = PoolEntry::default();
        }
    }

    /// Merges a candidate into the pool.
    ///
    /// Returns false if the pool is full and the candidate is less idle than
    /// everything in it. A key already in the pool is re-ranked with its new
    /// idle time.
    pub fn insert(&mut self, key: Bytes, idle: u64) -> bool {
        if let Some(existing) = self.position(&key) {
            self.remove_at(existing);
        }

        let size = self.entries.len();
        let mut k = 0;
        while k < size && self.entries[k].key.is_some() && self.entries[k].idle < idle {
            k += 1;
        }

        if k == 0 && self.entries[size - 1].key.is_some() {
            return false;
        } else if k < size && self.entries[k].key.is_none() {
            // Free slot at the insertion point
        } else if self.entries[size - 1].key.is_none() {
            // Room at the tail: shift k.. right
            self.entries[k..].rotate_right(1);
        } else {
            // Full: drop the least idle entry and shift ..k left
            k -= 1;
            self.entries[..=k].rotate_left(1);
        }

        self.entries[k] = PoolEntry {
            key: Some(key),
            idle,
        };
        true
    }

    /// Drops every candidate for which `live` returns false, keeping the
    /// survivors in order at the front of the pool.
    pub fn retain(&mut self, mut live: impl FnMut(&[u8]) -> bool) {
        let size = self.entries.len();
        self.entries
            .retain(|e| e.key.as_deref().is_some_and(&mut live));
        self.entries.resize(size, PoolEntry::default());
    }

    /// Takes the idlest candidate out of the pool.
    pub fn pop_idlest(&mut self) -> Option<Bytes> {
        let k = self.entries.iter().rposition(|e| e.key.is_some())?;
        let key = self.entries[k].key.take();
        self.remove_at(k);
        key
    }
}

/// Estimates how long ago an object was last accessed, in milliseconds.
///
/// The LRU clock wraps after [`LRU_CLOCK_MAX`] ticks; an object stamped
/// "after" the current reading was stamped before the last wrap.
pub fn estimate_idle_time(lru_clock: u32, object_lru: u32) -> u64 {
    let ticks = if lru_clock >= object_lru {
        u64::from(lru_clock - object_lru)
    } else {
        u64::from(lru_clock) + u64::from(LRU_CLOCK_MAX - object_lru)
    };
    ticks * LRU_CLOCK_RESOLUTION
}

/// Samples keys and merges them into the keyspace's eviction pool.
///
/// With `volatile` set the sample is drawn from the expiry dictionary, and
/// each sampled key's object is fetched from the main dictionary to read its
/// access time.
pub fn eviction_pool_populate(db: &mut Keyspace, volatile: bool, samples: usize) {
    let lru_clock = db.lru_clock();

    let candidates: Vec<(Bytes, u64)> = if volatile {
        db.expires
            .sample(samples)
            .into_iter()
            .filter_map(|(key, _)| {
                db.data
                    .find(&key[..])
                    .map(|obj| (key.clone(), estimate_idle_time(lru_clock, obj.lru())))
            })
            .collect()
    } else {
        db.data
            .sample(samples)
            .into_iter()
            .map(|(key, obj)| (key.clone(), estimate_idle_time(lru_clock, obj.lru())))
            .collect()
    };

    for (key, idle) in candidates {
        db.eviction_pool.insert(key, idle);
    }
}

/// Picks the next key to evict under the given limits.
fn select_victim(db: &mut Keyspace, limits: &MemoryLimits) -> Option<Bytes> {
    match limits.policy {
        MaxMemoryPolicy::NoEviction => None,
        MaxMemoryPolicy::AllKeysRandom => db.data.random_key().map(|(k, _)| k.clone()),
        MaxMemoryPolicy::VolatileRandom => db.expires.random_key().map(|(k, _)| k.clone()),
        MaxMemoryPolicy::AllKeysLru | MaxMemoryPolicy::VolatileLru => {
            let volatile = limits.policy.is_volatile();

            for _ in 0..EVICTION_POOL_ROUNDS {
                let (data, expires) = (&db.data, &db.expires);
                if (volatile && expires.is_empty()) || data.is_empty() {
                    return None;
                }

                // Keys deleted (or made persistent) after they were pooled
                // would otherwise crowd out fresh samples.
                db.eviction_pool.retain(|key| {
                    if volatile {
                        expires.contains(key)
                    } else {
                        data.contains(key)
                    }
                });
                eviction_pool_populate(db, volatile, limits.samples);

                while let Some(key) = db.eviction_pool.pop_idlest() {
                    let live = if volatile {
                        db.expires.contains(&key[..])
                    } else {
                        db.data.contains(&key[..])
                    };
                    if live {
                        return Some(key);
                    }
                }
            }
            None
        }
        MaxMemoryPolicy::VolatileTtl => db
            .expires
            .sample(limits.samples.max(1))
            .into_iter()
            .min_by_key(|(_, when)| **when)
            .map(|(k, _)| k.clone()),
    }
}

/// Evicts keys until used memory is back under the ceiling.
///
/// Returns `Ok` when no ceiling is set, usage is already under it, or enough
/// memory was reclaimed. Returns [`EvictionError::OutOfMemory`] when the
/// policy forbids eviction or no more candidates can be found.
pub fn free_memory_if_needed(
    db: &mut Keyspace,
    limits: &MemoryLimits,
    memory: &dyn MemoryUsage,
) -> Result<EvictionReport, EvictionError> {
    let mut report = EvictionReport::default();

    if limits.maxmemory == 0 {
        return Ok(report);
    }

    let used = memory.used_memory(db);
    if used <= limits.maxmemory {
        return Ok(report);
    }

    if limits.policy == MaxMemoryPolicy::NoEviction {
        return Err(EvictionError::OutOfMemory {
            used,
            maxmemory: limits.maxmemory,
        });
    }

    let to_free = used - limits.maxmemory;
    while report.bytes_freed < to_free {
        let Some(victim) = select_victim(db, limits) else {
            let used = memory.used_memory(db);
            warn!(
                policy = %limits.policy,
                evicted = report.evicted,
                used,
                maxmemory = limits.maxmemory,
                "No eviction candidate left"
            );
            return Err(EvictionError::OutOfMemory {
                used,
                maxmemory: limits.maxmemory,
            });
        };

        let before = memory.used_memory(db);
        db.delete(&victim);
        let after = memory.used_memory(db);

        db.stats.evicted_keys += 1;
        report.evicted += 1;
        report.bytes_freed += before.saturating_sub(after);
        trace!(key = ?victim, policy = %limits.policy, "Evicted key");
    }

    debug!(
        policy = %limits.policy,
        evicted = report.evicted,
        bytes_freed = report.bytes_freed,
        "Eviction reclaimed memory"
    );
    Ok(report)
}
