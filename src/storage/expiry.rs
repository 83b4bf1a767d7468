//! Active Expiry
//!
//! Lazy expiry (checking on access) is cheap but leaves behind keys that
//! expire and are never read again. The active expire cycle runs from the
//! server tick and cleans those up.
//!
//! ## Algorithm
//!
//! Each cycle repeatedly samples a batch of keys from the expiry dictionary
//! and deletes the ones whose deadline has passed:
//!
//! 1. Sample up to `lookups_per_loop` keys with an expiry.
//! 2. Delete every sampled key with `now > when`.
//! 3. If a quarter or more of the batch was expired, the keyspace probably
//!    holds many more stale keys, so run another batch.
//!
//! The whole cycle is time-boxed to a percentage of the tick period so a
//! keyspace full of expiring keys cannot stall the event loop.

use crate::storage::db::Keyspace;
use bytes::Bytes;
use tracing::{debug, trace};

/// Keys sampled per batch.
pub const ACTIVE_EXPIRE_CYCLE_LOOKUPS_PER_LOOP: usize = 20;

/// Share of each tick period (in percent) the cycle may use.
pub const ACTIVE_EXPIRE_CYCLE_SLOW_TIME_PERC: u64 = 25;

/// Tuning for the active expire cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryConfig {
    /// Server ticks per second
    pub hz: u32,

    /// Percentage of each tick the cycle may spend
    pub slow_time_perc: u64,

    /// Keys sampled per batch
    pub lookups_per_loop: usize,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            hz: 10,
            slow_time_perc: ACTIVE_EXPIRE_CYCLE_SLOW_TIME_PERC,
            lookups_per_loop: ACTIVE_EXPIRE_CYCLE_LOOKUPS_PER_LOOP,
        }
    }
}

impl ExpiryConfig {
    /// Creates the default tuning for a server ticking `hz` times per second.
    pub fn with_hz(hz: u32) -> Self {
        Self {
            hz: hz.max(1),
            ..Default::default()
        }
    }

    /// Time budget of one cycle in microseconds.
    pub fn time_limit_us(&self) -> i64 {
        let limit = 1_000_000 * self.slow_time_perc / u64::from(self.hz.max(1)) / 100;
        limit.max(1) as i64
    }
}

/// What one cycle did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExpireCycleStats {
    pub batches: usize,
    pub sampled: usize,
    pub expired: usize,
    /// Largest number of keys expired by a single batch
    pub max_batch: usize,
    pub elapsed_us: i64,
    /// The cycle stopped because it ran out of time
    pub timed_out: bool,
}

/// Runs one time-boxed active expire cycle.
pub fn active_expire_cycle(db: &mut Keyspace, config: &ExpiryConfig) -> ExpireCycleStats {
    let start = db.now_us();
    let limit = config.time_limit_us();
    let lookups = config.lookups_per_loop.max(1);
    let mut stats = ExpireCycleStats::default();

    loop {
        if db.volatile_len() == 0 {
            break;
        }

        let now = db.now_ms();
        let batch: Vec<(Bytes, i64)> = db
            .expires
            .sample(lookups)
            .into_iter()
            .map(|(key, when)| (key.clone(), *when))
            .collect();

        let mut expired = 0;
        for (key, when) in &batch {
            if now > *when && db.expire_key(key) {
                expired += 1;
            }
        }

        stats.batches += 1;
        stats.sampled += batch.len();
        stats.expired += expired;
        stats.max_batch = stats.max_batch.max(expired);
        trace!(sampled = batch.len(), expired, "Expire batch");

        stats.elapsed_us = db.now_us() - start;
        if stats.elapsed_us > limit {
            stats.timed_out = true;
            break;
        }
        if expired < lookups / 4 {
            break;
        }
    }

    stats.elapsed_us = db.now_us() - start;
    if stats.expired > 0 || stats.timed_out {
        debug!(
            db = db.id(),
            expired = stats.expired,
            batches = stats.batches,
            elapsed_us = stats.elapsed_us,
            timed_out = stats.timed_out,
            remaining = db.volatile_len(),
            "Active expire cycle"
        );
    }
    stats
}
