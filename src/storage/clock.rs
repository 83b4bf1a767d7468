//! Clocks
//!
//! Two notions of time are used by the keyspace:
//!
//! - A wall clock with millisecond and microsecond precision, used for expiry
//!   deadlines and for time-boxing the active expire cycle. It is injected
//!   through the [`Clock`] trait so tests can drive time by hand.
//! - A coarse LRU clock: wall time in seconds truncated to 24 bits. Every
//!   value object records the LRU clock of its last access, and the eviction
//!   engine derives idle times from it. The counter wraps after
//!   [`LRU_CLOCK_MAX`] ticks (about 194 days).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds per LRU clock tick.
pub const LRU_CLOCK_RESOLUTION: u64 = 1000;

/// Width of the LRU clock in bits.
pub const LRU_BITS: u32 = 24;

/// Largest value the LRU clock takes before wrapping to zero.
pub const LRU_CLOCK_MAX: u32 = (1 << LRU_BITS) - 1;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;

    /// Microseconds since the Unix epoch.
    fn now_us(&self) -> i64;
}

/// Shared handle to a clock.
pub type SharedClock = Arc<dyn Clock>;

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        self.now_us() / 1000
    }

    fn now_us(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicI64,
}

impl ManualClock {
    /// Creates a clock frozen at the given millisecond timestamp.
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_us: AtomicI64::new(now_ms * 1000),
        }
    }

    /// Moves the clock to an absolute millisecond timestamp.
    pub fn set_ms(&self, now_ms: i64) {
        self.now_us.store(now_ms * 1000, Ordering::SeqCst);
    }

    /// Moves the clock forward.
    pub fn advance_ms(&self, ms: i64) {
        self.now_us.fetch_add(ms * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_us() / 1000
    }

    fn now_us(&self) -> i64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

/// Converts a wall-clock time into an LRU clock reading.
#[inline]
pub fn lru_clock_at(now_ms: i64) -> u32 {
    ((now_ms.max(0) as u64 / LRU_CLOCK_RESOLUTION) & LRU_CLOCK_MAX as u64) as u32
}

/// Cached LRU clock.
///
/// The server refreshes the cached reading on every tick. When ticks are at
/// least as frequent as the clock resolution the cached value is accurate
/// enough and avoids a clock read on every key access; otherwise the clock
/// is computed on demand.
#[derive(Debug, Clone)]
pub struct LruClock {
    hz: u32,
    cached: u32,
}

impl LruClock {
    /// Creates an LRU clock for a server ticking `hz` times per second.
    pub fn new(hz: u32, now_ms: i64) -> Self {
        Self {
            hz: hz.max(1),
            cached: lru_clock_at(now_ms),
        }
    }

    /// Refreshes the cached reading.
    pub fn refresh(&mut self, now_ms: i64) {
        self.cached = lru_clock_at(now_ms);
    }

    /// Current LRU clock reading.
    pub fn current(&self, now_ms: i64) -> u32 {
        if 1000 / u64::from(self.hz) <= LRU_CLOCK_RESOLUTION {
            self.cached
        } else {
            lru_clock_at(now_ms)
        }
    }
}
