use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::Error;
use crate::error::Result;

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<C: Clock> Clock for Arc<C> {
    fn now(&self) -> Instant {
        self.as_ref().now()
    }
}

/// Bounded, time-expiring set of recently seen keys.
///
/// Holds at most `capacity` entries, the least recently inserted one is evicted first. An entry
/// stops counting as present once its TTL elapsed, whether or not it was evicted yet. Lookups do
/// not refresh recency.
pub struct DedupCache<C = SystemClock> {
    // key -> absolute expiry
    entries: Mutex<LruCache<String, Instant>>,
    ttl: Duration,
    clock: C,
}

impl DedupCache<SystemClock> {
    pub fn new(capacity: i64, ttl: Duration) -> Result<Self> {
        Self::with_clock(capacity, ttl, SystemClock)
    }
}

impl<C: Clock> DedupCache<C> {
    pub fn with_clock(capacity: i64, ttl: Duration, clock: C) -> Result<Self> {
        let capacity = usize::try_from(capacity)
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| {
                Error::Config(format!(
                    "dedup cache capacity must be a positive integer, got {capacity}"
                ))
            })?;

        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            clock,
        })
    }

    /// Whether `key` is present and not expired.
    pub fn seen(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .lock()
            .peek(key)
            .is_some_and(|expiry| now <= *expiry)
    }

    /// Inserts or overwrites `key`, expiring `ttl` from now.
    pub fn record(&self, key: &str, ttl: Duration) {
        let expiry = self.clock.now() + ttl;
        self.entries.lock().put(key.to_string(), expiry);
    }

    /// Atomic `seen` + `record` with the default TTL. Returns true if `key` was already present,
    /// in which case the entry is left untouched.
    pub fn check_and_record(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        if entries.peek(key).is_some_and(|expiry| now <= *expiry) {
            return true;
        }
        entries.put(key.to_string(), now + self.ttl);
        false
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Entries physically held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
