//! In-memory render cache.
//!
//! Entries are keyed by request fingerprint, expire after a fixed TTL and are
//! evicted oldest-created-first once the entry bound is exceeded. Reads never
//! refresh an entry, so this is creation-order eviction rather than LRU.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use tracing::debug;

use crate::application::render::{Fingerprint, RenderResult};

use super::clock::{Clock, SystemClock};
use super::config::CacheConfig;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_CACHE_HIT: &str = "chartd_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "chartd_cache_miss_total";
pub(crate) const METRIC_CACHE_EXPIRED: &str = "chartd_cache_expired_total";
pub(crate) const METRIC_CACHE_EVICT: &str = "chartd_cache_evict_total";
pub(crate) const METRIC_CACHE_ENTRIES: &str = "chartd_cache_entries";

struct CacheEntry {
    result: RenderResult,
    created_at: Instant,
    sequence: u64,
}

/// Entry map plus a creation-order index. `(created_at, sequence)` is unique per
/// entry; the sequence breaks ties between entries created at the same instant.
#[derive(Default)]
struct Entries {
    by_key: HashMap<Fingerprint, CacheEntry>,
    by_age: BTreeMap<(Instant, u64), Fingerprint>,
    next_sequence: u64,
}

impl Entries {
    fn remove(&mut self, key: &Fingerprint) -> Option<CacheEntry> {
        let entry = self.by_key.remove(key)?;
        self.by_age.remove(&(entry.created_at, entry.sequence));
        Some(entry)
    }

    fn insert(&mut self, key: Fingerprint, result: RenderResult, created_at: Instant) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.by_age.insert((created_at, sequence), key.clone());
        self.by_key.insert(
            key,
            CacheEntry {
                result,
                created_at,
                sequence,
            },
        );
    }

    /// Drop every entry whose age exceeds `ttl`. The age index is ordered, so the
    /// walk stops at the first live entry.
    fn purge_expired(&mut self, now: Instant, ttl: Duration) -> usize {
        let mut purged = 0;
        while let Some((&(created_at, _), _)) = self.by_age.first_key_value() {
            if !is_expired(created_at, now, ttl) {
                break;
            }
            if let Some((_, key)) = self.by_age.pop_first() {
                self.by_key.remove(&key);
                purged += 1;
            }
        }
        purged
    }

    fn evict_oldest(&mut self) -> Option<Fingerprint> {
        let (_, key) = self.by_age.pop_first()?;
        self.by_key.remove(&key);
        Some(key)
    }
}

fn is_expired(created_at: Instant, now: Instant, ttl: Duration) -> bool {
    now.saturating_duration_since(created_at) > ttl
}

/// Process-local cache of rendered charts.
pub struct RenderCache {
    ttl: Duration,
    max_entries: NonZeroUsize,
    clock: Arc<dyn Clock>,
    entries: RwLock<Entries>,
}

impl RenderCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: config.ttl,
            max_entries: config.max_entries_non_zero(),
            clock,
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Return the cached result for `key` if it exists and has not expired.
    /// An expired entry is removed and reported as a miss.
    pub fn lookup(&self, key: &Fingerprint) -> Option<RenderResult> {
        let now = self.clock.now();
        {
            let entries = rw_read(&self.entries, SOURCE, "lookup");
            match entries.by_key.get(key) {
                None => {
                    counter!(METRIC_CACHE_MISS).increment(1);
                    return None;
                }
                Some(entry) if !is_expired(entry.created_at, now, self.ttl) => {
                    counter!(METRIC_CACHE_HIT).increment(1);
                    return Some(entry.result.clone());
                }
                Some(_) => {}
            }
        }

        // Re-check under the write lock: a concurrent store may have replaced it.
        let mut entries = rw_write(&self.entries, SOURCE, "lookup.expire");
        let fresh = entries
            .by_key
            .get(key)
            .filter(|entry| !is_expired(entry.created_at, now, self.ttl))
            .map(|entry| entry.result.clone());
        if fresh.is_some() {
            counter!(METRIC_CACHE_HIT).increment(1);
            return fresh;
        }

        if entries.remove(key).is_some() {
            counter!(METRIC_CACHE_EXPIRED).increment(1);
            debug!(
                target_module = SOURCE,
                fingerprint = key.short(),
                "expired render cache entry removed on lookup"
            );
        }
        gauge!(METRIC_CACHE_ENTRIES).set(entries.by_key.len() as f64);
        counter!(METRIC_CACHE_MISS).increment(1);
        None
    }

    /// Insert `result` under `key`, replacing any previous entry, then sweep
    /// expired entries and evict the oldest until the bound holds.
    pub fn store(&self, key: Fingerprint, result: RenderResult) {
        let now = self.clock.now();
        let mut entries = rw_write(&self.entries, SOURCE, "store");

        entries.remove(&key);
        entries.insert(key, result, now);

        let expired = entries.purge_expired(now, self.ttl);
        if expired > 0 {
            counter!(METRIC_CACHE_EXPIRED).increment(expired as u64);
        }

        while entries.by_key.len() > self.max_entries.get() {
            match entries.evict_oldest() {
                Some(evicted) => {
                    counter!(METRIC_CACHE_EVICT).increment(1);
                    debug!(
                        target_module = SOURCE,
                        fingerprint = evicted.short(),
                        "render cache entry evicted at capacity"
                    );
                }
                None => break,
            }
        }

        gauge!(METRIC_CACHE_ENTRIES).set(entries.by_key.len() as f64);
    }

    /// Remove all expired entries. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = rw_write(&self.entries, SOURCE, "purge_expired");
        let purged = entries.purge_expired(now, self.ttl);
        if purged > 0 {
            counter!(METRIC_CACHE_EXPIRED).increment(purged as u64);
        }
        gauge!(METRIC_CACHE_ENTRIES).set(entries.by_key.len() as f64);
        purged
    }

    pub fn contains(&self, key: &Fingerprint) -> bool {
        rw_read(&self.entries, SOURCE, "contains")
            .by_key
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries.get()
    }
}
