//! Cache store trait and the in-memory implementation.

use crate::config::CacheConfig;
use crate::errors::CacheError;
use crate::utils::{now_utc, Timestamp};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Presence record for one cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key.
    pub key: String,
    /// Size accounted against the store ceiling.
    pub size_bytes: u64,
    /// When the entry was (re)written.
    pub created_at: Timestamp,
    /// When the entry was last hit.
    pub last_accessed: Timestamp,
    /// Number of hits.
    pub hits: u64,
}

impl CacheEntry {
    fn new(key: &str, size_bytes: u64) -> Self {
        let now = now_utc();
        Self {
            key: key.to_string(),
            size_bytes,
            created_at: now,
            last_accessed: now,
            hits: 0,
        }
    }

    /// Returns true if the entry is at least `max_age_ms` old at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp, max_age_ms: u64) -> bool {
        let age = (now - self.created_at).num_milliseconds();
        u64::try_from(age).map_or(false, |age| age >= max_age_ms)
    }
}

/// Aggregate counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Live entries.
    pub entries: usize,
    /// Sum of entry sizes.
    pub total_size_bytes: u64,
    /// Hits across live entries.
    pub total_hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
    /// Entries removed by size or age bounds.
    pub evictions: u64,
}

impl CacheStats {
    /// Hit ratio over all lookups, 0.0 when nothing was looked up.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.total_hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.total_hits as f64 / lookups as f64
        }
    }
}

/// Storage backend for the skip-step cache.
///
/// Implementations must be safe to call from many jobs at once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Looks up a key, counting a hit or a miss.
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Records a key with its size, evicting to stay within bounds.
    async fn put(&self, key: &str, size_bytes: u64);

    /// Current counters.
    async fn stats(&self) -> CacheStats;

    /// Removes every entry and resets the miss and eviction counters.
    async fn clear(&self);
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_size: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_size = self.total_size.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn evict_expired(&mut self, now: Timestamp, max_age_ms: u64) {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.is_expired(now, max_age_ms))
            .map(|e| e.key.clone())
            .collect();
        for key in expired {
            self.remove(&key);
            self.evictions += 1;
            debug!(key = %key, "Evicted expired cache entry");
        }
    }

    fn least_recently_used(&self, except: &str) -> Option<String> {
        self.entries
            .values()
            .filter(|e| e.key != except)
            .min_by_key(|e| e.last_accessed)
            .map(|e| e.key.clone())
    }
}

/// In-memory cache store with size and age bounds.
#[derive(Debug)]
pub struct InMemoryCacheStore {
    max_size_bytes: u64,
    max_age_ms: u64,
    state: Mutex<CacheState>,
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl InMemoryCacheStore {
    /// Creates a store bounded by the given config.
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            max_size_bytes: config.max_size_bytes,
            max_age_ms: config.max_age_ms,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Returns true if the key is present, without touching counters.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let now = now_utc();
        let mut state = self.state.lock();

        let expired = match state.entries.get(key) {
            None => {
                state.misses += 1;
                return Ok(None);
            }
            Some(entry) => entry.is_expired(now, self.max_age_ms),
        };

        if expired {
            state.remove(key);
            state.evictions += 1;
            state.misses += 1;
            debug!(key = %key, "Cache entry expired on lookup");
            return Ok(None);
        }

        let entry = state
            .entries
            .get_mut(key)
            .ok_or_else(|| CacheError::corrupted(key, "entry vanished during lookup"))?;
        entry.hits += 1;
        entry.last_accessed = now;
        Ok(Some(entry.clone()))
    }

    async fn put(&self, key: &str, size_bytes: u64) {
        let now = now_utc();
        let mut state = self.state.lock();

        let hits = state.remove(key).map_or(0, |old| old.hits);
        let mut entry = CacheEntry::new(key, size_bytes);
        entry.hits = hits;
        state.entries.insert(key.to_string(), entry);
        state.total_size += size_bytes;

        state.evict_expired(now, self.max_age_ms);

        while state.total_size > self.max_size_bytes {
            match state.least_recently_used(key) {
                Some(victim) => {
                    state.remove(&victim);
                    state.evictions += 1;
                    debug!(key = %victim, "Evicted cache entry to respect size ceiling");
                }
                None => {
                    warn!(
                        key = %key,
                        size_bytes,
                        max_size_bytes = self.max_size_bytes,
                        "Cache entry larger than the store ceiling; not retained"
                    );
                    state.remove(key);
                    state.evictions += 1;
                    break;
                }
            }
        }
    }

    async fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            total_size_bytes: state.total_size,
            total_hits: state.entries.values().map(|e| e.hits).sum(),
            misses: state.misses,
            evictions: state.evictions,
        }
    }

    async fn clear(&self) {
        *self.state.lock() = CacheState::default();
    }
}
