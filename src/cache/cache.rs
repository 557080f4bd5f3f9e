//! Two-tier Response Cache (spec.md §4.6, component C6)
//!
//! An in-memory LRU map in front of a content-addressed [`BlobStore`] disk
//! tier. `get` consults memory first, falls through to disk on miss, and
//! promotes disk hits back into memory. `put` writes memory synchronously
//! and schedules the disk write on a background task.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::ports::{BlobStore, Clock};

/// Errors raised by the Response Cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The disk tier failed to read or write.
    #[error("cache disk I/O error: {0}")]
    Disk(#[from] crate::ports::blob::BlobStoreError),
}

/// Tunables for the Response Cache (spec.md §4.6 defaults).
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Maximum entries held in the in-memory LRU tier.
    pub memory_capacity: usize,
    /// Time-to-live applied to every inserted entry.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 500,
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    value: String,
    created_at_millis: u64,
    ttl_millis: u64,
}

impl StoredEntry {
    fn is_expired(&self, now_millis: u64) -> bool {
        now_millis.saturating_sub(self.created_at_millis) >= self.ttl_millis
    }
}

#[derive(Default)]
struct MemoryTier {
    entries: HashMap<String, StoredEntry>,
    recency: VecDeque<String>,
}

impl MemoryTier {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(pos);
        }
        self.recency.push_back(key.to_string());
    }

    fn insert(&mut self, key: String, entry: StoredEntry, capacity: usize) {
        self.entries.insert(key.clone(), entry);
        self.touch(&key);
        while self.entries.len() > capacity {
            if let Some(oldest) = self.recency.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }
}

/// Point-in-time cache counters (spec.md §4.6 "Stats").
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct CacheStats {
    /// Hits served directly from the memory tier.
    pub memory_hits: u64,
    /// Hits served from disk (and promoted into memory).
    pub disk_hits: u64,
    /// Lookups that found nothing in either tier (or found an expired entry).
    pub misses: u64,
    /// `memory_hits / (memory_hits + disk_hits + misses)`, or `0.0` if empty.
    pub hit_rate: f64,
    /// Current number of entries held in memory.
    pub memory_size: usize,
    /// Number of keys currently present on disk.
    pub disk_size: usize,
}

struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            memory_hits: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

/// The Response Cache.
pub struct ResponseCache {
    memory: Mutex<MemoryTier>,
    disk: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    counters: Counters,
}

impl ResponseCache {
    /// Creates a new, empty cache over `disk`.
    #[must_use]
    pub fn new(config: CacheConfig, disk: Arc<dyn BlobStore>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            memory: Mutex::new(MemoryTier::default()),
            disk,
            clock,
            config,
            counters: Counters::default(),
        })
    }

    fn now_millis(&self) -> u64 {
        self.clock
            .now()
            .as_system_time()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    /// Looks up `fingerprint`, consulting memory then disk.
    ///
    /// # Errors
    /// Returns [`CacheError`] if the disk tier fails to read.
    #[instrument(skip(self))]
    pub async fn get(self: &Arc<Self>, fingerprint: &str) -> Result<Option<String>, CacheError> {
        let now = self.now_millis();

        {
            let mut mem = self.memory.lock().await;
            if let Some(entry) = mem.entries.get(fingerprint).cloned() {
                if entry.is_expired(now) {
                    mem.entries.remove(fingerprint);
                } else {
                    mem.touch(fingerprint);
                    self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.value));
                }
            }
        }

        let Some(bytes) = self.disk.read(fingerprint).await? else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let entry: StoredEntry = match serde_json::from_slice(&bytes) {
            Ok(e) => e,
            Err(_) => {
                // Corruption policy: delete and treat as a miss, no recovery attempted.
                warn!(fingerprint, "disk cache entry failed to deserialise, deleting");
                let _ = self.disk.delete(fingerprint).await;
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        if entry.is_expired(now) {
            let _ = self.disk.delete(fingerprint).await;
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
        let value = entry.value.clone();
        let mut mem = self.memory.lock().await;
        mem.insert(fingerprint.to_string(), entry, self.config.memory_capacity);
        Ok(Some(value))
    }

    /// Inserts `value` under `fingerprint`, evicting the least-recently-used
    /// memory entry on overflow and scheduling an asynchronous disk write.
    pub async fn put(self: &Arc<Self>, fingerprint: String, value: String) {
        let entry = StoredEntry {
            value,
            created_at_millis: self.now_millis(),
            ttl_millis: u64::try_from(self.config.ttl.as_millis()).unwrap_or(u64::MAX),
        };

        {
            let mut mem = self.memory.lock().await;
            mem.insert(fingerprint.clone(), entry.clone(), self.config.memory_capacity);
        }

        let disk = Arc::clone(&self.disk);
        tokio::spawn(async move {
            if let Ok(bytes) = serde_json::to_vec(&entry) {
                if let Err(e) = disk.write(&fingerprint, bytes).await {
                    warn!(fingerprint, error = %e, "failed to persist cache entry to disk");
                }
            }
        });
    }

    /// Returns a snapshot of cache counters.
    pub async fn stats(&self) -> CacheStats {
        let memory_hits = self.counters.memory_hits.load(Ordering::Relaxed);
        let disk_hits = self.counters.disk_hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = memory_hits + disk_hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            (memory_hits + disk_hits) as f64 / total as f64
        };
        let memory_size = self.memory.lock().await.entries.len();
        let disk_size = self.disk.list("").await.map(|v| v.len()).unwrap_or(0);
        CacheStats {
            memory_hits,
            disk_hits,
            misses,
            hit_rate,
            memory_size,
            disk_size,
        }
    }

    /// Clears every counter. Does not evict stored entries.
    pub fn clear_stats(&self) {
        self.counters.memory_hits.store(0, Ordering::Relaxed);
        self.counters.disk_hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::blob::InMemoryBlobStore;
    use crate::ports::clock::TestClock;

    fn cache(config: CacheConfig) -> (Arc<ResponseCache>, Arc<TestClock>) {
        let clock = Arc::new(TestClock::new());
        let disk = Arc::new(InMemoryBlobStore::new());
        (
            ResponseCache::new(config, disk, Arc::clone(&clock) as Arc<dyn Clock>),
            clock,
        )
    }

    #[tokio::test]
    async fn put_then_get_is_a_memory_hit() {
        let (cache, _clock) = cache(CacheConfig::default());
        cache.put("fp1".to_string(), "cached-plan".to_string()).await;
        assert_eq!(cache.get("fp1").await.unwrap(), Some("cached-plan".to_string()));
        assert_eq!(cache.stats().await.memory_hits, 1);
    }

    #[tokio::test]
    async fn miss_on_unknown_fingerprint() {
        let (cache, _clock) = cache(CacheConfig::default());
        assert_eq!(cache.get("nope").await.unwrap(), None);
        assert_eq!(cache.stats().await.misses, 1);
    }

    #[tokio::test]
    async fn expired_entry_is_treated_as_a_miss() {
        let (cache, clock) = cache(CacheConfig {
            ttl: Duration::from_millis(10),
            ..CacheConfig::default()
        });
        cache.put("fp1".to_string(), "value".to_string()).await;
        clock.advance(Duration::from_millis(50));
        assert_eq!(cache.get("fp1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_eviction_respects_capacity() {
        let (cache, _clock) = cache(CacheConfig {
            memory_capacity: 2,
            ..CacheConfig::default()
        });
        cache.put("a".to_string(), "1".to_string()).await;
        cache.put("b".to_string(), "2".to_string()).await;
        cache.put("c".to_string(), "3".to_string()).await;
        let stats = cache.stats().await;
        assert_eq!(stats.memory_size, 2);
    }

    #[tokio::test]
    async fn disk_hit_is_promoted_into_memory() {
        let clock = Arc::new(TestClock::new());
        let disk = Arc::new(InMemoryBlobStore::new());
        let cache = ResponseCache::new(
            CacheConfig::default(),
            Arc::clone(&disk) as Arc<dyn BlobStore>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        cache.put("fp1".to_string(), "value".to_string()).await;
        // Allow the spawned disk write to complete.
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Build a second cache sharing the same disk tier but empty memory.
        let cache2 = ResponseCache::new(
            CacheConfig::default(),
            disk,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        assert_eq!(cache2.get("fp1").await.unwrap(), Some("value".to_string()));
        assert_eq!(cache2.stats().await.disk_hits, 1);
    }
}
