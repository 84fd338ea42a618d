//! Two-level (memory + persistent) cache with pluggable eviction policies.
//!
//! L1 is an in-memory `dashmap`; L2 is a [`modelmesh_pool::ConnectionPool`]
//! handle over sled-backed storage tiers. `get` checks L1 first, falls
//! through to L2 on miss, and promotes L2 hits back into L1 when the
//! placement predicate says the entry is memory-worthy. `set` always writes
//! L2 (when enabled) and conditionally writes L1.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use modelmesh_pool::ConnectionPool;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    Lru,
    Lfu,
    Adaptive,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Total bytes the L1 tier is allowed to hold; also the denominator for
    /// the 10%-of-budget placement-predicate check.
    pub memory_budget_bytes: usize,
    pub eviction_policy: EvictionPolicy,
    pub persist_to_disk: bool,
    pub default_ttl: Duration,
    pub cleanup_interval: Duration,
    pub compress: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: 64 * 1024 * 1024,
            eviction_policy: EvictionPolicy::Adaptive,
            persist_to_disk: true,
            default_ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(60),
            compress: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("pool error: {0}")]
    Pool(#[from] modelmesh_pool::PoolError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug)]
struct L1Entry {
    value: serde_json::Value,
    size: usize,
    created_at: DateTime<Utc>,
    last_accessed: Mutex<DateTime<Utc>>,
    access_count: AtomicU64Wrap,
    ttl: Duration,
    #[allow(dead_code)]
    namespace: Option<String>,
}

// DashMap values must be `Clone`; wrap the atomic so the struct can derive
// `Clone` while still letting concurrent readers bump the counter in place
// via interior mutability.
#[derive(Debug)]
struct AtomicU64Wrap(Arc<AtomicU64>);
impl Clone for AtomicU64Wrap {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
impl AtomicU64Wrap {
    fn new(v: u64) -> Self {
        Self(Arc::new(AtomicU64::new(v)))
    }
    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
    fn incr(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl L1Entry {
    fn is_expired(&self) -> bool {
        Utc::now() - self.created_at > chrono::Duration::from_std(self.ttl).unwrap_or_default()
    }
}

/// Row schema persisted to L2.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct L2Row {
    value: serde_json::Value,
    size: usize,
    ttl_ms: i64,
    created_at_epoch_ms: i64,
    last_accessed_epoch_ms: i64,
    hit_count: u64,
    namespace: Option<String>,
    compressed: bool,
}

#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub l1_entries: usize,
    pub total_size_bytes: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Memory-first, persistent-second cache.
pub struct TwoLevelCache {
    config: CacheConfig,
    l1: DashMap<String, L1Entry>,
    l2: Option<Arc<ConnectionPool>>,
    counters: Counters,
    /// Fed a copy of every evicted key; the orchestrator drains this to
    /// fan `CacheEvict` out onto its event bus. No-op if no one is
    /// listening (`set_eviction_notifier` was never called).
    eviction_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl TwoLevelCache {
    pub fn new(config: CacheConfig, l2: Option<Arc<ConnectionPool>>) -> Self {
        Self {
            config,
            l1: DashMap::new(),
            l2,
            counters: Counters {
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            },
            eviction_tx: Mutex::new(None),
        }
    }

    /// Register a channel to receive the key of every entry this cache
    /// evicts (LRU/LFU/Adaptive churn or TTL expiry), from now on.
    pub fn set_eviction_notifier(&self, tx: mpsc::UnboundedSender<String>) {
        *self.eviction_tx.lock() = Some(tx);
    }

    fn notify_evicted(&self, key: &str) {
        if let Some(tx) = self.eviction_tx.lock().as_ref() {
            let _ = tx.send(key.to_string());
        }
    }

    pub async fn start(self: &Arc<Self>) {
        let this = self.clone();
        let period = self.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                this.cleanup_expired();
            }
        });
    }

    fn cleanup_expired(&self) {
        let mut expired_keys = Vec::new();
        self.l1.retain(|key, e| {
            if e.is_expired() {
                expired_keys.push(key.clone());
                false
            } else {
                true
            }
        });
        if !expired_keys.is_empty() {
            self.counters
                .evictions
                .fetch_add(expired_keys.len() as u64, Ordering::Relaxed);
            debug!(evicted = expired_keys.len(), "background cleanup removed expired L1 entries");
            for key in &expired_keys {
                self.notify_evicted(key);
            }
        }
    }

    /// L1 first; on miss, L2; on L2 hit, promote into L1 if memory-worthy.
    pub async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        if let Some(entry) = self.l1.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.l1.remove(key);
            } else {
                entry.access_count.incr();
                *entry.last_accessed.lock() = Utc::now();
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.value.clone()));
            }
        }

        let Some(pool) = &self.l2 else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let key_owned = key.to_string();
        let raw = pool.execute(move |h| h.get(&key_owned)).await?;

        let Some(bytes) = raw else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let mut row: L2Row = decode_row(&bytes)?;
        let age = Utc::now().timestamp_millis() - row.created_at_epoch_ms;
        if age > row.ttl_ms {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        row.hit_count += 1;
        row.last_accessed_epoch_ms = Utc::now().timestamp_millis();
        self.write_l2_row(key, &row).await?;

        self.counters.hits.fetch_add(1, Ordering::Relaxed);

        if self.is_memory_worthy(row.size, row.hit_count) {
            self.insert_l1(
                key,
                row.value.clone(),
                row.size,
                Duration::from_millis(row.ttl_ms.max(0) as u64),
                row.namespace.clone(),
            );
        }

        Ok(Some(row.value))
    }

    /// Placement predicate: size <= 10% of the memory budget AND (access
    /// frequency > 5 OR available memory >= size).
    fn is_memory_worthy(&self, size: usize, access_frequency: u64) -> bool {
        if size as f64 > self.config.memory_budget_bytes as f64 * 0.10 {
            return false;
        }
        let used: usize = self.l1.iter().map(|e| e.size).sum();
        let available = self.config.memory_budget_bytes.saturating_sub(used);
        access_frequency > 5 || available >= size
    }

    pub async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
        namespace: Option<String>,
    ) -> Result<(), CacheError> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let size = estimate_size(&value);

        if self.l2.is_some() {
            let row = L2Row {
                value: value.clone(),
                size,
                ttl_ms: chrono::Duration::from_std(ttl)
                    .unwrap_or_default()
                    .num_milliseconds(),
                created_at_epoch_ms: Utc::now().timestamp_millis(),
                last_accessed_epoch_ms: Utc::now().timestamp_millis(),
                hit_count: 0,
                namespace: namespace.clone(),
                compressed: self.config.compress,
            };
            self.write_l2_row(key, &row).await?;
        }

        if self.is_memory_worthy(size, 0) {
            self.insert_l1(key, value, size, ttl, namespace);
        }
        Ok(())
    }

    fn insert_l1(
        &self,
        key: &str,
        value: serde_json::Value,
        size: usize,
        ttl: Duration,
        namespace: Option<String>,
    ) {
        self.evict_if_needed(size);
        self.l1.insert(
            key.to_string(),
            L1Entry {
                value,
                size,
                created_at: Utc::now(),
                last_accessed: Mutex::new(Utc::now()),
                access_count: AtomicU64Wrap::new(0),
                ttl,
                namespace,
            },
        );
    }

    fn evict_if_needed(&self, incoming_size: usize) {
        let used: usize = self.l1.iter().map(|e| e.size).sum();
        if used + incoming_size <= self.config.memory_budget_bytes {
            return;
        }

        let mut candidates: Vec<(String, DateTime<Utc>, u64)> = self
            .l1
            .iter()
            .map(|e| (e.key().clone(), *e.last_accessed.lock(), e.access_count.get()))
            .collect();
        candidates.sort_by_key(|(_, last_accessed, _)| *last_accessed);
        candidates.truncate(10.max(1));

        let victim = match self.config.eviction_policy {
            EvictionPolicy::Lru => candidates.first(),
            EvictionPolicy::Lfu => candidates.iter().min_by_key(|(_, _, count)| *count),
            EvictionPolicy::Adaptive => {
                let now = Utc::now();
                candidates.iter().min_by(|a, b| {
                    adaptive_score(a, now)
                        .partial_cmp(&adaptive_score(b, now))
                        .unwrap()
                })
            }
        };

        if let Some((key, ..)) = victim {
            let key = key.clone();
            self.l1.remove(&key);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            self.notify_evicted(&key);
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.l1.remove(key);
        if let Some(pool) = &self.l2 {
            let key_owned = key.to_string();
            pool.execute(move |h| h.delete(&key_owned)).await?;
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.l1.clear();
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            l1_entries: self.l1.len(),
            total_size_bytes: self.l1.iter().map(|e| e.size).sum(),
        }
    }

    async fn write_l2_row(&self, key: &str, row: &L2Row) -> Result<(), CacheError> {
        let Some(pool) = &self.l2 else { return Ok(()) };
        let bytes = encode_row(row, self.config.compress)?;
        let key_owned = key.to_string();
        pool.execute(move |h| h.store(&key_owned, &bytes)).await?;
        Ok(())
    }
}

/// 0.3*frequency + 0.7*recency^-1 over the 10 oldest-accessed candidates;
/// lower is evicted first.
fn adaptive_score(entry: &(String, DateTime<Utc>, u64), now: DateTime<Utc>) -> f64 {
    let (_, last_accessed, access_count) = entry;
    let recency_secs = (now - *last_accessed).num_seconds().max(1) as f64;
    0.3 * (*access_count as f64) + 0.7 * (1.0 / recency_secs)
}

fn estimate_size(value: &serde_json::Value) -> usize {
    value.to_string().len()
}

fn encode_row(row: &L2Row, compress: bool) -> Result<Vec<u8>, CacheError> {
    let mut row = row.clone();
    if compress {
        let plain = serde_json::to_vec(&row.value)?;
        let compressed = lz4_flex::compress_prepend_size(&plain);
        row.value = serde_json::Value::String(hex_encode(&compressed));
        row.compressed = true;
    }
    Ok(serde_json::to_vec(&row)?)
}

fn decode_row(bytes: &[u8]) -> Result<L2Row, CacheError> {
    let mut row: L2Row = serde_json::from_slice(bytes)?;
    if row.compressed {
        if let serde_json::Value::String(s) = &row.value {
            let compressed = hex_decode(s);
            let plain = lz4_flex::decompress_size_prepended(&compressed).unwrap_or_default();
            row.value = serde_json::from_slice(&plain).unwrap_or(serde_json::Value::Null);
        }
        row.compressed = false;
    }
    Ok(row)
}

// sled/lz4_flex work in raw bytes; the L2 row is JSON, so a compressed
// payload is hex-encoded to stay representable as a `serde_json::Value`.
fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
fn hex_decode(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .filter_map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelmesh_pool::{PoolConfig, UserTier};

    async fn pooled_cache(compress: bool) -> (Arc<TwoLevelCache>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(
            ConnectionPool::new(dir.path(), UserTier::Pro, PoolConfig::default())
                .await
                .unwrap(),
        );
        let cache = Arc::new(TwoLevelCache::new(
            CacheConfig {
                compress,
                ..CacheConfig::default()
            },
            Some(pool),
        ));
        (cache, dir)
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let (cache, _dir) = pooled_cache(false).await;
        cache
            .set("k", serde_json::json!({"v": 1}), None, None)
            .await
            .unwrap();
        let got = cache.get("k").await.unwrap();
        assert_eq!(got, Some(serde_json::json!({"v": 1})));
    }

    #[tokio::test]
    async fn l2_hit_promotes_into_l1_when_frequent() {
        let (cache, _dir) = pooled_cache(false).await;
        cache
            .set("k", serde_json::json!("v"), None, None)
            .await
            .unwrap();
        cache.l1.clear();
        assert!(cache.l1.get("k").is_none());
        cache.get("k").await.unwrap();
        assert!(cache.l1.get("k").is_some());
    }

    #[tokio::test]
    async fn delete_removes_from_both_tiers() {
        let (cache, _dir) = pooled_cache(false).await;
        cache.set("k", serde_json::json!(1), None, None).await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn compression_round_trips() {
        let (cache, _dir) = pooled_cache(true).await;
        let big = serde_json::json!({"data": "x".repeat(2000)});
        cache.set("k", big.clone(), None, None).await.unwrap();
        cache.l1.clear();
        let got = cache.get("k").await.unwrap();
        assert_eq!(got, Some(big));
    }

    #[tokio::test]
    async fn stats_track_hits_and_misses() {
        let (cache, _dir) = pooled_cache(false).await;
        cache.set("k", serde_json::json!(1), None, None).await.unwrap();
        cache.get("k").await.unwrap();
        cache.get("missing").await.unwrap();
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn memory_only_cache_works_without_l2() {
        let cache = TwoLevelCache::new(CacheConfig::default(), None);
        cache.set("k", serde_json::json!(1), None, None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(serde_json::json!(1)));
    }
}
