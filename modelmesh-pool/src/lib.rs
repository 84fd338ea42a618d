//! Tier-limited, reconnecting connection pool over a persistent KV store.
//!
//! A sled-backed handle pool whose min/max size is governed by caller
//! tier rather than a single fixed size, and whose `execute` wraps
//! acquire/release with reconnect-on-transient-error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserTier {
    Free,
    Pro,
    Enterprise,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool is shutting down")]
    PoolShuttingDown,
    #[error("timed out waiting for a connection")]
    AcquireTimeout,
    #[error("backend error: {0}")]
    Backend(String),
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
}

#[derive(Debug, Clone)]
pub struct TierLimits {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub tier_limits: HashMap<UserTier, TierLimits>,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
    pub retry_attempts: u32,
    pub backoff_base: Duration,
    pub eviction_period: Duration,
    pub max_errors_before_evict: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let mut tier_limits = HashMap::new();
        tier_limits.insert(UserTier::Free, TierLimits { min: 1, max: 2 });
        tier_limits.insert(UserTier::Pro, TierLimits { min: 2, max: 10 });
        tier_limits.insert(
            UserTier::Enterprise,
            TierLimits { min: 5, max: 50 },
        );
        Self {
            tier_limits,
            idle_timeout: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(5),
            retry_attempts: 3,
            backoff_base: Duration::from_secs(1),
            eviction_period: Duration::from_secs(30),
            max_errors_before_evict: 5,
        }
    }
}

/// A single pooled backend connection. All connections in a pool share the
/// one underlying `sled::Db` for that tier (concurrency is what the pool
/// limits, not which store a connection can see); callers go through
/// `execute` rather than touching `db` directly so retry/reconnect
/// semantics stay centralized.
struct Connection {
    id: u64,
    db: Arc<sled::Db>,
    last_used: Mutex<Instant>,
    error_count: AtomicU32,
}

/// A checked-out handle. Dropping it releases the slot back to the pool.
pub struct Handle {
    conn: Arc<Connection>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Handle {
    pub fn id(&self) -> u64 {
        self.conn.id
    }

    pub fn store(&self, key: &str, value: &[u8]) -> Result<(), PoolError> {
        self.conn.db.insert(key, value)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PoolError> {
        Ok(self.conn.db.get(key)?.map(|v| v.to_vec()))
    }

    pub fn delete(&self, key: &str) -> Result<(), PoolError> {
        self.conn.db.remove(key)?;
        Ok(())
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        *self.conn.last_used.lock() = Instant::now();
        self.pool.idle.push(self.conn.clone());
        self.pool.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct PoolInner {
    db: Arc<sled::Db>,
    limits: TierLimits,
    idle: idle_stack::Stack<Arc<Connection>>,
    next_id: AtomicU64,
    active: AtomicU32,
    semaphore: Arc<Semaphore>,
    shutting_down: std::sync::atomic::AtomicBool,
}

/// A minimal concurrent bag of idle connections, keyed by insertion order.
mod idle_stack {
    use super::*;

    pub struct Stack<T> {
        items: DashMap<u64, T>,
        seq: AtomicU64,
    }

    impl<T> Stack<T> {
        pub fn new() -> Self {
            Self {
                items: DashMap::new(),
                seq: AtomicU64::new(0),
            }
        }

        pub fn push(&self, item: T) {
            let id = self.seq.fetch_add(1, Ordering::SeqCst);
            self.items.insert(id, item);
        }

        pub fn pop(&self) -> Option<T> {
            let key = *self.items.iter().next()?.key();
            self.items.remove(&key).map(|(_, v)| v)
        }

        pub fn retain(&self, f: impl Fn(&T) -> bool) {
            self.items.retain(|_, v| f(v));
        }

        pub fn len(&self) -> usize {
            self.items.len()
        }
    }
}

/// Tier-limited, reconnecting connection pool.
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
    config: PoolConfig,
    eviction_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ConnectionPool {
    pub async fn new(
        data_dir: &std::path::Path,
        tier: UserTier,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        let limits = config
            .tier_limits
            .get(&tier)
            .cloned()
            .unwrap_or(TierLimits { min: 1, max: 2 });

        let db = Arc::new(sled::open(data_dir.join(format!("pool_{tier:?}")))?);

        let inner = Arc::new(PoolInner {
            db,
            limits: limits.clone(),
            idle: idle_stack::Stack::new(),
            next_id: AtomicU64::new(0),
            active: AtomicU32::new(0),
            semaphore: Arc::new(Semaphore::new(limits.max as usize)),
            shutting_down: std::sync::atomic::AtomicBool::new(false),
        });

        info!(min = limits.min, max = limits.max, "initializing connection pool");
        let pool = Self {
            inner,
            config,
            eviction_task: Mutex::new(None),
        };
        pool.initialize().await?;
        Ok(pool)
    }

    /// Pre-warm the pool up to the tier minimum.
    pub async fn initialize(&self) -> Result<(), PoolError> {
        for _ in 0..self.inner.limits.min {
            let conn = self.open_connection()?;
            self.inner.idle.push(Arc::new(conn));
        }
        Ok(())
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), PoolError> {
        let inner = self.inner.clone();
        let period = self.config.eviction_period;
        let idle_timeout = self.config.idle_timeout;
        let max_errors = self.config.max_errors_before_evict;
        let min = inner.limits.min;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if inner.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                let before = inner.idle.len();
                inner.idle.retain(|conn| {
                    let stale = conn.last_used.lock().elapsed() > idle_timeout;
                    let errored = conn.error_count.load(Ordering::Relaxed) > max_errors;
                    !(stale || errored)
                });
                let evicted = before.saturating_sub(inner.idle.len());
                if evicted > 0 {
                    debug!(evicted, "evicted idle/errored connections");
                }
                // Never drop below tier minimum.
                while (inner.idle.len() as u32) < min {
                    inner.idle.push(Arc::new(Connection {
                        id: inner.next_id.fetch_add(1, Ordering::SeqCst),
                        db: inner.db.clone(),
                        last_used: Mutex::new(Instant::now()),
                        error_count: AtomicU32::new(0),
                    }));
                }
            }
        });
        *self.eviction_task.lock() = Some(handle);
        Ok(())
    }

    fn open_connection(&self) -> Result<Connection, PoolError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(Connection {
            id,
            db: self.inner.db.clone(),
            last_used: Mutex::new(Instant::now()),
            error_count: AtomicU32::new(0),
        })
    }

    /// Acquire a handle: reuse an idle connection, open a new one if under
    /// max, or wait (bounded by `acquire_timeout`) for one to free up.
    pub async fn acquire(&self) -> Result<Handle, PoolError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(PoolError::PoolShuttingDown);
        }

        let permit = tokio::time::timeout(
            self.config.acquire_timeout,
            Arc::clone(&self.inner.semaphore).acquire_owned(),
        )
        .await
        .map_err(|_| PoolError::AcquireTimeout)?
        .map_err(|_| PoolError::PoolShuttingDown)?;

        let conn = match self.inner.idle.pop() {
            Some(conn) => conn,
            None => Arc::new(self.open_connection()?),
        };
        self.inner.active.fetch_add(1, Ordering::SeqCst);

        Ok(Handle {
            conn,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Acquire-use-release with reconnect-on-transient-error.
    pub async fn execute<F, T>(&self, f: F) -> Result<T, PoolError>
    where
        F: Fn(&Handle) -> Result<T, PoolError>,
    {
        let mut attempt = 0u32;
        loop {
            let handle = self.acquire().await?;
            match f(&handle) {
                Ok(v) => return Ok(v),
                Err(e) => {
                    let transient = is_connection_error(&e);
                    handle.conn.error_count.fetch_add(1, Ordering::Relaxed);
                    attempt += 1;
                    if !transient || attempt > self.config.retry_attempts {
                        return Err(e);
                    }
                    let backoff = self.config.backoff_base * 2u32.pow(attempt - 1);
                    warn!(attempt, ?backoff, "transient pool error, retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    pub fn active_count(&self) -> u32 {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub async fn shutdown(&self) -> Result<(), PoolError> {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        if let Some(handle) = self.eviction_task.lock().take() {
            handle.abort();
        }
        info!("connection pool shut down");
        Ok(())
    }
}

fn is_connection_error(e: &PoolError) -> bool {
    let msg = e.to_string().to_lowercase();
    ["database", "connection", "prepare", "locked"]
        .iter()
        .any(|needle| msg.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_and_releases_within_tier_max() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(
            ConnectionPool::new(dir.path(), UserTier::Free, PoolConfig::default())
                .await
                .unwrap(),
        );
        let h1 = pool.acquire().await.unwrap();
        let h2 = pool.acquire().await.unwrap();
        assert_eq!(pool.active_count(), 2);
        drop(h1);
        drop(h2);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn acquire_times_out_when_saturated() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PoolConfig::default();
        config.acquire_timeout = Duration::from_millis(50);
        let pool = Arc::new(ConnectionPool::new(dir.path(), UserTier::Free, config).await.unwrap());
        let _h1 = pool.acquire().await.unwrap();
        let _h2 = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::AcquireTimeout));
    }

    #[tokio::test]
    async fn store_and_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(
            ConnectionPool::new(dir.path(), UserTier::Pro, PoolConfig::default())
                .await
                .unwrap(),
        );
        let handle = pool.acquire().await.unwrap();
        handle.store("k", b"v").unwrap();
        assert_eq!(handle.get("k").unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn shutdown_rejects_further_acquires() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(
            ConnectionPool::new(dir.path(), UserTier::Free, PoolConfig::default())
                .await
                .unwrap(),
        );
        pool.shutdown().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::PoolShuttingDown));
    }
}
