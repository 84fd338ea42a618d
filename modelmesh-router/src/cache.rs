//! Routing decision cache: a capped, TTL'd front for the chosen model per
//! request fingerprint.
//!
//! Reuses [`modelmesh_cache::TwoLevelCache`] in memory-only mode for storage
//! and TTL/LRU eviction, adding an entry-count cap (≤1000) on top of the
//! cache's byte-budget eviction.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use modelmesh_cache::{CacheConfig, EvictionPolicy, TwoLevelCache};
use parking_lot::Mutex;

use crate::types::{Priority, RoutingCacheEntry, RoutingContext, UserTier};

pub struct RoutingCache {
    cache: Arc<TwoLevelCache>,
    order: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl RoutingCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cache = Arc::new(TwoLevelCache::new(
            CacheConfig {
                memory_budget_bytes: 16 * 1024 * 1024,
                eviction_policy: EvictionPolicy::Lru,
                persist_to_disk: false,
                default_ttl: ttl,
                cleanup_interval: Duration::from_secs(60),
                compress: false,
            },
            None,
        ));
        Self {
            cache,
            order: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub async fn get(&self, key: &str) -> Option<RoutingCacheEntry> {
        let value = self.cache.get(key).await.ok().flatten()?;
        serde_json::from_value(value).ok()
    }

    pub async fn put(&self, key: &str, model_name: &str) {
        let entry = RoutingCacheEntry {
            key: key.to_string(),
            model_name: model_name.to_string(),
            created_at: Utc::now(),
            access_count: 0,
        };
        let value = serde_json::to_value(&entry).expect("routing cache entry serializes");
        let _ = self.cache.set(key, value, None, None).await;

        let mut order = self.order.lock();
        if !order.contains(&key.to_string()) {
            order.push_back(key.to_string());
        }
        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                let cache = self.cache.clone();
                tokio::spawn(async move {
                    let _ = cache.delete(&oldest).await;
                });
            }
        }
    }
}

/// `blake3(task-prefix-50 | tier | priority | latency_budget)`, truncated to
/// the first 32 hex characters.
pub fn cache_key(context: &RoutingContext) -> String {
    let prefix: String = context.task.chars().take(50).collect();
    let tier = match context.tier {
        UserTier::Free => "free",
        UserTier::Pro => "pro",
        UserTier::Enterprise => "enterprise",
    };
    let priority = match context.priority {
        Priority::Low => "low",
        Priority::Medium => "medium",
        Priority::High => "high",
        Priority::Critical => "critical",
    };
    let material = format!("{prefix}|{tier}|{priority}|{}", context.latency_budget_ms);
    let digest = blake3::hash(material.as_bytes()).to_hex();
    digest[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(task: &str) -> RoutingContext {
        RoutingContext {
            task: task.to_string(),
            tier: UserTier::Pro,
            priority: Priority::Medium,
            latency_budget_ms: 1500,
            token_budget: None,
            required_capabilities: None,
        }
    }

    #[test]
    fn cache_key_is_deterministic_and_32_chars() {
        let a = cache_key(&ctx("summarize report"));
        let b = cache_key(&ctx("summarize report"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn cache_key_differs_on_task() {
        assert_ne!(cache_key(&ctx("summarize report")), cache_key(&ctx("write code")));
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = RoutingCache::new(10, Duration::from_secs(300));
        cache.put("k", "gemini-2.5-flash").await;
        let entry = cache.get("k").await.unwrap();
        assert_eq!(entry.model_name, "gemini-2.5-flash");
    }
}
