//! Shared data model for the routing pipeline.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UserTier {
    Free,
    Pro,
    Enterprise,
}

impl UserTier {
    /// Free=0, Pro=1, Enterprise=2; a candidate model is accessible to a user
    /// when `user.level() >= model.tier_floor.level()`.
    pub fn level(self) -> u8 {
        match self {
            UserTier::Free => 0,
            UserTier::Pro => 1,
            UserTier::Enterprise => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// Immutable per-request routing input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingContext {
    pub task: String,
    pub tier: UserTier,
    pub priority: Priority,
    pub latency_budget_ms: u64,
    pub token_budget: Option<u64>,
    pub required_capabilities: Option<HashSet<String>>,
}

/// A registered backend. Lifecycle: registered at startup, `available`
/// mutated by health checks, never removed while referenced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub tier_floor: UserTier,
    pub avg_latency_target_ms: f64,
    pub cost_per_token: f64,
    pub capabilities: HashSet<String>,
    pub available: bool,
}

/// Per-model running performance, updated after every completed call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPerformanceRecord {
    pub model_name: String,
    pub ema_latency_ms: f64,
    pub ema_cost: f64,
    pub usage_count: u64,
    pub error_count: u64,
    pub last_used: DateTime<Utc>,
    pub token_efficiency: f64,
    pub complexity_fit_score: f64,
}

impl ModelPerformanceRecord {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ema_latency_ms: 0.0,
            ema_cost: 0.0,
            usage_count: 0,
            error_count: 0,
            last_used: Utc::now(),
            token_efficiency: 1.0,
            complexity_fit_score: 0.5,
        }
    }

    /// Derived success rate; undefined calls (usage_count == 0) read as 1.0
    /// so a brand-new model isn't penalized before it has any history.
    pub fn success_rate(&self) -> f64 {
        if self.usage_count == 0 {
            1.0
        } else {
            1.0 - (self.error_count as f64 / self.usage_count as f64)
        }
    }

    pub fn record(&mut self, latency_ms: f64, cost: f64, success: bool) {
        const ALPHA: f64 = 0.1;
        self.ema_latency_ms = if self.usage_count == 0 {
            latency_ms
        } else {
            ALPHA * latency_ms + (1.0 - ALPHA) * self.ema_latency_ms
        };
        self.ema_cost = if self.usage_count == 0 {
            cost
        } else {
            ALPHA * cost + (1.0 - ALPHA) * self.ema_cost
        };
        self.usage_count += 1;
        if !success {
            self.error_count += 1;
        }
        self.last_used = Utc::now();
    }
}

/// Routing cache row; key is the digest produced by `cache_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingCacheEntry {
    pub key: String,
    pub model_name: String,
    pub created_at: DateTime<Utc>,
    pub access_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub model_name: String,
    pub confidence: f64,
    pub reason: String,
    pub routing_time_ms: f64,
    pub from_cache: bool,
    /// Set only by the fallback cascade, never by ordinary scoring or a
    /// cache hit — callers should branch on this instead of the
    /// human-readable `reason` text.
    pub fallback_used: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("no models available for routing")]
    NoModelsAvailable,
    #[error("cache error: {0}")]
    Cache(#[from] modelmesh_cache::CacheError),
}
