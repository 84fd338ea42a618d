//! Runtime configuration, loaded from layered, precedence-ordered sources
//! via the `config` crate's `File`/`Environment` sources, since every field
//! here is a flat, serde-friendly primitive (durations as `_secs`/`_ms`
//! integers) rather than the subsystem types' native `std::time::Duration`
//! fields.
//!
//! Each subsystem keeps its own config type with its own defaults; this
//! struct exists only to be the single serde-round-trippable surface a TOML
//! file or `MODELMESH__*` environment variable can address, and is bridged
//! into each subsystem's native config via the `to_*_config` methods below.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use modelmesh_cache::{CacheConfig, EvictionPolicy};
use modelmesh_consensus::ConsensusConfig;
use modelmesh_executor::ExecutorConfig;
use modelmesh_pool::{PoolConfig, TierLimits, UserTier as PoolUserTier};
use modelmesh_reputation::ReputationConfig;
use modelmesh_router::{RouterConfig, ScoringWeights};
use modelmesh_security::SecurityConfig;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierLimitSpec {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettings {
    pub eviction_policy: String,
    pub persist_to_disk: bool,
    pub default_ttl_secs: u64,
    pub memory_budget_bytes: usize,
    pub cleanup_interval_secs: u64,
    pub compress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSettings {
    pub tier_limits: HashMap<String, TierLimitSpec>,
    pub idle_timeout_secs: u64,
    pub acquire_timeout_secs: u64,
    pub retry_attempts: u32,
    pub backoff_base_ms: u64,
    pub eviction_period_secs: u64,
    pub max_errors_before_evict: u32,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationSettings {
    pub quarantine_threshold: f64,
    pub time_window_secs: u64,
    pub max_messages_per_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusSettings {
    pub fault_tolerance: f64,
    pub proposal_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySettings {
    pub require_verified_identity: bool,
}

/// Flat, serde-friendly configuration surface (`maxWorkers`,
/// `routingCacheTtl`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMeshConfig {
    pub max_workers: usize,
    pub max_concurrency: usize,
    pub spawn_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub retry_attempts: u32,
    pub backoff_base_ms: u64,
    pub batch_deadline_ms: u64,
    pub backpressure_high_water_mark: usize,

    pub routing_cache_limit: usize,
    pub routing_cache_ttl_secs: u64,
    pub routing_target: f64,
    pub latency_budget_ms: u64,

    pub cache: CacheSettings,
    pub pool: PoolSettings,
    pub reputation: ReputationSettings,
    pub consensus: ConsensusSettings,
    pub security: SecuritySettings,
}

impl Default for ModelMeshConfig {
    fn default() -> Self {
        let mut tier_limits = HashMap::new();
        tier_limits.insert("free".to_string(), TierLimitSpec { min: 1, max: 2 });
        tier_limits.insert("pro".to_string(), TierLimitSpec { min: 2, max: 10 });
        tier_limits.insert("enterprise".to_string(), TierLimitSpec { min: 5, max: 50 });

        Self {
            max_workers: 8,
            max_concurrency: 64,
            spawn_timeout_ms: 100,
            operation_timeout_ms: 30_000,
            retry_attempts: 3,
            backoff_base_ms: 100,
            batch_deadline_ms: 30_000,
            backpressure_high_water_mark: 256,

            routing_cache_limit: 1000,
            routing_cache_ttl_secs: 300,
            routing_target: 75.0,
            latency_budget_ms: 75,

            cache: CacheSettings {
                eviction_policy: "adaptive".to_string(),
                persist_to_disk: true,
                default_ttl_secs: 3600,
                memory_budget_bytes: 64 * 1024 * 1024,
                cleanup_interval_secs: 60,
                compress: false,
            },
            pool: PoolSettings {
                tier_limits,
                idle_timeout_secs: 60,
                acquire_timeout_secs: 5,
                retry_attempts: 3,
                backoff_base_ms: 1000,
                eviction_period_secs: 30,
                max_errors_before_evict: 5,
                data_dir: PathBuf::from("./data/modelmesh"),
            },
            reputation: ReputationSettings {
                quarantine_threshold: 0.3,
                time_window_secs: 300,
                max_messages_per_window: 100,
            },
            consensus: ConsensusSettings {
                fault_tolerance: 0.33,
                proposal_timeout_secs: 30,
            },
            security: SecuritySettings {
                require_verified_identity: true,
            },
        }
    }
}

impl ModelMeshConfig {
    /// Layer, in increasing precedence: built-in defaults, `modelmesh.toml`
    /// (if present in the working directory), then `MODELMESH__*`
    /// environment variables (`__` as the nesting separator, e.g.
    /// `MODELMESH__CACHE__PERSIST_TO_DISK=false`).
    pub fn load() -> Result<Self, config::ConfigError> {
        let defaults = config::Config::try_from(&Self::default())?;
        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::with_name("modelmesh").required(false))
            .add_source(config::Environment::with_prefix("MODELMESH").separator("__"))
            .build()?;
        settings.try_deserialize()
    }

    fn eviction_policy(&self) -> EvictionPolicy {
        match self.cache.eviction_policy.to_lowercase().as_str() {
            "lru" => EvictionPolicy::Lru,
            "lfu" => EvictionPolicy::Lfu,
            _ => EvictionPolicy::Adaptive,
        }
    }

    pub fn to_executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_workers: self.max_workers,
            max_concurrency: self.max_concurrency,
            spawn_timeout: Duration::from_millis(self.spawn_timeout_ms),
            operation_timeout: Duration::from_millis(self.operation_timeout_ms),
            retry_attempts: self.retry_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            batch_deadline: Duration::from_millis(self.batch_deadline_ms),
            backpressure_high_water_mark: self.backpressure_high_water_mark,
        }
    }

    pub fn to_router_config(&self) -> RouterConfig {
        RouterConfig {
            weights: ScoringWeights::default(),
            cache_capacity: self.routing_cache_limit,
            cache_ttl: Duration::from_secs(self.routing_cache_ttl_secs),
            latency_budget: Duration::from_millis(self.latency_budget_ms),
            failure_weight_trigger: 5,
            slow_latency_trigger_ms: self.routing_target * 2.0,
        }
    }

    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            memory_budget_bytes: self.cache.memory_budget_bytes,
            eviction_policy: self.eviction_policy(),
            persist_to_disk: self.cache.persist_to_disk,
            default_ttl: Duration::from_secs(self.cache.default_ttl_secs),
            cleanup_interval: Duration::from_secs(self.cache.cleanup_interval_secs),
            compress: self.cache.compress,
        }
    }

    pub fn to_pool_config(&self) -> PoolConfig {
        let mut tier_limits = HashMap::new();
        for (name, spec) in &self.pool.tier_limits {
            let tier = match name.as_str() {
                "free" => PoolUserTier::Free,
                "pro" => PoolUserTier::Pro,
                "enterprise" => PoolUserTier::Enterprise,
                other => {
                    tracing::warn!(tier = other, "unrecognized tier name in config, skipping");
                    continue;
                }
            };
            tier_limits.insert(
                tier,
                TierLimits {
                    min: spec.min,
                    max: spec.max,
                },
            );
        }
        PoolConfig {
            tier_limits,
            idle_timeout: Duration::from_secs(self.pool.idle_timeout_secs),
            acquire_timeout: Duration::from_secs(self.pool.acquire_timeout_secs),
            retry_attempts: self.pool.retry_attempts,
            backoff_base: Duration::from_millis(self.pool.backoff_base_ms),
            eviction_period: Duration::from_secs(self.pool.eviction_period_secs),
            max_errors_before_evict: self.pool.max_errors_before_evict,
        }
    }

    pub fn to_reputation_config(&self) -> ReputationConfig {
        ReputationConfig {
            quarantine_threshold: self.reputation.quarantine_threshold,
            time_window: Duration::from_secs(self.reputation.time_window_secs),
            max_messages_per_window: self.reputation.max_messages_per_window,
        }
    }

    pub fn to_consensus_config(&self) -> ConsensusConfig {
        ConsensusConfig {
            fault_tolerance: self.consensus.fault_tolerance,
            proposal_timeout: Duration::from_secs(self.consensus.proposal_timeout_secs),
        }
    }

    pub fn to_security_config(&self) -> SecurityConfig {
        SecurityConfig {
            require_verified_identity: self.security.require_verified_identity,
        }
    }

    pub fn data_dir(&self) -> &std::path::Path {
        &self.pool.data_dir
    }
}
