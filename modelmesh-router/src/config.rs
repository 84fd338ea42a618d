//! Router configuration, including the adaptive scoring weights.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ScoringWeights {
    pub latency: f64,
    pub cost: f64,
    pub reliability: f64,
    pub user_tier: f64,
    pub complexity: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            latency: 0.35,
            cost: 0.15,
            reliability: 0.25,
            user_tier: 0.15,
            complexity: 0.10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub weights: ScoringWeights,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub latency_budget: Duration,
    /// Recent-failure count above which reliability is weighted more heavily.
    pub failure_weight_trigger: u32,
    /// Average latency above which the latency weight is increased.
    pub slow_latency_trigger_ms: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            cache_capacity: 1000,
            cache_ttl: Duration::from_secs(300),
            latency_budget: Duration::from_millis(75),
            failure_weight_trigger: 5,
            slow_latency_trigger_ms: 2000.0,
        }
    }
}
