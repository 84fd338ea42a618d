//! Candidate filtering and weighted scoring.

use crate::config::ScoringWeights;
use crate::types::{ModelConfig, ModelPerformanceRecord, RoutingContext, UserTier};

/// Step 3: tier access, availability, and complexity-driven suitability.
pub fn filter_candidates<'a>(
    models: &'a [ModelConfig],
    context: &RoutingContext,
    complexity: f64,
) -> Vec<&'a ModelConfig> {
    models
        .iter()
        .filter(|m| m.available)
        .filter(|m| context.tier.level() >= m.tier_floor.level())
        .filter(|m| suitable_for_complexity(m, context, complexity))
        .collect()
}

fn suitable_for_complexity(model: &ModelConfig, context: &RoutingContext, complexity: f64) -> bool {
    if complexity > 0.8
        && !model.capabilities.contains("advanced-reasoning")
        && !model.capabilities.contains("code")
    {
        return false;
    }
    if context.latency_budget_ms < 1000 && model.avg_latency_target_ms >= 1200.0 {
        return false;
    }
    true
}

#[derive(Debug, Clone)]
pub struct ScoreBreakdown {
    pub latency: f64,
    pub cost: f64,
    pub reliability: f64,
    pub user_tier: f64,
    pub complexity: f64,
}

impl ScoreBreakdown {
    pub fn weighted_total(&self, weights: &ScoringWeights) -> f64 {
        self.latency * weights.latency
            + self.cost * weights.cost
            + self.reliability * weights.reliability
            + self.user_tier * weights.user_tier
            + self.complexity * weights.complexity
    }
}

pub fn score_candidate(
    model: &ModelConfig,
    perf: Option<&ModelPerformanceRecord>,
    context: &RoutingContext,
    complexity: f64,
) -> ScoreBreakdown {
    ScoreBreakdown {
        latency: latency_score(model, context),
        cost: cost_score(model, context.tier),
        reliability: reliability_score(perf),
        user_tier: user_tier_score(model, context),
        complexity: complexity_fit_score(model, complexity),
    }
}

fn latency_score(model: &ModelConfig, context: &RoutingContext) -> f64 {
    let budget = context.latency_budget_ms as f64;
    let latency = model.avg_latency_target_ms;
    if latency <= 0.8 * budget {
        1.0
    } else if latency <= budget {
        0.8
    } else if latency <= 1.5 * budget {
        0.5
    } else {
        0.1
    }
}

fn cost_score(model: &ModelConfig, tier: UserTier) -> f64 {
    match tier {
        UserTier::Enterprise => 0.9,
        UserTier::Pro => {
            if model.cost_per_token < 3e-6 {
                1.0
            } else {
                0.7
            }
        }
        UserTier::Free => {
            if model.cost_per_token < 1e-6 {
                1.0
            } else {
                0.3
            }
        }
    }
}

fn reliability_score(perf: Option<&ModelPerformanceRecord>) -> f64 {
    match perf {
        Some(p) if p.usage_count >= 5 => p.success_rate().clamp(0.1, 1.0),
        _ => 0.8,
    }
}

fn user_tier_score(model: &ModelConfig, context: &RoutingContext) -> f64 {
    if context.tier.level() >= model.tier_floor.level() {
        1.0
    } else {
        0.1
    }
}

/// How well a model's advertised capabilities fit the task's complexity.
/// Models with "advanced-reasoning" or "code" support always fit; plain
/// models are discounted in proportion to how complex the task is, even
/// below the hard `>0.8` filter threshold in `suitable_for_complexity`.
fn complexity_fit_score(model: &ModelConfig, complexity: f64) -> f64 {
    let advanced = model.capabilities.contains("advanced-reasoning")
        || model.capabilities.contains("code");
    if advanced {
        1.0
    } else {
        (1.0 - complexity * 3.0).max(0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn model(name: &str, tier: UserTier, latency: f64, cost: f64, caps: &[&str]) -> ModelConfig {
        ModelConfig {
            name: name.to_string(),
            tier_floor: tier,
            avg_latency_target_ms: latency,
            cost_per_token: cost,
            capabilities: caps.iter().map(|s| s.to_string()).collect(),
            available: true,
        }
    }

    fn ctx(tier: UserTier, latency_budget_ms: u64) -> RoutingContext {
        RoutingContext {
            task: "task".into(),
            tier,
            priority: crate::types::Priority::Medium,
            latency_budget_ms,
            token_budget: None,
            required_capabilities: None,
        }
    }

    #[test]
    fn tier_floor_excludes_lower_access_users() {
        let models = vec![model("enterprise-only", UserTier::Enterprise, 100.0, 1e-6, &[])];
        let context = ctx(UserTier::Free, 2000);
        assert!(filter_candidates(&models, &context, 0.1).is_empty());
    }

    #[test]
    fn high_complexity_requires_advanced_capability() {
        let models = vec![model("plain", UserTier::Free, 100.0, 1e-6, &[])];
        let context = ctx(UserTier::Enterprise, 5000);
        assert!(filter_candidates(&models, &context, 0.9).is_empty());
    }

    #[test]
    fn tight_budget_excludes_slow_models() {
        let models = vec![model("slow", UserTier::Free, 1500.0, 1e-6, &[])];
        let context = ctx(UserTier::Enterprise, 500);
        assert!(filter_candidates(&models, &context, 0.1).is_empty());
    }

    #[test]
    fn fast_cheap_model_scores_well() {
        let fast = model("fast", UserTier::Free, 100.0, 1e-7, &[]);
        let context = ctx(UserTier::Free, 1000);
        let score = score_candidate(&fast, None, &context, 0.1);
        assert_eq!(score.latency, 1.0);
        assert_eq!(score.cost, 1.0);
    }
}
