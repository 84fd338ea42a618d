//! The smart model router: cache lookup, complexity analysis,
//! candidate filtering, weighted scoring, load-balanced selection, and a
//! fallback cascade, all under a 75ms p95 latency target.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::distributions::{Distribution, WeightedIndex};
use tracing::warn;

use crate::cache::{cache_key, RoutingCache};
use crate::complexity;
use crate::config::{RouterConfig, ScoringWeights};
use crate::scoring::{filter_candidates, score_candidate};
use crate::types::{ModelConfig, ModelPerformanceRecord, RoutingContext, RoutingDecision, RouterError, UserTier};

const RECENT_WINDOW: usize = 50;

/// Enterprise/pro/free emergency fallback lists, tried in order when nothing
/// else in the cascade produces a candidate.
fn emergency_fallback(tier: UserTier) -> &'static [&'static str] {
    match tier {
        UserTier::Enterprise => &["gemini-2.5-pro", "vertex-pro", "thinking-flash", "flash"],
        UserTier::Pro => &["flash", "thinking-flash", "flash-2"],
        UserTier::Free => &["flash-2", "flash"],
    }
}

pub struct ModelRouter {
    config: RouterConfig,
    cache: RoutingCache,
    performance: DashMap<String, ModelPerformanceRecord>,
    load_balancer: Mutex<HashMap<String, u64>>,
    weights: Mutex<ScoringWeights>,
    recent: Mutex<VecDeque<(f64, bool)>>,
}

impl ModelRouter {
    pub fn new(config: RouterConfig) -> Self {
        let cache = RoutingCache::new(config.cache_capacity, config.cache_ttl);
        let weights = config.weights.clone();
        Self {
            config,
            cache,
            performance: DashMap::new(),
            load_balancer: Mutex::new(HashMap::new()),
            weights: Mutex::new(weights),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_WINDOW)),
        }
    }

    pub async fn select_optimal_model(
        &self,
        context: &RoutingContext,
        available_models: &[ModelConfig],
    ) -> Result<RoutingDecision, RouterError> {
        let start = Instant::now();
        let key = cache_key(context);

        if let Some(entry) = self.cache.get(&key).await {
            let age = chrono::Utc::now() - entry.created_at;
            if age < chrono::Duration::from_std(self.config.cache_ttl).unwrap_or_default() {
                self.cache.put(&key, &entry.model_name).await;
                return Ok(self.finish(start, RoutingDecision {
                    model_name: entry.model_name,
                    confidence: 0.95,
                    reason: "cache hit".to_string(),
                    routing_time_ms: 0.0,
                    from_cache: true,
                    fallback_used: false,
                }));
            }
        }

        let complexity_score = complexity::analyze(&context.task);
        let candidates = filter_candidates(available_models, context, complexity_score);

        if candidates.is_empty() {
            let decision = self
                .fallback_cascade(None, context, available_models, "no candidates survived filtering")
                .ok_or(RouterError::NoModelsAvailable)?;
            return Ok(self.finish(start, decision));
        }

        let weights = self.weights.lock().clone();
        let mut scored: Vec<(&ModelConfig, f64)> = candidates
            .iter()
            .map(|model| {
                let perf = self.performance.get(&model.name);
                let breakdown = score_candidate(model, perf.as_deref(), context, complexity_score);
                (*model, breakdown.weighted_total(&weights))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

        let winner = self.select_with_load_balancing(scored);
        self.record_usage(&winner.0.name);
        self.cache.put(&key, &winner.0.name).await;

        let decision = RoutingDecision {
            model_name: winner.0.name.clone(),
            confidence: winner.1.clamp(0.0, 1.0),
            reason: format!(
                "selected via weighted scoring (complexity={complexity_score:.2})"
            ),
            routing_time_ms: 0.0,
            from_cache: false,
            fallback_used: false,
        };
        Ok(self.finish(start, decision))
    }

    /// Restricts "top 3" to candidates genuinely near the best score (within
    /// `TIE_EPSILON`), gives the least-used of those a +20% bonus, then
    /// draws among them with a weighted random pick. A clear winner outside
    /// the tie band is returned directly rather than risking a worse model
    /// by chance.
    fn select_with_load_balancing<'a>(
        &self,
        scored: Vec<(&'a ModelConfig, f64)>,
    ) -> (&'a ModelConfig, f64) {
        const TIE_EPSILON: f64 = 0.02;
        let best = scored
            .first()
            .expect("caller guarantees at least one candidate")
            .1;

        let mut tie_group: Vec<(&ModelConfig, f64)> = scored
            .into_iter()
            .filter(|(_, score)| best - score <= TIE_EPSILON)
            .take(3)
            .collect();

        if tie_group.len() == 1 {
            return tie_group[0];
        }

        let load_balancer = self.load_balancer.lock();
        if let Some((idx, _)) = tie_group
            .iter()
            .enumerate()
            .min_by_key(|(_, (m, _))| load_balancer.get(&m.name).copied().unwrap_or(0))
        {
            tie_group[idx].1 = (tie_group[idx].1 * 1.2).min(1.0);
        }
        drop(load_balancer);

        let weights: Vec<f64> = tie_group.iter().map(|(_, s)| s.max(0.0001)).collect();
        match WeightedIndex::new(&weights) {
            Ok(dist) => tie_group[dist.sample(&mut rand::thread_rng())],
            Err(_) => tie_group[0],
        }
    }

    fn record_usage(&self, model_name: &str) {
        let mut lb = self.load_balancer.lock();
        let reset = lb.values().any(|v| *v > 1000);
        if reset {
            lb.clear();
        }
        *lb.entry(model_name.to_string()).or_insert(0) += 1;
    }

    pub fn select_fallback_model(
        &self,
        original_model: &str,
        context: &RoutingContext,
        available_models: &[ModelConfig],
        reason: &str,
    ) -> Result<RoutingDecision, RouterError> {
        self.fallback_cascade(Some(original_model), context, available_models, reason)
            .ok_or(RouterError::NoModelsAvailable)
    }

    fn fallback_cascade(
        &self,
        original_model: Option<&str>,
        context: &RoutingContext,
        available_models: &[ModelConfig],
        reason: &str,
    ) -> Option<RoutingDecision> {
        let original_cfg = original_model.and_then(|name| available_models.iter().find(|m| m.name == name));

        // (a) same-tier model with >=70% capability overlap.
        if let Some(original_cfg) = original_cfg {
            if let Some(model) = available_models.iter().find(|m| {
                m.available
                    && m.name != original_cfg.name
                    && m.tier_floor == original_cfg.tier_floor
                    && capability_overlap(&m.capabilities, &original_cfg.capabilities) >= 0.7
            }) {
                return Some(self.fallback_decision(original_model, &model.name, 0.8, reason));
            }
        }

        // (b) lower-tier model accessible to the user with "code" or "reasoning".
        if let Some(model) = available_models.iter().find(|m| {
            m.available
                && context.tier.level() >= m.tier_floor.level()
                && (m.capabilities.contains("code") || m.capabilities.contains("reasoning"))
        }) {
            return Some(self.fallback_decision(original_model, &model.name, 0.6, reason));
        }

        // (c) emergency fallback list by user tier.
        for candidate_name in emergency_fallback(context.tier) {
            if available_models
                .iter()
                .any(|m| m.available && m.name == *candidate_name)
            {
                return Some(self.fallback_decision(original_model, candidate_name, 0.4, reason));
            }
        }

        // (d) any available model.
        available_models
            .iter()
            .find(|m| m.available)
            .map(|m| self.fallback_decision(original_model, &m.name, 0.2, reason))
    }

    fn fallback_decision(
        &self,
        original_model: Option<&str>,
        chosen: &str,
        confidence: f64,
        reason: &str,
    ) -> RoutingDecision {
        let reason_text = match original_model {
            Some(original) => format!("Fallback from {original} ({reason})"),
            None => format!("Fallback ({reason})"),
        };
        RoutingDecision {
            model_name: chosen.to_string(),
            confidence,
            reason: reason_text,
            routing_time_ms: 0.0,
            from_cache: false,
            fallback_used: true,
        }
    }

    pub fn record_performance(&self, model_name: &str, latency_ms: f64, cost: f64, success: bool) {
        self.performance
            .entry(model_name.to_string())
            .or_insert_with(|| ModelPerformanceRecord::new(model_name))
            .record(latency_ms, cost, success);

        let mut recent = self.recent.lock();
        recent.push_back((latency_ms, success));
        if recent.len() > RECENT_WINDOW {
            recent.pop_front();
        }
        self.retune_weights(&recent);
    }

    /// Adaptive tuning: failures push reliability up / cost down; slow
    /// recent latency pushes the latency weight up.
    fn retune_weights(&self, recent: &VecDeque<(f64, bool)>) {
        let failures = recent.iter().filter(|(_, ok)| !ok).count() as u32;
        let avg_latency = if recent.is_empty() {
            0.0
        } else {
            recent.iter().map(|(l, _)| l).sum::<f64>() / recent.len() as f64
        };

        let mut weights = self.weights.lock();
        if failures > self.config.failure_weight_trigger {
            weights.reliability = (weights.reliability + 0.1).min(0.5);
            weights.cost = (weights.cost - 0.05).max(0.1);
        }
        if avg_latency > self.config.slow_latency_trigger_ms {
            weights.latency = (weights.latency + 0.1).min(0.6);
            weights.cost = (weights.cost - 0.05).max(0.1);
        }
    }

    fn finish(&self, start: Instant, mut decision: RoutingDecision) -> RoutingDecision {
        let elapsed = start.elapsed();
        decision.routing_time_ms = elapsed.as_secs_f64() * 1000.0;
        if elapsed > self.config.latency_budget {
            warn!(
                routing_time_ms = decision.routing_time_ms,
                model = %decision.model_name,
                "routing_slow"
            );
        }
        decision
    }
}

fn capability_overlap(a: &std::collections::HashSet<String>, b: &std::collections::HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count().max(1) as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use crate::types::Priority;

    fn model(name: &str, tier: UserTier, latency: f64, cost: f64, caps: &[&str], available: bool) -> ModelConfig {
        ModelConfig {
            name: name.to_string(),
            tier_floor: tier,
            avg_latency_target_ms: latency,
            cost_per_token: cost,
            capabilities: caps.iter().map(|s| s.to_string()).collect(),
            available,
        }
    }

    fn ctx(task: &str, tier: UserTier, priority: Priority, latency_budget_ms: u64) -> RoutingContext {
        RoutingContext {
            task: task.to_string(),
            tier,
            priority,
            latency_budget_ms,
            token_budget: None,
            required_capabilities: None,
        }
    }

    #[tokio::test]
    async fn s1_cache_hit_returns_cached_model_with_fixed_confidence() {
        let router = ModelRouter::new(RouterConfig::default());
        let context = ctx("summarize report", UserTier::Pro, Priority::Medium, 1500);
        let key = cache_key(&context);
        router.cache.put(&key, "gemini-2.5-flash").await;

        let models = vec![
            model("gemini-2.5-flash", UserTier::Free, 300.0, 1e-7, &[], true),
            model("gemini-2.0-flash", UserTier::Free, 300.0, 1e-7, &[], true),
        ];
        let decision = router.select_optimal_model(&context, &models).await.unwrap();
        assert_eq!(decision.model_name, "gemini-2.5-flash");
        assert!(decision.from_cache);
        assert_eq!(decision.confidence, 0.95);
        // Cache hits should resolve in low single-digit ms; tests use a
        // looser bound to stay robust under slow/shared CI hardware.
        assert!(decision.routing_time_ms < 50.0);
    }

    #[tokio::test]
    async fn s2_complex_enterprise_task_picks_advanced_model() {
        let router = ModelRouter::new(RouterConfig::default());
        let context = ctx(
            "implement and optimize distributed cache eviction algorithm with consistency guarantees",
            UserTier::Enterprise,
            Priority::High,
            4000,
        );
        let models = vec![
            model("flash-2", UserTier::Free, 200.0, 1e-7, &[], true),
            model("flash", UserTier::Free, 250.0, 1e-7, &[], true),
            model("pro", UserTier::Pro, 800.0, 2e-6, &["advanced-reasoning"], true),
            model("deep-think", UserTier::Enterprise, 1500.0, 5e-6, &["advanced-reasoning", "code"], true),
        ];
        let decision = router.select_optimal_model(&context, &models).await.unwrap();
        assert!(["deep-think", "pro"].contains(&decision.model_name.as_str()));
        assert!(decision.reason.contains("complexity"));
    }

    #[tokio::test]
    async fn s6_fallback_picks_lower_tier_accessible_model() {
        let router = ModelRouter::new(RouterConfig::default());
        let context = ctx("anything", UserTier::Pro, Priority::Medium, 2000);
        let models = vec![
            model("gemini-2.5-pro", UserTier::Enterprise, 500.0, 3e-6, &["code"], false),
            model("gemini-2.0-flash", UserTier::Free, 300.0, 1e-7, &["code"], true),
        ];
        let decision = router
            .select_fallback_model("gemini-2.5-pro", &context, &models, "timeout")
            .unwrap();
        assert_eq!(decision.model_name, "gemini-2.0-flash");
        assert_eq!(decision.confidence, 0.6);
        assert!(decision.reason.contains("Fallback from gemini-2.5-pro"));
    }

    #[test]
    fn load_balancer_resets_when_any_counter_exceeds_1000() {
        let router = ModelRouter::new(RouterConfig::default());
        for _ in 0..1001 {
            router.record_usage("hot-model");
        }
        router.record_usage("other-model");
        let lb = router.load_balancer.lock();
        assert_eq!(*lb.get("other-model").unwrap(), 1);
    }

    #[test]
    fn capability_overlap_is_jaccard_similarity() {
        let a: HashSet<String> = ["code", "reasoning"].iter().map(|s| s.to_string()).collect();
        let b: HashSet<String> = ["code"].iter().map(|s| s.to_string()).collect();
        assert!((capability_overlap(&a, &b) - 0.5).abs() < 1e-9);
    }
}
