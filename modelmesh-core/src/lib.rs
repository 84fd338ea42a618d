//! Orchestrator for the modelmesh runtime: the single entry point that owns
//! the Model Router, Batch Executor, and Consensus Core exclusively (no
//! other component constructs its own instance of these three), plus
//! shared handles to the reputation engine, security framework, connection
//! pool, and two-level cache.
//!
//! Every subsystem is constructed up front behind an `Arc<RwLock<Config>>`
//! plus typed `Arc<Subsystem>` fields, started in dependency order, and
//! stopped in reverse, driving this runtime's pipeline: admit -> route ->
//! plan -> execute -> agree -> cache -> report.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use modelmesh_cache::TwoLevelCache;
use modelmesh_consensus::ConsensusEngine;
use modelmesh_executor::BatchExecutor;
use modelmesh_pool::ConnectionPool;
use modelmesh_reputation::{
    ObservedMessage, ObservedVote, ReputationEngine, ReputationError,
};
use modelmesh_router::{ModelConfig, ModelRouter};
use modelmesh_security::SecurityFramework;

pub mod config;
pub mod error;
pub mod events;
pub mod telemetry;
pub mod types;

pub use config::ModelMeshConfig;
pub use error::ModelMeshError;
pub use events::{EventBus, ModelMeshEvent, TimestampedEvent};
pub use types::{
    pool_tier_from_security, router_tier_from_security, RequestContext, RequestResult,
};

const PERFORMANCE_SAMPLE_INTERVAL: u64 = 10;

struct RoutingSamples {
    count: AtomicU64,
    recent_ms: parking_lot::Mutex<std::collections::VecDeque<f64>>,
    cache_hits: AtomicU64,
    cache_total: AtomicU64,
}

impl RoutingSamples {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            recent_ms: parking_lot::Mutex::new(std::collections::VecDeque::with_capacity(128)),
            cache_hits: AtomicU64::new(0),
            cache_total: AtomicU64::new(0),
        }
    }

    fn record(&self, routing_time_ms: f64, from_cache: bool) -> u64 {
        let mut recent = self.recent_ms.lock();
        if recent.len() == 128 {
            recent.pop_front();
        }
        recent.push_back(routing_time_ms);
        drop(recent);

        self.cache_total.fetch_add(1, Ordering::Relaxed);
        if from_cache {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn snapshot(&self) -> (f64, f64, f64) {
        let recent = self.recent_ms.lock();
        let n = recent.len();
        let avg = if n == 0 {
            0.0
        } else {
            recent.iter().sum::<f64>() / n as f64
        };
        let mut sorted: Vec<f64> = recent.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let p95 = if sorted.is_empty() {
            0.0
        } else {
            let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
            sorted[idx.min(sorted.len() - 1)]
        };
        let total = self.cache_total.load(Ordering::Relaxed).max(1);
        let hit_rate = self.cache_hits.load(Ordering::Relaxed) as f64 / total as f64;
        (avg, p95, hit_rate)
    }
}

/// Central coordination point: owns the routing/execution/consensus
/// pipeline and the shared infrastructure (cache, pool, reputation,
/// security) every request passes through.
pub struct ModelMeshOrchestrator {
    config: Arc<RwLock<ModelMeshConfig>>,

    router: Arc<ModelRouter>,
    executor: Arc<BatchExecutor>,
    consensus: Arc<ConsensusEngine>,

    reputation: Arc<ReputationEngine>,
    security: Arc<SecurityFramework>,
    cache: Arc<TwoLevelCache>,
    pool: Arc<ConnectionPool>,

    events: EventBus,
    samples: RoutingSamples,
    model_availability: DashMap<String, bool>,
    /// Taken by `start()` and handed to the task that forwards cache
    /// evictions onto `events`. `None` after the first `start()` call.
    eviction_rx: parking_lot::Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<String>>>,
}

impl ModelMeshOrchestrator {
    /// Build every subsystem from configuration loaded via
    /// [`ModelMeshConfig::load`] (file + environment + defaults).
    pub async fn new() -> Result<Self> {
        Self::new_with_config(ModelMeshConfig::load()?).await
    }

    /// Build every subsystem from a caller-supplied configuration. Useful
    /// for tests and embedded deployments where configuration is managed
    /// externally.
    pub async fn new_with_config(config: ModelMeshConfig) -> Result<Self> {
        info!("initializing modelmesh orchestrator");

        let reputation = Arc::new(ReputationEngine::new(config.to_reputation_config()));
        let security = Arc::new(SecurityFramework::new(&config.to_security_config()).await?);

        // The connection pool backs the cache's L2 tier. A pool is fixed to
        // one tier at construction; the shared cache backing store is
        // deliberately provisioned at the most generous (Enterprise) tier
        // so it never starves a high-priority caller's L2 writes. Per-tier
        // routing/admission limits are still enforced by the router and
        // security layers above this, not by the pool itself.
        let pool = Arc::new(
            ConnectionPool::new(
                config.data_dir(),
                modelmesh_pool::UserTier::Enterprise,
                config.to_pool_config(),
            )
            .await?,
        );

        let cache = Arc::new(TwoLevelCache::new(config.to_cache_config(), Some(Arc::clone(&pool))));
        let router = Arc::new(ModelRouter::new(config.to_router_config()));
        let (eviction_tx, eviction_rx) = tokio::sync::mpsc::unbounded_channel();
        cache.set_eviction_notifier(eviction_tx);
        let executor = Arc::new(BatchExecutor::new(config.to_executor_config()));
        let consensus = Arc::new(ConsensusEngine::new(
            config.to_consensus_config(),
            Arc::clone(&reputation),
        ));

        debug!("all modelmesh subsystems constructed");

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            router,
            executor,
            consensus,
            reputation,
            security,
            cache,
            pool,
            events: EventBus::new(),
            samples: RoutingSamples::new(),
            model_availability: DashMap::new(),
            eviction_rx: parking_lot::Mutex::new(Some(eviction_rx)),
        })
    }

    /// Start every subsystem that has background work to run, in dependency
    /// order: security first (gates everything downstream), then the pool
    /// and cache (persistence), then consensus (depends on reputation being
    /// live to gate admission).
    pub async fn start(&self) -> Result<()> {
        info!("starting modelmesh orchestrator");
        self.security.start().await?;
        self.pool.clone().start().await?;
        self.cache.start().await;
        self.consensus.clone().start();

        if let Some(mut eviction_rx) = self.eviction_rx.lock().take() {
            let events = self.events.clone();
            tokio::spawn(async move {
                while let Some(key) = eviction_rx.recv().await {
                    events.publish(ModelMeshEvent::CacheEvict { key });
                }
            });
        }

        info!("modelmesh orchestrator started");
        Ok(())
    }

    /// Stop every subsystem in reverse dependency order.
    pub async fn stop(&self) -> Result<()> {
        info!("stopping modelmesh orchestrator");
        self.cache.clear().await.ok();
        self.pool.shutdown().await?;
        self.security.stop().await?;
        info!("modelmesh orchestrator stopped");
        Ok(())
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    pub fn reputation(&self) -> &Arc<ReputationEngine> {
        &self.reputation
    }

    pub fn consensus(&self) -> &Arc<ConsensusEngine> {
        &self.consensus
    }

    pub fn cache(&self) -> &Arc<TwoLevelCache> {
        &self.cache
    }

    pub async fn config(&self) -> ModelMeshConfig {
        self.config.read().await.clone()
    }

    /// Run the reputation rule engine over `agent_id`'s recent traffic,
    /// publishing one `MaliciousBehaviorDetected` per finding and
    /// `AgentQuarantined` if this pass is what tipped the agent over the
    /// threshold.
    pub fn analyze_agent_behavior(
        &self,
        agent_id: &str,
        messages: &[ObservedMessage],
        votes: &[ObservedVote],
    ) -> Result<Vec<modelmesh_reputation::MaliciousBehaviorRecord>, ReputationError> {
        let analysis = self.reputation.analyze_behavior(agent_id, messages, votes)?;
        for finding in &analysis.findings {
            self.events.publish(ModelMeshEvent::MaliciousBehaviorDetected {
                agent_id: agent_id.to_string(),
                behavior: format!("{:?}", finding.behavior_type),
                severity: format!("{:?}", finding.severity),
            });
        }
        if analysis.newly_quarantined {
            self.events.publish(ModelMeshEvent::AgentQuarantined {
                agent_id: agent_id.to_string(),
            });
        }
        Ok(analysis.findings)
    }

    /// Restore an agent's trust and publish `AgentRehabilitated`.
    pub fn rehabilitate_agent(&self, agent_id: &str, reason: &str) -> Result<(), ReputationError> {
        self.reputation.rehabilitate(agent_id, reason)?;
        self.events.publish(ModelMeshEvent::AgentRehabilitated {
            agent_id: agent_id.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Record a health check's verdict on a model's availability, publishing
    /// `ModelAvailabilityChanged` only when it differs from the last known
    /// state (including the first observation).
    pub fn report_model_availability(&self, model_name: &str, available: bool) {
        let changed = match self.model_availability.insert(model_name.to_string(), available) {
            Some(previous) => previous != available,
            None => true,
        };
        if changed {
            self.events.publish(ModelMeshEvent::ModelAvailabilityChanged {
                model_name: model_name.to_string(),
                available,
            });
        }
    }

    /// The full request pipeline: admit (security), select a model
    /// (router), plan and run any attached operations (batch executor),
    /// clear consensus if the caller asked for agreement, cache the
    /// result, and fan metrics out to the event bus.
    ///
    /// This is the `orchestrator.request(context) -> result | error` call.
    pub async fn request(
        &self,
        context: RequestContext,
        available_models: &[ModelConfig],
    ) -> Result<RequestResult, ModelMeshError> {
        let identity = self.security.verify(&context.identity)?;
        let router_tier = router_tier_from_security(identity.tier);
        let routing_context = context.to_routing_context(router_tier);

        let cache_key = request_cache_key(&context, router_tier);
        if let Some(cached) = self.cache.get(&cache_key).await? {
            self.events.publish(ModelMeshEvent::CacheHit {
                key: cache_key.clone(),
            });
            if let Ok(result) = serde_json::from_value::<CachedDecision>(cached) {
                let sample_count = self.samples.record(0.0, true);
                self.maybe_publish_performance_metrics(sample_count);
                return Ok(RequestResult {
                    routing: result.into(),
                    batch: None,
                    consensus: None,
                    confidence: 1.0,
                    from_cache: true,
                    fallback_used: false,
                });
            }
        } else {
            self.events.publish(ModelMeshEvent::CacheMiss {
                key: cache_key.clone(),
            });
        }

        let routing = self.router.select_optimal_model(&routing_context, available_models).await?;
        let routing_target_ms = self.config.read().await.routing_target;
        let fallback_used = routing.fallback_used;

        self.events.publish(ModelMeshEvent::RoutingDecision {
            model_name: routing.model_name.clone(),
            confidence: routing.confidence,
            from_cache: routing.from_cache,
            routing_time_ms: routing.routing_time_ms,
        });
        if routing.routing_time_ms > routing_target_ms {
            self.events.publish(ModelMeshEvent::RoutingSlow {
                model_name: routing.model_name.clone(),
                routing_time_ms: routing.routing_time_ms,
                target_ms: routing_target_ms,
            });
        }
        if fallback_used {
            self.events.publish(ModelMeshEvent::FallbackTriggered {
                reason: routing.reason.clone(),
                model_name: routing.model_name.clone(),
            });
        }

        let batch = if context.operations.is_empty() {
            None
        } else {
            let result = self.executor.execute_batch(context.operations.clone()).await?;
            for op in &result.results {
                if op.success {
                    self.events.publish(ModelMeshEvent::OperationCompleted {
                        operation_id: op.operation_id.clone(),
                        duration_ms: op.duration_ms as f64,
                    });
                } else {
                    self.events.publish(ModelMeshEvent::OperationFailed {
                        operation_id: op.operation_id.clone(),
                        message: op
                            .error
                            .clone()
                            .unwrap_or_else(|| "operation failed".to_string()),
                    });
                }
            }
            Some(result)
        };

        let consensus_outcome = if context.requires_consensus {
            let payload = serde_json::json!({
                "model_name": routing.model_name,
                "task": context.task,
            });
            match self.consensus.propose(identity.subject.clone(), payload) {
                Ok(_) => Some(modelmesh_consensus::ProposalOutcome::Pending),
                Err(err) => {
                    warn!(error = %err, "consensus proposal rejected");
                    None
                }
            }
        } else {
            None
        };

        let cached_decision = CachedDecision {
            model_name: routing.model_name.clone(),
            confidence: routing.confidence,
            reason: routing.reason.clone(),
        };
        if let Ok(value) = serde_json::to_value(&cached_decision) {
            self.cache
                .set(&cache_key, value, None, Some("routing".to_string()))
                .await?;
        }

        let sample_count = self.samples.record(routing.routing_time_ms, routing.from_cache);
        self.maybe_publish_performance_metrics(sample_count);

        Ok(RequestResult {
            confidence: routing.confidence,
            from_cache: routing.from_cache,
            routing,
            batch,
            consensus: consensus_outcome,
            fallback_used,
        })
    }

    fn maybe_publish_performance_metrics(&self, sample_count: u64) {
        if sample_count % PERFORMANCE_SAMPLE_INTERVAL != 0 {
            return;
        }
        let (avg, p95, hit_rate) = self.samples.snapshot();
        let target_ms = 75.0;
        self.events.publish(ModelMeshEvent::PerformanceMetrics {
            average_routing_time_ms: avg,
            p95_routing_time_ms: p95,
            cache_hit_rate: hit_rate,
            target_met: p95 <= target_ms,
        });
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CachedDecision {
    model_name: String,
    confidence: f64,
    reason: String,
}

impl From<CachedDecision> for modelmesh_router::RoutingDecision {
    fn from(cached: CachedDecision) -> Self {
        modelmesh_router::RoutingDecision {
            model_name: cached.model_name,
            confidence: cached.confidence,
            reason: cached.reason,
            routing_time_ms: 0.0,
            from_cache: true,
            fallback_used: false,
        }
    }
}

fn request_cache_key(context: &RequestContext, tier: modelmesh_router::UserTier) -> String {
    let mut hasher = DefaultHasher::new();
    context.task.hash(&mut hasher);
    tier.hash(&mut hasher);
    format!("{:?}", context.priority).hash(&mut hasher);
    format!("request:{:x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use modelmesh_router::{ModelConfig, Priority};
    use modelmesh_security::IdentityToken;

    async fn test_orchestrator() -> (ModelMeshOrchestrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ModelMeshConfig::default();
        config.pool.data_dir = dir.path().to_path_buf();
        let orchestrator = ModelMeshOrchestrator::new_with_config(config).await.unwrap();
        (orchestrator, dir)
    }

    fn valid_token() -> IdentityToken {
        IdentityToken {
            subject: "alice@pro".to_string(),
            issued_at: chrono::Utc::now(),
            expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
            signature: "sig".to_string(),
        }
    }

    fn one_model() -> Vec<ModelConfig> {
        vec![ModelConfig {
            name: "general-small".to_string(),
            tier_floor: modelmesh_router::UserTier::Free,
            avg_latency_target_ms: 100.0,
            cost_per_token: 0.001,
            capabilities: HashSet::new(),
            available: true,
        }]
    }

    #[tokio::test]
    async fn request_selects_a_model_and_reports_confidence() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let context = RequestContext {
            task: "summarize this document".to_string(),
            identity: valid_token(),
            priority: Priority::Medium,
            latency_budget_ms: 500,
            token_budget: None,
            required_capabilities: None,
            operations: vec![],
            requires_consensus: false,
        };

        let result = orchestrator.request(context, &one_model()).await.unwrap();
        assert_eq!(result.routing.model_name, "general-small");
        assert!(result.confidence > 0.0);
    }

    #[tokio::test]
    async fn repeated_request_is_served_from_cache() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let context = || RequestContext {
            task: "translate this paragraph".to_string(),
            identity: valid_token(),
            priority: Priority::Low,
            latency_budget_ms: 500,
            token_budget: None,
            required_capabilities: None,
            operations: vec![],
            requires_consensus: false,
        };

        orchestrator.request(context(), &one_model()).await.unwrap();
        let second = orchestrator.request(context(), &one_model()).await.unwrap();
        assert!(second.from_cache);
    }

    #[tokio::test]
    async fn expired_token_is_rejected_before_routing() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let mut token = valid_token();
        token.expires_at = chrono::Utc::now() - chrono::Duration::hours(1);
        let context = RequestContext {
            task: "anything".to_string(),
            identity: token,
            priority: Priority::High,
            latency_budget_ms: 500,
            token_budget: None,
            required_capabilities: None,
            operations: vec![],
            requires_consensus: false,
        };

        let result = orchestrator.request(context, &one_model()).await;
        assert!(matches!(result, Err(ModelMeshError::Security(_))));
    }

    #[tokio::test]
    async fn no_available_models_surfaces_no_models_available() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let mut unavailable = one_model();
        unavailable[0].available = false;
        let context = RequestContext {
            task: "anything".to_string(),
            identity: valid_token(),
            priority: Priority::Medium,
            latency_budget_ms: 500,
            token_budget: None,
            required_capabilities: None,
            operations: vec![],
            requires_consensus: false,
        };

        let result = orchestrator.request(context, &unavailable).await;
        assert!(matches!(result, Err(ModelMeshError::Router(_))));
    }

    #[tokio::test]
    async fn malicious_behavior_publishes_detection_and_quarantine_events() {
        let (orchestrator, _dir) = test_orchestrator().await;
        orchestrator.reputation().register_agent(&modelmesh_reputation::AgentIdentity {
            id: "bad-actor".to_string(),
            public_key: "pk".to_string(),
            leader: false,
            last_active: chrono::Utc::now(),
        });
        let mut subscriber = orchestrator.events().subscribe();

        let vote = |decision: &str| ObservedVote {
            proposal_id: "p".to_string(),
            sender: "bad-actor".to_string(),
            decision: decision.to_string(),
            weight: 1.0,
            timestamp: chrono::Utc::now(),
        };

        let mut quarantined_event_seen = false;
        for _ in 0..5 {
            let votes = vec![vote("commit"), vote("abort")];
            orchestrator
                .analyze_agent_behavior("bad-actor", &[], &votes)
                .unwrap();
        }

        let mut saw_detection = false;
        while let Ok(timestamped) = subscriber.try_recv() {
            match timestamped.event {
                ModelMeshEvent::MaliciousBehaviorDetected { ref agent_id, .. } => {
                    saw_detection = true;
                    assert_eq!(agent_id, "bad-actor");
                }
                ModelMeshEvent::AgentQuarantined { ref agent_id } => {
                    quarantined_event_seen = true;
                    assert_eq!(agent_id, "bad-actor");
                }
                _ => {}
            }
        }
        assert!(saw_detection);
        assert!(quarantined_event_seen);
        assert!(!orchestrator.reputation().is_agent_trusted("bad-actor"));
    }

    #[tokio::test]
    async fn rehabilitation_publishes_agent_rehabilitated_event() {
        let (orchestrator, _dir) = test_orchestrator().await;
        orchestrator.reputation().register_agent(&modelmesh_reputation::AgentIdentity {
            id: "agent-z".to_string(),
            public_key: "pk".to_string(),
            leader: false,
            last_active: chrono::Utc::now(),
        });
        let mut subscriber = orchestrator.events().subscribe();

        orchestrator
            .rehabilitate_agent("agent-z", "manual review cleared agent")
            .unwrap();

        let mut saw_rehabilitation = false;
        while let Ok(timestamped) = subscriber.try_recv() {
            if let ModelMeshEvent::AgentRehabilitated { agent_id, reason } = timestamped.event {
                saw_rehabilitation = true;
                assert_eq!(agent_id, "agent-z");
                assert_eq!(reason, "manual review cleared agent");
            }
        }
        assert!(saw_rehabilitation);
    }

    #[tokio::test]
    async fn model_availability_change_publishes_once_per_transition() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let mut subscriber = orchestrator.events().subscribe();

        orchestrator.report_model_availability("flash", false);
        orchestrator.report_model_availability("flash", false);
        orchestrator.report_model_availability("flash", true);

        let mut transitions = Vec::new();
        while let Ok(timestamped) = subscriber.try_recv() {
            if let ModelMeshEvent::ModelAvailabilityChanged { model_name, available } = timestamped.event {
                transitions.push((model_name, available));
            }
        }
        assert_eq!(
            transitions,
            vec![("flash".to_string(), false), ("flash".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn cache_eviction_publishes_cache_evict_once_started() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ModelMeshConfig::default();
        config.pool.data_dir = dir.path().to_path_buf();
        // One-byte values stay under the 10%-of-budget placement cutoff, so
        // enough of them accumulate past the budget and force real eviction.
        config.cache.memory_budget_bytes = 20;
        let orchestrator = ModelMeshOrchestrator::new_with_config(config).await.unwrap();
        orchestrator.start().await.unwrap();

        let mut subscriber = orchestrator.events().subscribe();
        for i in 0..40 {
            orchestrator
                .cache()
                .set(&format!("k{i}"), serde_json::json!(i % 10), None, None)
                .await
                .unwrap();
        }

        // The forwarding task runs on its own spawned future; give it a
        // chance to drain the notifier channel before asserting.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut saw_evict = false;
        while let Ok(timestamped) = subscriber.try_recv() {
            if matches!(timestamped.event, ModelMeshEvent::CacheEvict { .. }) {
                saw_evict = true;
            }
        }
        assert!(saw_evict);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn an_identity(subject: String) -> IdentityToken {
            IdentityToken {
                subject,
                issued_at: chrono::Utc::now(),
                expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
                signature: "sig".to_string(),
            }
        }

        proptest! {
            /// `request_cache_key` is a pure function of its inputs: calling
            /// it twice on an equal `RequestContext`/tier pair must always
            /// produce the same key, since the orchestrator relies on that
            /// to serve repeat requests from cache.
            #[test]
            fn cache_key_is_deterministic(
                task in ".{0,100}",
                subject in "[a-z]{1,10}",
            ) {
                let context = RequestContext {
                    task,
                    identity: an_identity(subject),
                    priority: Priority::Medium,
                    latency_budget_ms: 500,
                    token_budget: None,
                    required_capabilities: None,
                    operations: vec![],
                    requires_consensus: false,
                };
                let tier = modelmesh_router::UserTier::Pro;
                let key_a = request_cache_key(&context, tier);
                let key_b = request_cache_key(&context, tier);
                prop_assert_eq!(key_a, key_b);
            }
        }
    }
}
