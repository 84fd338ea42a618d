//! Orchestrator-level request/response envelope: the shape `request()`
//! accepts and returns, generalizing the per-subsystem types each
//! collaborator exposes into a single `request(context) -> result | error`
//! call.

use std::collections::HashSet;

use modelmesh_executor::Operation;
use modelmesh_router::{Priority, RoutingContext, RoutingDecision};
use modelmesh_security::{IdentityToken, UserTier as SecurityUserTier};

/// Everything `request()` needs: who's asking, what they're asking for,
/// and (optionally) the operations to run once a model has been chosen.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub task: String,
    pub identity: IdentityToken,
    pub priority: Priority,
    pub latency_budget_ms: u64,
    pub token_budget: Option<u64>,
    pub required_capabilities: Option<HashSet<String>>,
    /// Operations to run once a model is selected. Empty means this is a
    /// pure routing decision with no batch work attached.
    pub operations: Vec<Operation>,
    /// Whether the batch's outcome must clear the consensus core before
    /// being considered final — a multi-agent fleet's shared action, not a
    /// single caller's query.
    pub requires_consensus: bool,
}

/// `request()`'s success envelope, carrying `confidence`, `from_cache`, and
/// `fallback_used` so callers can decide whether to retry.
#[derive(Debug, Clone)]
pub struct RequestResult {
    pub routing: RoutingDecision,
    pub batch: Option<modelmesh_executor::BatchResult>,
    pub consensus: Option<modelmesh_consensus::ProposalOutcome>,
    pub confidence: f64,
    pub from_cache: bool,
    pub fallback_used: bool,
}

/// Bridges the security crate's caller-facing tier into the router's
/// routing-facing tier. These stay as independent enums (each crate owns
/// its own notion of tier for its own purposes — `modelmesh-pool`'s governs
/// handle limits, `modelmesh-router`'s governs model eligibility,
/// `modelmesh-security`'s governs claim verification) and this is the one
/// seam that translates between them.
pub fn router_tier_from_security(tier: SecurityUserTier) -> modelmesh_router::UserTier {
    match tier {
        SecurityUserTier::Free => modelmesh_router::UserTier::Free,
        SecurityUserTier::Pro => modelmesh_router::UserTier::Pro,
        SecurityUserTier::Enterprise => modelmesh_router::UserTier::Enterprise,
    }
}

/// Same bridge, into the connection pool's tier (governs handle limits for
/// the shared L2 cache backing store).
pub fn pool_tier_from_security(tier: SecurityUserTier) -> modelmesh_pool::UserTier {
    match tier {
        SecurityUserTier::Free => modelmesh_pool::UserTier::Free,
        SecurityUserTier::Pro => modelmesh_pool::UserTier::Pro,
        SecurityUserTier::Enterprise => modelmesh_pool::UserTier::Enterprise,
    }
}

impl RequestContext {
    pub fn to_routing_context(&self, tier: modelmesh_router::UserTier) -> RoutingContext {
        RoutingContext {
            task: self.task.clone(),
            tier,
            priority: self.priority,
            latency_budget_ms: self.latency_budget_ms,
            token_budget: self.token_budget,
            required_capabilities: self.required_capabilities.clone(),
        }
    }
}
