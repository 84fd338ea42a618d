//! Orchestrator-level event stream: a single `tokio::sync::broadcast::Sender`
//! fanning subsystem activity out to any number of subscribers (an API SSE
//! endpoint, a CLI tail, a test).
//!
//! `broadcast`'s native `Lagged(n)` error on a slow receiver's `recv()` IS
//! the backpressure policy here (drop oldest, report the drop count) — a
//! lagging subscriber simply observes `Err(RecvError::Lagged(n))` and `n` is
//! exactly the dropped-event count. No separate bookkeeping is needed;
//! callers that care about the dropped count report it themselves when they
//! see `Lagged`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelMeshEvent {
    RoutingDecision {
        model_name: String,
        confidence: f64,
        from_cache: bool,
        routing_time_ms: f64,
    },
    RoutingSlow {
        model_name: String,
        routing_time_ms: f64,
        target_ms: f64,
    },
    ModelAvailabilityChanged {
        model_name: String,
        available: bool,
    },
    FallbackTriggered {
        reason: String,
        model_name: String,
    },
    CacheHit {
        key: String,
    },
    CacheMiss {
        key: String,
    },
    CacheEvict {
        key: String,
    },
    OperationCompleted {
        operation_id: String,
        duration_ms: f64,
    },
    OperationFailed {
        operation_id: String,
        message: String,
    },
    MaliciousBehaviorDetected {
        agent_id: String,
        behavior: String,
        severity: String,
    },
    AgentQuarantined {
        agent_id: String,
    },
    AgentRehabilitated {
        agent_id: String,
        reason: String,
    },
    PerformanceMetrics {
        average_routing_time_ms: f64,
        p95_routing_time_ms: f64,
        cache_hit_rate: f64,
        target_met: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ModelMeshEvent,
}

/// Thin wrapper over a `broadcast` channel. Cloning `EventBus` clones the
/// sender handle, not the channel; every clone publishes onto the same
/// stream.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TimestampedEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns silently if there are no subscribers
    /// rather than failing the caller's request.
    pub fn publish(&self, event: ModelMeshEvent) {
        let _ = self.sender.send(TimestampedEvent {
            timestamp: Utc::now(),
            event,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
