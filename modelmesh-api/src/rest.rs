//! REST + SSE surface: one struct holding shared state, a `create_router`
//! building the axum `Router`, and a `start`/`stop` pair spawning the
//! listener as a background task.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::Json,
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use modelmesh_core::{ModelMeshError, ModelMeshOrchestrator, RequestContext, RequestResult};
use modelmesh_executor::Operation;
use modelmesh_router::{ModelConfig, Priority};
use modelmesh_security::IdentityToken;

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub bind_address: String,
    pub port: u16,
    pub cors_enabled: bool,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            cors_enabled: true,
        }
    }
}

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<ModelMeshOrchestrator>,
}

/// The front door: owns the orchestrator handle and the axum server task.
pub struct ModelMeshApi {
    config: RestConfig,
    orchestrator: Arc<ModelMeshOrchestrator>,
}

impl ModelMeshApi {
    pub fn new(config: RestConfig, orchestrator: Arc<ModelMeshOrchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let app = self.router();
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(%addr, "starting modelmesh REST API");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "REST API server error");
            }
        });
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("stopping modelmesh REST API");
        Ok(())
    }

    fn router(&self) -> Router {
        let state = AppState {
            orchestrator: Arc::clone(&self.orchestrator),
        };
        let mut router = Router::new()
            .route("/v1/health", get(health))
            .route("/v1/requests", post(submit_request))
            .route("/v1/events", get(event_stream))
            .with_state(state);

        if self.config.cors_enabled {
            router = router.layer(CorsLayer::permissive());
        }
        router
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestBody {
    task: String,
    identity: IdentityToken,
    priority: Priority,
    latency_budget_ms: u64,
    token_budget: Option<u64>,
    required_capabilities: Option<Vec<String>>,
    models: Vec<ModelConfig>,
    #[serde(default)]
    operations: Vec<Operation>,
    #[serde(default)]
    requires_consensus: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestResponse {
    model_name: String,
    confidence: f64,
    from_cache: bool,
    fallback_used: bool,
    routing_time_ms: f64,
    reason: String,
}

impl From<RequestResult> for RequestResponse {
    fn from(result: RequestResult) -> Self {
        Self {
            model_name: result.routing.model_name,
            confidence: result.confidence,
            from_cache: result.from_cache,
            fallback_used: result.fallback_used,
            routing_time_ms: result.routing.routing_time_ms,
            reason: result.routing.reason,
        }
    }
}

fn status_for(error: &ModelMeshError) -> StatusCode {
    match error {
        ModelMeshError::NoModelsAvailable => StatusCode::SERVICE_UNAVAILABLE,
        ModelMeshError::Backpressure(_) => StatusCode::SERVICE_UNAVAILABLE,
        ModelMeshError::Security(_) => StatusCode::UNAUTHORIZED,
        ModelMeshError::Router(_) => StatusCode::SERVICE_UNAVAILABLE,
        ModelMeshError::Pool(_) => StatusCode::SERVICE_UNAVAILABLE,
        ModelMeshError::Executor(_) | ModelMeshError::Cache(_) | ModelMeshError::Consensus(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        ModelMeshError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn submit_request(
    State(state): State<AppState>,
    Json(body): Json<RequestBody>,
) -> Result<Json<RequestResponse>, (StatusCode, Json<serde_json::Value>)> {
    let context = RequestContext {
        task: body.task,
        identity: body.identity,
        priority: body.priority,
        latency_budget_ms: body.latency_budget_ms,
        token_budget: body.token_budget,
        required_capabilities: body
            .required_capabilities
            .map(|caps| caps.into_iter().collect()),
        operations: body.operations,
        requires_consensus: body.requires_consensus,
    };

    match state.orchestrator.request(context, &body.models).await {
        Ok(result) => Ok(Json(result.into())),
        Err(err) => {
            warn!(error = %err, "request failed");
            let status = status_for(&err);
            Err((
                status,
                Json(serde_json::json!({ "error": err.to_string() })),
            ))
        }
    }
}

/// Tails the event bus. A lagging subscriber's `RecvError::Lagged(n)` is
/// translated into one `events_dropped` notice carrying the drop count,
/// per the bus's native drop-oldest backpressure policy.
async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.orchestrator.events().subscribe();
    let stream = async_stream::stream! {
        let mut receiver = receiver;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        yield Ok(Event::default().data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    yield Ok(Event::default().event("events_dropped").data(n.to_string()));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}
