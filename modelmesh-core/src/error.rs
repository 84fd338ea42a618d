//! Aggregated error type for the orchestrator's request pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelMeshError {
    #[error("no models available for this request")]
    NoModelsAvailable,
    #[error("backpressure: {0}")]
    Backpressure(String),
    #[error("connection pool error: {0}")]
    Pool(#[from] modelmesh_pool::PoolError),
    #[error("cache error: {0}")]
    Cache(#[from] modelmesh_cache::CacheError),
    #[error("routing error: {0}")]
    Router(#[from] modelmesh_router::RouterError),
    #[error("batch execution error: {0}")]
    Executor(#[from] modelmesh_executor::ExecutorError),
    #[error("consensus error: {0}")]
    Consensus(#[from] modelmesh_consensus::ConsensusError),
    #[error("security error: {0}")]
    Security(#[from] modelmesh_security::SecurityError),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
