//! Dependency-aware parallel batch executor.
//!
//! Operations are staged via [`crate::graph::DependencyGraph`]; every stage
//! runs concurrently, bounded by a [`crate::resources::ResourcePool`] sized
//! `max_concurrency`. `agent_spawn` operations additionally go through the
//! optimized spawn path: a dedicated worker-slot semaphore sized
//! `max_workers`, a 100ms (configurable) per-spawn deadline, and a metrics
//! trail the orchestrator uses to emit `routing_slow`-style alerts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::graph::{DependencyGraph, GraphError};
use crate::resources::{ResourceError, ResourcePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    AgentSpawn,
    TaskExecute,
    MemoryOp,
    FileOp,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub op_type: OperationType,
    pub payload: serde_json::Value,
    pub depends_on: Vec<String>,
    pub retry_budget: u32,
}

/// An error surfaced by an [`OperationExecutor`]. `retryable = false`
/// bypasses the retry policy entirely.
#[derive(Debug, Clone)]
pub struct OpError {
    pub message: String,
    pub retryable: bool,
}

impl OpError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Dispatch target for one [`OperationType`]. New operation types are added
/// by extending the enum and registering a handler here, not by subclassing.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, op: &Operation) -> Result<serde_json::Value, OpError>;
}

/// Default handler used for any [`OperationType`] without a registered
/// executor. Real deployments register adapters that talk to the agent
/// runtime / model adapters this crate deliberately has no dependency on.
pub struct NoopExecutor;

#[async_trait]
impl OperationExecutor for NoopExecutor {
    async fn execute(&self, op: &Operation) -> Result<serde_json::Value, OpError> {
        Ok(serde_json::json!({ "op": op.id, "status": "noop" }))
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_workers: usize,
    pub max_concurrency: usize,
    pub spawn_timeout: Duration,
    pub operation_timeout: Duration,
    pub retry_attempts: u32,
    pub backoff_base: Duration,
    pub batch_deadline: Duration,
    pub backpressure_high_water_mark: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            max_concurrency: 64,
            spawn_timeout: Duration::from_millis(100),
            operation_timeout: Duration::from_secs(30),
            retry_attempts: 3,
            backoff_base: Duration::from_millis(100),
            batch_deadline: Duration::from_secs(30),
            backpressure_high_water_mark: 256,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("dependency graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("resource pool exhausted: {0}")]
    Resources(#[from] ResourceError),
    #[error("backpressure: queue exceeded high-water mark")]
    Backpressure,
    #[error("batch exceeded its {0:?} deadline")]
    BatchTimeout(Duration),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation_id: String,
    pub op_type: OperationType,
    pub success: bool,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub attempts: u32,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub total_ops: usize,
    pub successful_ops: usize,
    pub failed_ops: usize,
    pub avg_spawn_time_ms: f64,
    pub p95_spawn_time_ms: f64,
    pub avg_batch_time_ms: f64,
    pub throughput_ops_per_sec: f64,
    pub success_rate: f64,
    /// Set when p95 spawn time exceeded the configured `spawn_timeout`
    /// target; the orchestrator turns this into a `routing_slow`-style event.
    pub spawn_budget_exceeded: bool,
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub results: Vec<OperationResult>,
    pub metrics: BatchMetrics,
}

/// Dependency-aware parallel executor with a specialized agent-spawn path.
pub struct BatchExecutor {
    config: ExecutorConfig,
    resources: ResourcePool,
    spawn_workers: Arc<Semaphore>,
    waiting: std::sync::atomic::AtomicUsize,
    handlers: HashMap<OperationType, Arc<dyn OperationExecutor>>,
}

impl BatchExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let resources = ResourcePool::new(config.max_concurrency);
        let spawn_workers = Arc::new(Semaphore::new(config.max_workers));
        Self {
            config,
            resources,
            spawn_workers,
            waiting: std::sync::atomic::AtomicUsize::new(0),
            handlers: HashMap::new(),
        }
    }

    pub fn with_handler(
        mut self,
        op_type: OperationType,
        handler: Arc<dyn OperationExecutor>,
    ) -> Self {
        self.handlers.insert(op_type, handler);
        self
    }

    fn handler_for(&self, op_type: OperationType) -> Arc<dyn OperationExecutor> {
        self.handlers
            .get(&op_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(NoopExecutor))
    }

    pub fn resources(&self) -> &ResourcePool {
        &self.resources
    }

    /// Build the dependency graph, stage it, and run each stage to
    /// completion before starting the next. Graph cycles, resource
    /// exhaustion under backpressure, and overall-batch timeout abort the
    /// whole batch; everything else is captured per-operation.
    pub async fn execute_batch(&self, ops: Vec<Operation>) -> Result<BatchResult, ExecutorError> {
        let mut graph: DependencyGraph<Operation> = DependencyGraph::new();
        for op in &ops {
            graph.add_node(op.id.clone(), op.clone());
        }
        for op in &ops {
            for dep in &op.depends_on {
                graph.add_dependency(&op.id, dep)?;
            }
        }
        let stages = graph.execution_order()?;

        let batch_start = std::time::Instant::now();
        let run = async {
            let mut all_results = Vec::with_capacity(ops.len());
            for stage in stages {
                let mut handles = Vec::with_capacity(stage.len());
                for id in stage {
                    let op = graph.node(&id).expect("staged node exists").clone();
                    handles.push(self.run_operation(op));
                }
                let stage_results = futures::future::join_all(handles).await;
                for r in stage_results {
                    all_results.push(r?);
                }
            }
            Ok::<Vec<OperationResult>, ExecutorError>(all_results)
        };

        let results = tokio::time::timeout(self.config.batch_deadline, run)
            .await
            .map_err(|_| ExecutorError::BatchTimeout(self.config.batch_deadline))??;

        let batch_elapsed = batch_start.elapsed();
        let metrics = self.compute_metrics(&results, batch_elapsed);
        Ok(BatchResult { results, metrics })
    }

    /// Acquire a resource slot respecting the backpressure high-water mark,
    /// then dispatch through the optimized spawn path (agent_spawn) or the
    /// generic retrying dispatcher.
    async fn run_operation(&self, op: Operation) -> Result<OperationResult, ExecutorError> {
        let _permit = self.acquire_with_backpressure().await?;

        if op.op_type == OperationType::AgentSpawn {
            Ok(self.run_spawn(&op).await)
        } else {
            Ok(self.run_with_retry(&op).await)
        }
    }

    async fn acquire_with_backpressure(
        &self,
    ) -> Result<crate::resources::ResourceSlot, ExecutorError> {
        if let Ok(slot) = self.resources.allocate() {
            return Ok(slot);
        }
        let waiting = self
            .waiting
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        if waiting > self.config.backpressure_high_water_mark {
            self.waiting.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            return Err(ExecutorError::Backpressure);
        }
        loop {
            tokio::task::yield_now().await;
            if let Ok(slot) = self.resources.allocate() {
                self.waiting.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                return Ok(slot);
            }
        }
    }

    /// Optimized agent-spawn path: worker-slot semaphore plus a hard
    /// `spawn_timeout` deadline. A deadline miss is recorded as a timed-out
    /// result, not a retry — spawn timeout is terminal for that attempt.
    async fn run_spawn(&self, op: &Operation) -> OperationResult {
        let start = std::time::Instant::now();
        let _worker = self.spawn_workers.acquire().await.expect("semaphore open");
        let handler = self.handler_for(op.op_type);

        match tokio::time::timeout(self.config.spawn_timeout, handler.execute(op)).await {
            Ok(Ok(output)) => OperationResult {
                operation_id: op.id.clone(),
                op_type: op.op_type,
                success: true,
                output: Some(output),
                error: None,
                duration_ms: start.elapsed().as_millis() as u64,
                attempts: 1,
                timed_out: false,
            },
            Ok(Err(e)) => OperationResult {
                operation_id: op.id.clone(),
                op_type: op.op_type,
                success: false,
                output: None,
                error: Some(e.message),
                duration_ms: start.elapsed().as_millis() as u64,
                attempts: 1,
                timed_out: false,
            },
            Err(_) => {
                warn!(operation_id = %op.id, "agent spawn missed its deadline");
                OperationResult {
                    operation_id: op.id.clone(),
                    op_type: op.op_type,
                    success: false,
                    output: None,
                    error: Some(format!(
                        "agent spawn exceeded {:?} deadline",
                        self.config.spawn_timeout
                    )),
                    duration_ms: start.elapsed().as_millis() as u64,
                    attempts: 1,
                    timed_out: true,
                }
            }
        }
    }

    /// Generic dispatcher with exponential backoff. Retries do not extend
    /// the operation's own timeout budget; a non-retryable error bypasses
    /// the loop entirely.
    async fn run_with_retry(&self, op: &Operation) -> OperationResult {
        let start = std::time::Instant::now();
        let handler = self.handler_for(op.op_type);
        let max_attempts = op.retry_budget.max(1).min(self.config.retry_attempts.max(1));

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let attempt_result =
                tokio::time::timeout(self.config.operation_timeout, handler.execute(op)).await;

            match attempt_result {
                Ok(Ok(output)) => {
                    return OperationResult {
                        operation_id: op.id.clone(),
                        op_type: op.op_type,
                        success: true,
                        output: Some(output),
                        error: None,
                        duration_ms: start.elapsed().as_millis() as u64,
                        attempts: attempt,
                        timed_out: false,
                    };
                }
                Ok(Err(e)) => {
                    if !e.retryable || attempt >= max_attempts {
                        return OperationResult {
                            operation_id: op.id.clone(),
                            op_type: op.op_type,
                            success: false,
                            output: None,
                            error: Some(e.message),
                            duration_ms: start.elapsed().as_millis() as u64,
                            attempts: attempt,
                            timed_out: false,
                        };
                    }
                    let backoff = self.config.backoff_base * 2u32.pow(attempt - 1);
                    debug!(operation_id = %op.id, attempt, ?backoff, "retrying operation");
                    tokio::time::sleep(backoff).await;
                }
                Err(_) => {
                    return OperationResult {
                        operation_id: op.id.clone(),
                        op_type: op.op_type,
                        success: false,
                        output: None,
                        error: Some(format!(
                            "operation exceeded {:?} timeout",
                            self.config.operation_timeout
                        )),
                        duration_ms: start.elapsed().as_millis() as u64,
                        attempts: attempt,
                        timed_out: true,
                    };
                }
            }
        }
    }

    fn compute_metrics(&self, results: &[OperationResult], batch_elapsed: Duration) -> BatchMetrics {
        let total_ops = results.len();
        let successful_ops = results.iter().filter(|r| r.success).count();
        let failed_ops = total_ops - successful_ops;

        let mut spawn_times: Vec<u64> = results
            .iter()
            .filter(|r| r.op_type == OperationType::AgentSpawn)
            .map(|r| r.duration_ms)
            .collect();
        spawn_times.sort_unstable();
        let avg_spawn_time_ms = if spawn_times.is_empty() {
            0.0
        } else {
            spawn_times.iter().sum::<u64>() as f64 / spawn_times.len() as f64
        };
        let p95_spawn_time_ms = percentile(&spawn_times, 0.95);

        let avg_batch_time_ms = batch_elapsed.as_millis() as f64;
        let throughput_ops_per_sec = if batch_elapsed.as_secs_f64() > 0.0 {
            total_ops as f64 / batch_elapsed.as_secs_f64()
        } else {
            total_ops as f64
        };
        let success_rate = if total_ops == 0 {
            1.0
        } else {
            successful_ops as f64 / total_ops as f64
        };

        BatchMetrics {
            total_ops,
            successful_ops,
            failed_ops,
            avg_spawn_time_ms,
            p95_spawn_time_ms,
            avg_batch_time_ms,
            throughput_ops_per_sec,
            success_rate,
            spawn_budget_exceeded: p95_spawn_time_ms > self.config.spawn_timeout.as_millis() as f64,
        }
    }
}

fn percentile(sorted: &[u64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[rank.min(sorted.len() - 1)] as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(id: &str, op_type: OperationType, depends_on: Vec<&str>) -> Operation {
        Operation {
            id: id.to_string(),
            op_type,
            payload: serde_json::json!({}),
            depends_on: depends_on.into_iter().map(String::from).collect(),
            retry_budget: 3,
        }
    }

    #[tokio::test]
    async fn stage_s3_dependency_ordering() {
        let executor = BatchExecutor::new(ExecutorConfig::default());
        let ops = vec![
            op("A", OperationType::AgentSpawn, vec![]),
            op("C", OperationType::AgentSpawn, vec![]),
            op("B", OperationType::TaskExecute, vec!["A"]),
        ];
        let batch = executor.execute_batch(ops).await.unwrap();
        assert_eq!(batch.metrics.total_ops, 3);
        assert_eq!(batch.metrics.successful_ops, 3);
        assert!(batch
            .results
            .iter()
            .all(|r| r.duration_ms < 200));
    }

    struct FlakyExecutor {
        fail_times: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl OperationExecutor for FlakyExecutor {
        async fn execute(&self, _op: &Operation) -> Result<serde_json::Value, OpError> {
            let n = self.fail_times.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            if n > 0 {
                Err(OpError::retryable("transient failure"))
            } else {
                Ok(serde_json::json!({"ok": true}))
            }
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let executor = BatchExecutor::new(ExecutorConfig {
            backoff_base: Duration::from_millis(1),
            ..ExecutorConfig::default()
        })
        .with_handler(
            OperationType::TaskExecute,
            Arc::new(FlakyExecutor {
                fail_times: std::sync::atomic::AtomicU32::new(2),
            }),
        );

        let batch = executor
            .execute_batch(vec![op("x", OperationType::TaskExecute, vec![])])
            .await
            .unwrap();
        assert!(batch.results[0].success);
        assert_eq!(batch.results[0].attempts, 3);
    }

    struct FatalExecutor;
    #[async_trait]
    impl OperationExecutor for FatalExecutor {
        async fn execute(&self, _op: &Operation) -> Result<serde_json::Value, OpError> {
            Err(OpError::fatal("policy violation"))
        }
    }

    #[tokio::test]
    async fn non_retryable_errors_bypass_retry() {
        let executor = BatchExecutor::new(ExecutorConfig::default())
            .with_handler(OperationType::Command, Arc::new(FatalExecutor));
        let batch = executor
            .execute_batch(vec![op("x", OperationType::Command, vec![])])
            .await
            .unwrap();
        assert!(!batch.results[0].success);
        assert_eq!(batch.results[0].attempts, 1);
    }

    #[tokio::test]
    async fn cycle_aborts_whole_batch() {
        let executor = BatchExecutor::new(ExecutorConfig::default());
        let mut a = op("A", OperationType::TaskExecute, vec!["B"]);
        let b = op("B", OperationType::TaskExecute, vec!["A"]);
        a.depends_on = vec!["B".to_string()];
        let err = executor.execute_batch(vec![a, b]).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Graph(GraphError::CycleDetected(_))));
    }
}
