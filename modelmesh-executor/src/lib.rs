//! Agent coordination & batch execution engine.
//!
//! `graph` stages operations into parallel-safe waves, `resources` bounds
//! how many can run at once, and `executor` drives them through — with a
//! specialized low-latency path for `agent_spawn` operations.

pub mod executor;
pub mod graph;
pub mod resources;

pub use executor::{
    BatchExecutor, BatchMetrics, BatchResult, ExecutorConfig, ExecutorError, NoopExecutor,
    OpError, Operation, OperationExecutor, OperationResult, OperationType,
};
pub use graph::{DependencyGraph, GraphError};
pub use resources::{ResourceError, ResourcePool, ResourceSlot};
