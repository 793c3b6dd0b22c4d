//! Pipeline task graph
//!
//! The run is wired as a DAG of tasks (`extract_events`, `extract_campaigns`
//! feeding `transform`, which feeds `load`) with cycle detection, topological
//! ordering, level-parallel execution and per-task retries. A daily schedule
//! drives repeated runs.

mod core;
mod schedule;
mod types;
mod visualization;

pub use self::core::PipelineDag;
pub use self::schedule::DailySchedule;
pub use self::types::{RetryPolicy, Task, TaskId, TaskKind, TaskOutput};
pub use self::visualization::{GraphEdge, GraphNode, GraphView};

/// Error types for DAG operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DagError {
    /// Cycle detected when adding edge
    CycleDetected(String),
    /// Task not found
    TaskNotFound(String),
    /// Invalid operation
    InvalidOperation(String),
    /// Execution error
    ExecutionError(String),
    /// Task error that another attempt cannot fix
    Unrecoverable(String),
    /// A task failed on every attempt
    TaskFailed {
        task: String,
        attempts: u32,
        message: String,
    },
}

impl std::fmt::Display for DagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DagError::CycleDetected(msg) => write!(f, "Cycle detected: {}", msg),
            DagError::TaskNotFound(msg) => write!(f, "Task not found: {}", msg),
            DagError::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
            DagError::ExecutionError(msg) => write!(f, "Execution error: {}", msg),
            DagError::Unrecoverable(msg) => write!(f, "Unrecoverable error: {}", msg),
            DagError::TaskFailed {
                task,
                attempts,
                message,
            } => write!(
                f,
                "Task {} failed after {} attempt(s): {}",
                task, attempts, message
            ),
        }
    }
}

impl DagError {
    /// Returns true if a task failing with this error may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DagError::ExecutionError(_))
    }
}

impl std::error::Error for DagError {}
