//! Serializable view of the task graph for the `graph` command and the
//! viewer's `/pipeline/graph` route.

use crate::dag::{DagError, DailySchedule, PipelineDag};
use serde::{Deserialize, Serialize};

/// A task in the graph view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: usize,
    /// Task name (e.g., "extract_events")
    pub name: String,
    pub description: String,
    pub retries: u32,
    pub retry_delay_seconds: u64,
}

/// A dependency in the graph view, by task name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
}

/// Complete description of the pipeline graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    /// Task names in execution order
    pub execution_order: Vec<String>,
    /// Schedule expression, e.g. "@daily"
    pub schedule: String,
    /// Missed intervals are never backfilled
    pub catchup: bool,
}

impl PipelineDag {
    /// Describes the graph for display.
    ///
    /// # Errors
    /// Returns `DagError::InvalidOperation` if the graph cannot be ordered.
    pub fn to_view(&self, schedule: &DailySchedule) -> Result<GraphView, DagError> {
        let name_of = |id| {
            self.get_task(id)
                .map(|task| task.kind.name().to_string())
                .ok_or_else(|| DagError::TaskNotFound(format!("Task {:?} not found", id)))
        };

        let mut nodes = Vec::with_capacity(self.task_count());
        let mut edges = Vec::with_capacity(self.edge_count());
        for id in self.task_ids() {
            let task = self
                .get_task(id)
                .ok_or_else(|| DagError::TaskNotFound(format!("Task {:?} not found", id)))?;
            nodes.push(GraphNode {
                id: id.0,
                name: task.kind.name().to_string(),
                description: task.kind.description().to_string(),
                retries: task.retry.retries,
                retry_delay_seconds: task.retry.delay.as_secs(),
            });
            for child in self.children(id) {
                edges.push(GraphEdge {
                    source: task.kind.name().to_string(),
                    target: name_of(child)?,
                });
            }
        }

        let execution_order = self
            .topological_order()?
            .into_iter()
            .map(name_of)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(GraphView {
            nodes,
            edges,
            execution_order,
            schedule: schedule.expression(),
            catchup: false,
        })
    }
}
