use crate::dag::types::{RetryPolicy, Task, TaskId, TaskKind, TaskOutput};
use crate::dag::DagError;
use daggy::{Dag, EdgeIndex, NodeIndex, Walker};
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use tracing::{debug, info, warn};

/// DAG of pipeline tasks
#[derive(Debug)]
pub struct PipelineDag {
    /// The underlying daggy DAG
    dag: Dag<Task, ()>,
    /// Map from TaskId to daggy NodeIndex
    task_id_to_index: HashMap<TaskId, NodeIndex>,
    /// Map from daggy NodeIndex to TaskId
    index_to_task_id: HashMap<NodeIndex, TaskId>,
    next_task_id: usize,
    /// Cached topological order, reset on every structural change
    cached_toposort: Option<Vec<TaskId>>,
}

impl PipelineDag {
    /// Creates a new empty DAG
    pub fn new() -> Self {
        PipelineDag {
            dag: Dag::new(),
            task_id_to_index: HashMap::new(),
            index_to_task_id: HashMap::new(),
            next_task_id: 0,
            cached_toposort: None,
        }
    }

    /// Builds the daily marketing pipeline: both extractions feed the
    /// transform, which feeds the load.
    pub fn marketing(retry: RetryPolicy) -> Result<Self, DagError> {
        let mut dag = PipelineDag::new();
        let events = dag.add_task(TaskKind::ExtractEvents, retry);
        let campaigns = dag.add_task(TaskKind::ExtractCampaigns, retry);
        let transform = dag.add_task(TaskKind::Transform, retry);
        let load = dag.add_task(TaskKind::Load, retry);

        dag.add_edge(events, transform)?;
        dag.add_edge(campaigns, transform)?;
        dag.add_edge(transform, load)?;
        Ok(dag)
    }

    /// Adds a new task to the DAG
    ///
    /// # Returns
    /// Returns the TaskId of the newly created task
    pub fn add_task(&mut self, kind: TaskKind, retry: RetryPolicy) -> TaskId {
        let task_id = TaskId(self.next_task_id);
        self.next_task_id += 1;

        let index = self.dag.add_node(Task::new(task_id, kind, retry));
        self.task_id_to_index.insert(task_id, index);
        self.index_to_task_id.insert(index, task_id);
        self.cached_toposort = None;

        task_id
    }

    /// Adds an edge (dependency) between two tasks
    ///
    /// # Arguments
    /// * `from` - Upstream task ID
    /// * `to` - Downstream task ID
    ///
    /// # Returns
    /// Returns Ok(EdgeIndex) if successful, or Err(DagError) if a cycle would be created
    pub fn add_edge(&mut self, from: TaskId, to: TaskId) -> Result<EdgeIndex, DagError> {
        let from_index = self.index_of(from)?;
        let to_index = self.index_of(to)?;

        match self.dag.add_edge(from_index, to_index, ()) {
            Ok(edge_index) => {
                self.cached_toposort = None;
                Ok(edge_index)
            }
            Err(_would_cycle) => Err(DagError::CycleDetected(format!(
                "Adding edge from {:?} to {:?} would create a cycle",
                from, to
            ))),
        }
    }

    fn index_of(&self, task_id: TaskId) -> Result<NodeIndex, DagError> {
        self.task_id_to_index
            .get(&task_id)
            .copied()
            .ok_or_else(|| DagError::TaskNotFound(format!("Task {:?} not found", task_id)))
    }

    /// Gets a task by its ID
    pub fn get_task(&self, task_id: TaskId) -> Option<&Task> {
        self.task_id_to_index
            .get(&task_id)
            .and_then(|&index| self.dag.node_weight(index))
    }

    /// Finds the first task of the given kind
    pub fn find_task(&self, kind: TaskKind) -> Option<TaskId> {
        self.task_ids()
            .into_iter()
            .find(|&id| self.get_task(id).map(|t| t.kind) == Some(kind))
    }

    /// Returns the number of tasks in the DAG
    pub fn task_count(&self) -> usize {
        self.dag.node_count()
    }

    /// Returns the number of edges in the DAG
    pub fn edge_count(&self) -> usize {
        self.dag.edge_count()
    }

    /// Gets all task IDs in insertion order
    pub fn task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.task_id_to_index.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Gets upstream tasks of a given task, in ID order
    pub fn parents(&self, task_id: TaskId) -> Vec<TaskId> {
        let Some(&index) = self.task_id_to_index.get(&task_id) else {
            return Vec::new();
        };
        let mut parents: Vec<TaskId> = self
            .dag
            .parents(index)
            .iter(&self.dag)
            .filter_map(|(_, parent_idx)| self.index_to_task_id.get(&parent_idx).copied())
            .collect();
        parents.sort();
        parents
    }

    /// Gets downstream tasks of a given task, in ID order
    pub fn children(&self, task_id: TaskId) -> Vec<TaskId> {
        let Some(&index) = self.task_id_to_index.get(&task_id) else {
            return Vec::new();
        };
        let mut children: Vec<TaskId> = self
            .dag
            .children(index)
            .iter(&self.dag)
            .filter_map(|(_, child_idx)| self.index_to_task_id.get(&child_idx).copied())
            .collect();
        children.sort();
        children
    }

    /// Computes a topological order with Kahn's algorithm.
    ///
    /// Ties are broken by task ID so the order is stable across runs.
    pub fn topological_order(&self) -> Result<Vec<TaskId>, DagError> {
        let mut in_degree: HashMap<TaskId, usize> =
            self.task_ids().into_iter().map(|id| (id, 0)).collect();
        for edge in self.dag.raw_edges() {
            if let Some(target) = self.index_to_task_id.get(&edge.target()) {
                *in_degree.entry(*target).or_insert(0) += 1;
            }
        }

        let mut queue: VecDeque<TaskId> = self
            .task_ids()
            .into_iter()
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();
        let mut result = Vec::with_capacity(self.task_count());

        while let Some(task_id) = queue.pop_front() {
            result.push(task_id);
            for child in self.children(task_id) {
                if let Some(degree) = in_degree.get_mut(&child) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }

        if result.len() != self.task_count() {
            return Err(DagError::InvalidOperation(
                "Topological sort failed - DAG may contain cycles".to_string(),
            ));
        }

        Ok(result)
    }

    /// Gets the execution order of tasks, cached until the structure changes.
    ///
    /// # Errors
    /// Returns `DagError::InvalidOperation` if DAG structure is invalid
    pub fn execution_order(&mut self) -> Result<Vec<TaskId>, DagError> {
        if let Some(ref cached) = self.cached_toposort {
            return Ok(cached.clone());
        }

        let sorted = self.topological_order()?;
        self.cached_toposort = Some(sorted.clone());
        Ok(sorted)
    }

    /// Executes the DAG with the provided task runner
    ///
    /// Tasks whose parents have all finished run concurrently on the tokio
    /// runtime; the next level starts once the current one has finished. A
    /// failing task is retried according to its `RetryPolicy`. The first task
    /// that fails on every attempt aborts the run and nothing downstream of it
    /// executes.
    ///
    /// # Arguments
    /// * `run_task` - Async function that takes (task, parent outputs in parent ID order)
    ///
    /// # Returns
    /// Returns HashMap of TaskId -> TaskOutput with execution results
    pub async fn execute<F, Fut>(&mut self, run_task: F) -> Result<HashMap<TaskId, TaskOutput>, DagError>
    where
        F: Fn(Task, Vec<TaskOutput>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<TaskOutput, DagError>> + Send + 'static,
    {
        let mut remaining = self.execution_order()?;
        let mut results: HashMap<TaskId, TaskOutput> = HashMap::new();

        while !remaining.is_empty() {
            let (level, rest): (Vec<TaskId>, Vec<TaskId>) = remaining
                .iter()
                .copied()
                .partition(|&id| self.parents(id).iter().all(|p| results.contains_key(p)));

            if level.is_empty() {
                return Err(DagError::ExecutionError(
                    "No tasks ready to execute - possible circular dependency".to_string(),
                ));
            }

            let mut handles = Vec::with_capacity(level.len());
            for &task_id in &level {
                let task = self
                    .get_task(task_id)
                    .cloned()
                    .ok_or_else(|| DagError::TaskNotFound(format!("Task {:?} not found", task_id)))?;
                let inputs: Vec<TaskOutput> = self
                    .parents(task_id)
                    .iter()
                    .filter_map(|parent| results.get(parent).cloned())
                    .collect();
                let run_task = run_task.clone();

                handles.push(tokio::spawn(run_with_retry(task, inputs, run_task)));
            }

            for (task_id, joined) in level.iter().zip(join_all(handles).await) {
                let output = joined.map_err(|e| DagError::ExecutionError(format!("Task join error: {}", e)))??;
                results.insert(*task_id, output);
            }

            remaining = rest;
        }

        Ok(results)
    }
}

async fn run_with_retry<F, Fut>(task: Task, inputs: Vec<TaskOutput>, run_task: F) -> Result<TaskOutput, DagError>
where
    F: Fn(Task, Vec<TaskOutput>) -> Fut,
    Fut: Future<Output = Result<TaskOutput, DagError>>,
{
    let max_attempts = task.retry.max_attempts();
    let mut attempt = 1;

    loop {
        debug!(task = task.kind.name(), attempt, "Running task");
        match run_task(task.clone(), inputs.clone()).await {
            Ok(output) => {
                info!(task = task.kind.name(), records = output.len(), "Task finished");
                return Ok(output);
            }
            Err(e) if attempt < max_attempts && e.is_retryable() => {
                warn!(
                    task = task.kind.name(),
                    attempt,
                    error = %e,
                    delay_seconds = task.retry.delay.as_secs(),
                    "Task failed, retrying"
                );
                tokio::time::sleep(task.retry.delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(DagError::TaskFailed {
                    task: task.kind.name().to_string(),
                    attempts: attempt,
                    message: e.to_string(),
                });
            }
        }
    }
}

impl Default for PipelineDag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn no_retry() -> RetryPolicy {
        RetryPolicy::none()
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            retries: 1,
            delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_create_empty_dag() {
        let mut dag = PipelineDag::new();
        assert_eq!(dag.task_count(), 0);
        assert_eq!(dag.edge_count(), 0);
        assert!(dag.execution_order().unwrap().is_empty());
    }

    #[test]
    fn test_marketing_pipeline_shape() {
        let mut dag = PipelineDag::marketing(RetryPolicy::default()).unwrap();
        assert_eq!(dag.task_count(), 4);
        assert_eq!(dag.edge_count(), 3);

        let transform = dag.find_task(TaskKind::Transform).unwrap();
        let parents: Vec<TaskKind> = dag
            .parents(transform)
            .into_iter()
            .map(|id| dag.get_task(id).unwrap().kind)
            .collect();
        assert_eq!(parents, vec![TaskKind::ExtractEvents, TaskKind::ExtractCampaigns]);

        let order: Vec<TaskKind> = dag
            .execution_order()
            .unwrap()
            .into_iter()
            .map(|id| dag.get_task(id).unwrap().kind)
            .collect();
        assert_eq!(
            order,
            vec![
                TaskKind::ExtractEvents,
                TaskKind::ExtractCampaigns,
                TaskKind::Transform,
                TaskKind::Load
            ]
        );
    }

    #[test]
    fn test_cycle_detection() {
        let mut dag = PipelineDag::new();
        let a = dag.add_task(TaskKind::Transform, no_retry());
        let b = dag.add_task(TaskKind::Load, no_retry());
        dag.add_edge(a, b).unwrap();

        let result = dag.add_edge(b, a);
        assert!(matches!(result, Err(DagError::CycleDetected(_))));

        let self_loop = dag.add_edge(a, a);
        assert!(matches!(self_loop, Err(DagError::CycleDetected(_))));
    }

    #[test]
    fn test_edge_to_unknown_task() {
        let mut dag = PipelineDag::new();
        let a = dag.add_task(TaskKind::Load, no_retry());
        assert!(matches!(
            dag.add_edge(a, TaskId(99)),
            Err(DagError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_toposort_cache_invalidation() {
        let mut dag = PipelineDag::new();
        let a = dag.add_task(TaskKind::ExtractEvents, no_retry());
        let b = dag.add_task(TaskKind::Transform, no_retry());
        assert_eq!(dag.execution_order().unwrap(), vec![a, b]);

        // b before a once the edge reverses their dependency
        dag.add_edge(b, a).unwrap();
        assert_eq!(dag.execution_order().unwrap(), vec![b, a]);
    }

    #[tokio::test]
    async fn test_parallel_execution_of_extractions() {
        let mut dag = PipelineDag::marketing(no_retry()).unwrap();

        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));
        let (concurrent_clone, max_clone) = (Arc::clone(&concurrent), Arc::clone(&max_concurrent));

        let run_task = move |task: Task, _inputs: Vec<TaskOutput>| {
            let concurrent = Arc::clone(&concurrent_clone);
            let max_concurrent = Arc::clone(&max_clone);
            async move {
                let current = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(match task.kind {
                    TaskKind::Load => TaskOutput::Loaded(0),
                    _ => TaskOutput::Summary(Vec::new()),
                })
            }
        };

        let results = dag.execute(run_task).await.unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_inputs_follow_dependencies() {
        let mut dag = PipelineDag::marketing(no_retry()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let run_task = move |task: Task, inputs: Vec<TaskOutput>| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().await.push((task.kind, inputs.len()));
                Ok(match task.kind {
                    TaskKind::ExtractEvents => TaskOutput::GameEvents(Default::default()),
                    TaskKind::ExtractCampaigns => TaskOutput::CampaignClicks(Default::default()),
                    TaskKind::Transform => {
                        assert!(inputs[0].as_game_events().is_some());
                        assert!(inputs[1].as_campaign_clicks().is_some());
                        TaskOutput::Summary(Vec::new())
                    }
                    TaskKind::Load => TaskOutput::Loaded(inputs[0].len()),
                })
            }
        };

        let results = dag.execute(run_task).await.unwrap();
        let load = dag.find_task(TaskKind::Load).unwrap();
        assert_eq!(results.get(&load), Some(&TaskOutput::Loaded(0)));

        let seen = seen.lock().await;
        let transform_pos = seen.iter().position(|(k, _)| *k == TaskKind::Transform).unwrap();
        assert_eq!(seen[transform_pos].1, 2);
        assert_eq!(seen.last().unwrap(), &(TaskKind::Load, 1));
    }

    #[tokio::test]
    async fn test_task_retried_once() {
        let mut dag = PipelineDag::new();
        dag.add_task(TaskKind::Load, quick_retry());
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let run_task = move |_task: Task, _inputs: Vec<TaskOutput>| {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(DagError::ExecutionError("database locked".to_string()))
                } else {
                    Ok(TaskOutput::Loaded(5))
                }
            }
        };

        let results = dag.execute(run_task).await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(results.values().next(), Some(&TaskOutput::Loaded(5)));
    }

    #[tokio::test]
    async fn test_unrecoverable_error_not_retried() {
        let mut dag = PipelineDag::new();
        dag.add_task(TaskKind::Transform, quick_retry());
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let run_task = move |_task: Task, _inputs: Vec<TaskOutput>| {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(DagError::Unrecoverable("missing column source".to_string()))
            }
        };

        let err = dag.execute(run_task).await.unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(
            err,
            DagError::TaskFailed {
                task: "transform".to_string(),
                attempts: 1,
                message: "Unrecoverable error: missing column source".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_failure_stops_downstream() {
        let mut dag = PipelineDag::marketing(quick_retry()).unwrap();
        let ran = Arc::new(Mutex::new(Vec::new()));
        let ran_clone = Arc::clone(&ran);

        let run_task = move |task: Task, _inputs: Vec<TaskOutput>| {
            let ran = Arc::clone(&ran_clone);
            async move {
                ran.lock().await.push(task.kind);
                match task.kind {
                    TaskKind::Transform => Err(DagError::ExecutionError("out of memory".to_string())),
                    _ => Ok(TaskOutput::Summary(Vec::new())),
                }
            }
        };

        let err = dag.execute(run_task).await.unwrap_err();
        assert_eq!(
            err,
            DagError::TaskFailed {
                task: "transform".to_string(),
                attempts: 2,
                message: "Execution error: out of memory".to_string(),
            }
        );

        let ran = ran.lock().await;
        assert_eq!(ran.iter().filter(|k| **k == TaskKind::Transform).count(), 2);
        assert!(!ran.contains(&TaskKind::Load));
    }
}
