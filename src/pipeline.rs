//! Pipeline driver
//!
//! Sequences one run through `Extracting → Transforming → Loading`. The two
//! extractions run concurrently, the transform waits on both, and the load
//! waits on the transform. A run either loads a complete snapshot or loads
//! nothing.

use crate::config::PipelineConfig;
use crate::dag::{DagError, DailySchedule, PipelineDag, RetryPolicy, Task, TaskKind, TaskOutput};
use crate::extract::{ExtractError, Extractor, Source};
use crate::load::{LoadError, SqliteLoader};
use crate::records::{CampaignClickRow, GameEventRow, Record, UserCampaignSummary};
use crate::transform::{transform_and_join, TransformError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// States of a run. Success or the first fault is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Extracting,
    Transforming,
    Loading,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let repr = match self {
            PipelineStage::Extracting => "extracting",
            PipelineStage::Transforming => "transforming",
            PipelineStage::Loading => "loading",
        };
        write!(f, "{repr}")
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub events_extracted: usize,
    pub clicks_extracted: usize,
    pub rows_loaded: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Extract, transform and load wired to concrete sources and a database.
#[derive(Debug, Clone)]
pub struct Pipeline {
    extractor: Extractor,
    loader: SqliteLoader,
    game_events: Source,
    campaigns: Source,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(extractor: Extractor, loader: SqliteLoader, game_events: Source, campaigns: Source) -> Self {
        Pipeline {
            extractor,
            loader,
            game_events,
            campaigns,
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the per-task retry policy used by [`Pipeline::run_dag`].
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builds a pipeline from resolved configuration.
    ///
    /// # Errors
    /// Returns `PipelineError::Config` if a source location has no supported
    /// format or the HTTP client cannot be built.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let setup = |e: ExtractError| PipelineError::Config(e.to_string());

        let extractor = Extractor::with_config(config.extractor.clone()).map_err(setup)?;
        let game_events = Source::from_location(&config.sources.game_events).map_err(setup)?;
        let campaigns = Source::from_location(&config.sources.campaigns).map_err(setup)?;
        let loader = SqliteLoader::new(&config.database);

        Ok(Pipeline::new(extractor, loader, game_events, campaigns).with_retry(config.retry))
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// The task graph [`Pipeline::run_dag`] executes.
    pub fn dag(&self) -> Result<PipelineDag, DagError> {
        PipelineDag::marketing(self.retry)
    }

    /// Runs the pipeline once, without retries.
    ///
    /// # Errors
    /// Returns the first fault; nothing is loaded unless every stage succeeded.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id);
        let result = self.run_stages(run_id).instrument(span.clone()).await;
        span.in_scope(|| log_outcome(&result));
        result
    }

    async fn run_stages(&self, run_id: Uuid) -> Result<RunReport, PipelineError> {
        let started_at = Utc::now();

        info!(stage = %PipelineStage::Extracting, "Extracting game events and campaign clicks");
        let (games, clicks) = tokio::join!(
            self.extractor.extract_game_events(&self.game_events),
            self.extractor.extract_campaign_clicks(&self.campaigns)
        );
        let games = games.map_err(|error| PipelineError::Extract {
            dataset: GameEventRow::DATASET,
            error,
        })?;
        let clicks = clicks.map_err(|error| PipelineError::Extract {
            dataset: CampaignClickRow::DATASET,
            error,
        })?;

        info!(stage = %PipelineStage::Transforming, "Transforming");
        let summary = transform_and_join(&games, &clicks)?;

        info!(stage = %PipelineStage::Loading, records = summary.len(), "Loading");
        let rows_loaded = load_blocking(self.loader.clone(), summary).await?;

        Ok(RunReport {
            run_id,
            events_extracted: games.len(),
            clicks_extracted: clicks.len(),
            rows_loaded,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Runs the pipeline through its task graph, retrying failed tasks.
    pub async fn run_dag(&self) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id, mode = "dag");
        let result = self.run_graph(run_id).instrument(span.clone()).await;
        span.in_scope(|| log_outcome(&result));
        result
    }

    async fn run_graph(&self, run_id: Uuid) -> Result<RunReport, PipelineError> {
        let started_at = Utc::now();
        let mut dag = self.dag()?;

        let pipeline = self.clone();
        let results = dag
            .execute(move |task, inputs| pipeline.clone().run_task(task, inputs))
            .await?;

        let count = |kind| {
            dag.find_task(kind)
                .and_then(|id| results.get(&id))
                .map(TaskOutput::len)
                .unwrap_or(0)
        };

        Ok(RunReport {
            run_id,
            events_extracted: count(TaskKind::ExtractEvents),
            clicks_extracted: count(TaskKind::ExtractCampaigns),
            rows_loaded: count(TaskKind::Load),
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn run_task(self, task: Task, inputs: Vec<TaskOutput>) -> Result<TaskOutput, DagError> {
        let output = match task.kind {
            TaskKind::ExtractEvents => self
                .extractor
                .extract_game_events(&self.game_events)
                .await
                .map(TaskOutput::GameEvents)
                .map_err(|error| PipelineError::Extract {
                    dataset: GameEventRow::DATASET,
                    error,
                }),
            TaskKind::ExtractCampaigns => self
                .extractor
                .extract_campaign_clicks(&self.campaigns)
                .await
                .map(TaskOutput::CampaignClicks)
                .map_err(|error| PipelineError::Extract {
                    dataset: CampaignClickRow::DATASET,
                    error,
                }),
            TaskKind::Transform => {
                let games = inputs
                    .iter()
                    .find_map(TaskOutput::as_game_events)
                    .ok_or_else(|| missing_input(&task, TaskKind::ExtractEvents))?;
                let clicks = inputs
                    .iter()
                    .find_map(TaskOutput::as_campaign_clicks)
                    .ok_or_else(|| missing_input(&task, TaskKind::ExtractCampaigns))?;
                transform_and_join(games, clicks)
                    .map(TaskOutput::Summary)
                    .map_err(PipelineError::from)
            }
            TaskKind::Load => {
                let summary = inputs
                    .iter()
                    .find_map(TaskOutput::as_summary)
                    .ok_or_else(|| missing_input(&task, TaskKind::Transform))?
                    .to_vec();
                load_blocking(self.loader.clone(), summary)
                    .await
                    .map(TaskOutput::Loaded)
            }
        };

        output.map_err(|e| match e {
            PipelineError::Transform(_) => DagError::Unrecoverable(e.to_string()),
            _ => DagError::ExecutionError(e.to_string()),
        })
    }

    /// Runs the task graph every day at the scheduled time, forever.
    ///
    /// A failed run is logged and the loop waits for the next slot.
    pub async fn run_daily(&self, schedule: &DailySchedule) {
        info!(schedule = %schedule.expression(), "Starting daily schedule");
        loop {
            let now = Utc::now();
            let next = schedule.next_run_after(now);
            info!(next_run = %next, "Waiting for next scheduled run");
            tokio::time::sleep(schedule.until_next(now)).await;

            // Failures are already logged by run_dag.
            let _ = self.run_dag().await;
        }
    }
}

fn missing_input(task: &Task, upstream: TaskKind) -> DagError {
    DagError::InvalidOperation(format!(
        "{} requires the output of {}",
        task.kind.name(),
        upstream.name()
    ))
}

/// Runs the loader on the blocking pool with its own scoped connection.
async fn load_blocking(loader: SqliteLoader, summary: Vec<UserCampaignSummary>) -> Result<usize, PipelineError> {
    tokio::task::spawn_blocking(move || loader.load(&summary))
        .await
        .map_err(|e| PipelineError::TaskJoin(e.to_string()))?
        .map_err(PipelineError::from)
}

fn log_outcome(result: &Result<RunReport, PipelineError>) {
    match result {
        Ok(report) => info!(
            events = report.events_extracted,
            clicks = report.clicks_extracted,
            rows_loaded = report.rows_loaded,
            "Pipeline run finished"
        ),
        Err(e) => match e.stage() {
            Some(stage) => error!(%stage, error = %e, "Pipeline run failed"),
            None => error!(error = %e, "Pipeline run failed"),
        },
    }
}

/// Errors that end a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Invalid source location or extractor settings
    Config(String),
    /// Extraction failed in strict mode
    Extract {
        dataset: &'static str,
        error: ExtractError,
    },
    Transform(TransformError),
    Load(LoadError),
    /// Task graph failure (after retries)
    Dag(DagError),
    /// Blocking load task panicked or was cancelled
    TaskJoin(String),
}

impl PipelineError {
    /// The stage a run was in when it failed, if the failure belongs to one.
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            PipelineError::Extract { .. } => Some(PipelineStage::Extracting),
            PipelineError::Transform(_) => Some(PipelineStage::Transforming),
            PipelineError::Load(_) | PipelineError::TaskJoin(_) => Some(PipelineStage::Loading),
            PipelineError::Config(_) | PipelineError::Dag(_) => None,
        }
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Config(msg) => write!(f, "Configuration error: {}", msg),
            PipelineError::Extract { dataset, error } => {
                write!(f, "Extraction of {} failed: {}", dataset, error)
            }
            PipelineError::Transform(e) => write!(f, "Transform failed: {}", e),
            PipelineError::Load(e) => write!(f, "Load failed: {}", e),
            PipelineError::Dag(e) => write!(f, "{}", e),
            PipelineError::TaskJoin(msg) => write!(f, "Task join error: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Extract { error, .. } => Some(error),
            PipelineError::Transform(e) => Some(e),
            PipelineError::Load(e) => Some(e),
            PipelineError::Dag(e) => Some(e),
            PipelineError::Config(_) | PipelineError::TaskJoin(_) => None,
        }
    }
}

impl From<TransformError> for PipelineError {
    fn from(e: TransformError) -> Self {
        PipelineError::Transform(e)
    }
}

impl From<LoadError> for PipelineError {
    fn from(e: LoadError) -> Self {
        PipelineError::Load(e)
    }
}

impl From<DagError> for PipelineError {
    fn from(e: DagError) -> Self {
        PipelineError::Dag(e)
    }
}
