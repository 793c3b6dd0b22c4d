pub mod coerce;
pub mod config;
pub mod dag;
pub mod extract;
pub mod load;
pub mod pipeline;
pub mod query;
pub mod records;
pub mod server;
pub mod transform;

pub use config::{ConfigError, DatabaseConfig, PipelineConfig, RemoteConfig, SourcesConfig};
pub use dag::{DagError, DailySchedule, GraphView, PipelineDag, RetryPolicy, TaskKind, TaskOutput};
pub use extract::{ExtractError, Extractor, ExtractorConfig, Source};
pub use load::{LoadError, SqliteLoader, DEFAULT_TABLE_NAME};
pub use pipeline::{Pipeline, PipelineError, PipelineStage, RunReport};
pub use query::{CampaignRanking, Kpis, QueryError, SourceTotal, SummaryFilter, SummaryReader};
pub use records::{
    CampaignClick, CampaignClickRow, GameEvent, GameEventRow, Record, RecordSet, UserCampaignSummary,
};
pub use server::{create_router, run_server, ApiError, AppState, ServerConfig};
pub use transform::{transform_and_join, TransformError};
