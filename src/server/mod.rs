//! Read-only HTTP viewer over the loaded campaign summary

mod error;
mod handlers;
mod routes;
mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;

use crate::dag::GraphView;
use crate::load::DEFAULT_TABLE_NAME;
use crate::query::SummaryReader;
use std::sync::Arc;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Server host address (default: "127.0.0.1")
    pub host: String,
    /// Server port (default: 3000)
    pub port: u16,
    /// Path to SQLite database
    pub database_path: String,
    /// Summary table to read (default: "user_campaign_summary")
    pub table_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
            database_path: "marketing.db".to_string(),
            table_name: DEFAULT_TABLE_NAME.to_string(),
        }
    }
}

impl ServerConfig {
    /// Creates a new server configuration
    pub fn new(host: impl Into<String>, port: u16, database_path: impl Into<String>) -> Self {
        ServerConfig {
            host: host.into(),
            port,
            database_path: database_path.into(),
            ..ServerConfig::default()
        }
    }
}

/// Runs the viewer server until it fails.
///
/// Logging must already be initialized by the caller.
///
/// # Arguments
/// * `config` - Server configuration
/// * `graph` - Pipeline graph served at `/pipeline/graph`
///
/// # Returns
/// Returns an error if the database cannot be opened or the server fails to start
pub async fn run_server(config: ServerConfig, graph: GraphView) -> Result<(), Box<dyn std::error::Error>> {
    let reader = SummaryReader::open(&config.database_path, &config.table_name)?;
    let state = Arc::new(AppState::new(reader, graph));
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        database = %config.database_path,
        table = %config.table_name,
        "Viewer listening on http://{}",
        addr
    );

    axum::serve(listener, app).await?;

    Ok(())
}
