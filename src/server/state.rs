//! Shared application state for the viewer

use crate::dag::GraphView;
use crate::query::SummaryReader;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Read-only summary reader
    /// Wrapped in Mutex because SQLite connections are not thread-safe
    pub reader: Arc<Mutex<SummaryReader>>,
    /// Description of the pipeline graph
    pub graph: Arc<GraphView>,
}

impl AppState {
    pub fn new(reader: SummaryReader, graph: GraphView) -> Self {
        AppState {
            reader: Arc::new(Mutex::new(reader)),
            graph: Arc::new(graph),
        }
    }
}
