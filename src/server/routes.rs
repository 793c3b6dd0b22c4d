//! Route definitions for the viewer

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::state::AppState;

/// Creates the viewer router with all routes and middleware
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        // Row listing and dashboard aggregates
        .route("/summary", get(handlers::get_summary))
        .route("/summary/kpis", get(handlers::get_kpis))
        .route("/summary/revenue-by-source", get(handlers::revenue_by_source))
        .route("/summary/playtime-by-source", get(handlers::playtime_by_source))
        .route("/summary/top-campaigns", get(handlers::top_campaigns))
        .route("/pipeline/graph", get(handlers::pipeline_graph))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
