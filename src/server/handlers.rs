//! HTTP request handlers for viewer endpoints

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::error::ApiError;
use super::state::AppState;
use crate::dag::GraphView;
use crate::query::{CampaignRanking, Kpis, SourceTotal, SummaryFilter, MAX_ROW_LIMIT};
use crate::records::UserCampaignSummary;

/// Campaigns listed by `/summary/top-campaigns` unless `limit` is given
const DEFAULT_TOP_CAMPAIGNS: usize = 10;

/// Health check endpoint
///
/// Returns a simple status response to verify the server is running
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok"
    }))
}

/// Query parameters shared by the summary endpoints
#[derive(Debug, Default, Deserialize)]
pub struct SummaryParams {
    pub limit: Option<usize>,
    /// Comma-separated campaign names
    pub campaigns: Option<String>,
    /// Comma-separated traffic sources
    pub sources: Option<String>,
}

impl SummaryParams {
    fn filter(&self) -> SummaryFilter {
        SummaryFilter {
            campaigns: split_list(self.campaigns.as_deref()),
            sources: split_list(self.sources.as_deref()),
        }
    }

    fn limit(&self) -> Result<Option<usize>, ApiError> {
        match self.limit {
            Some(0) => Err(ApiError::InvalidParameter("limit must be positive".to_string())),
            Some(limit) if limit > MAX_ROW_LIMIT => Err(ApiError::InvalidParameter(format!(
                "limit must not exceed {}",
                MAX_ROW_LIMIT
            ))),
            other => Ok(other),
        }
    }
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Response for the row listing
#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub table: String,
    pub count: usize,
    pub filter: SummaryFilter,
    pub rows: Vec<UserCampaignSummary>,
}

/// GET /summary - List summary rows
pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SummaryParams>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let limit = params.limit()?;
    let filter = params.filter();

    let reader = state.reader.lock().await;
    let rows = reader.fetch_rows(limit, &filter)?;

    Ok(Json(SummaryResponse {
        table: reader.table_name().to_string(),
        count: rows.len(),
        filter,
        rows,
    }))
}

/// GET /summary/kpis - Headline figures
pub async fn get_kpis(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SummaryParams>,
) -> Result<Json<Kpis>, ApiError> {
    let reader = state.reader.lock().await;
    Ok(Json(reader.kpis(&params.filter())?))
}

/// GET /summary/revenue-by-source
pub async fn revenue_by_source(State(state): State<Arc<AppState>>) -> Result<Json<Vec<SourceTotal>>, ApiError> {
    let reader = state.reader.lock().await;
    Ok(Json(reader.revenue_by_source()?))
}

/// GET /summary/playtime-by-source
pub async fn playtime_by_source(State(state): State<Arc<AppState>>) -> Result<Json<Vec<SourceTotal>>, ApiError> {
    let reader = state.reader.lock().await;
    Ok(Json(reader.playtime_by_source()?))
}

/// GET /summary/top-campaigns - Campaigns ranked by revenue
pub async fn top_campaigns(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SummaryParams>,
) -> Result<Json<Vec<CampaignRanking>>, ApiError> {
    let limit = params.limit()?.unwrap_or(DEFAULT_TOP_CAMPAIGNS);
    let reader = state.reader.lock().await;
    Ok(Json(reader.top_campaigns(limit)?))
}

/// GET /pipeline/graph - Task graph of the pipeline
pub async fn pipeline_graph(State(state): State<Arc<AppState>>) -> Json<GraphView> {
    Json(state.graph.as_ref().clone())
}
