//! Route handlers.

use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use semsearch_core::{IngestReport, SearchResult};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request / response types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    /// Missing and blank queries both return an empty result.
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    /// File paths, directories or http(s) URLs.
    pub sources: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backend: String,
    pub entries: usize,
    pub dimension: usize,
    pub uptime_secs: u64,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.engine.backend().to_string(),
        entries: state.engine.len().await,
        dimension: state.engine.dimension(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /search?q=...
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResult>, ApiError> {
    let started = Instant::now();
    let result = state
        .engine
        .search_within(&params.q, state.search_deadline)
        .await;
    state.metrics.observe("search", started.elapsed());
    Ok(Json(result?))
}

/// POST /ingest
///
/// Ingests the listed sources as one batch and persists the index.
pub async fn ingest(
    State(state): State<AppState>,
    Json(body): Json<IngestRequest>,
) -> Result<Json<IngestReport>, ApiError> {
    let started = Instant::now();
    let result = ingest_and_persist(&state, body).await;
    state.metrics.observe("ingest", started.elapsed());
    result
}

async fn ingest_and_persist(state: &AppState, body: IngestRequest) -> Result<Json<IngestReport>, ApiError> {
    let sources: Vec<String> = body
        .sources
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if sources.is_empty() {
        return Err(ApiError::BadRequest(
            "'sources' must list at least one path or URL".to_string(),
        ));
    }

    let report = state
        .engine
        .ingest_within(&sources, state.ingest_deadline)
        .await?;
    if report.chunks > 0 {
        state.engine.persist().await?;
    }
    info!(batch_id = %report.batch_id, chunks = report.chunks, "Ingest request served");
    Ok(Json(report))
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state
        .metrics
        .render()
        .map_err(|e| ApiError::Internal(format!("metrics encoding failed: {e}")))?;
    Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body))
}
