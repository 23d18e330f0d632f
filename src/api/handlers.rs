use crate::api::AppState;
use crate::error::Result;
use crate::facets::{FacetResponse, FieldValue, Filter, IndexStats, QueryBudget, Record, RecordId};
use crate::metrics::gather_metrics;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use validator::Validate;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Prometheus scrape endpoint
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

/// Index statistics
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<IndexStats>> {
    let stats = state.service.get_stats().await?;
    Ok(Json(stats))
}

/// Create or replace one record
pub async fn put_record(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
    Json(request): Json<PutRecordRequest>,
) -> Result<StatusCode> {
    state.service.ingest(id, &request.fields).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PutRecordRequest {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

/// Create or replace many records under one commit
pub async fn ingest_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchIngestRequest>,
) -> Result<Json<BatchIngestResponse>> {
    request.validate()?;
    let indexed = state.service.ingest_batch(&request.records).await?;
    Ok(Json(BatchIngestResponse { indexed }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct BatchIngestRequest {
    #[validate(length(min = 1, max = 10000))]
    pub records: Vec<Record>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchIngestResponse {
    pub indexed: usize,
}

/// Get a record by ID
pub async fn get_record(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
) -> Result<Json<Record>> {
    let record = state.service.get_record(id).await?;
    Ok(Json(record))
}

/// Delete a record; unknown IDs still answer 204
pub async fn delete_record(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
) -> Result<StatusCode> {
    state.service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Drop every record
pub async fn clear_records(State(state): State<AppState>) -> Result<StatusCode> {
    state.service.clear_index().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Facet counts for a filter
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<FacetResponse>> {
    request.validate()?;

    let filter: Filter = request.filter.into_iter().collect();
    let response = match request.timeout_ms {
        Some(timeout_ms) => {
            let budget = QueryBudget::with_timeout(Duration::from_millis(timeout_ms));
            state
                .service
                .search_with_budget(&filter, request.top_k, budget)
                .await?
        }
        None => state.service.search(&filter, request.top_k).await?,
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SearchRequest {
    /// `field -> value` equalities, all of which must hold
    #[serde(default)]
    pub filter: BTreeMap<String, FieldValue>,

    #[validate(range(min = 1))]
    pub top_k: Option<usize>,

    /// Per-request deadline overriding the configured one
    #[validate(range(min = 1, max = 600000))]
    pub timeout_ms: Option<u64>,
}
