//! Query handler

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

use crate::AppState;
use factweave_common::{
    errors::{AppError, Result},
    query::QueryAnswer,
};

/// Query request
#[derive(Debug, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 1000))]
    pub query: String,
}

/// Query response: the attributed answer plus timing
#[derive(Serialize)]
pub struct QueryResponse {
    #[serde(flatten)]
    pub answer: QueryAnswer,
    pub processing_time_ms: u64,
}

/// Answer a natural-language query with provenance
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    let start = Instant::now();

    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let answer = state.query_engine.answer(&request.query).await?;

    let processing_time_ms = start.elapsed().as_millis() as u64;

    tracing::info!(
        query = %request.query,
        query_type = ?answer.classification.query_type,
        primary = ?answer.primary,
        latency_ms = processing_time_ms,
        "Query answered"
    );

    Ok(Json(QueryResponse {
        answer,
        processing_time_ms,
    }))
}
