//! Structured fact API handlers
//!
//! Point and range lookups against the signal store, exposed for the
//! external query-serving layer.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use factweave_common::{
    db::models::{FactType, Signal},
    errors::{AppError, Result},
};

fn default_limit() -> u64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct LatestParams {
    pub fact_type: String,
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub fact_type: String,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

#[derive(Serialize)]
pub struct LatestResponse {
    pub signal: Signal,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub subject: String,
    pub fact_type: FactType,
    pub signals: Vec<Signal>,
}

fn parse_fact_type(raw: &str) -> Result<FactType> {
    FactType::parse(raw).ok_or_else(|| AppError::InvalidFormat {
        message: format!("Unknown fact type: {}", raw),
    })
}

/// Most recent signal for (subject, fact_type), optionally pinned to a period
pub async fn latest(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Query(params): Query<LatestParams>,
) -> Result<Json<LatestResponse>> {
    let fact_type = parse_fact_type(&params.fact_type)?;

    let signal = state
        .store
        .latest(&subject, fact_type, params.period.as_deref())
        .await?
        .ok_or(AppError::SignalNotFound { subject })?;

    Ok(Json(LatestResponse { signal }))
}

/// Signal history for (subject, fact_type), newest first
pub async fn history(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>> {
    let fact_type = parse_fact_type(&params.fact_type)?;
    let limit = params.limit.min(100);

    let signals = state.store.history(&subject, fact_type, limit).await?;

    Ok(Json(HistoryResponse {
        subject,
        fact_type,
        signals,
    }))
}
