//! Factweave Ingestion Service
//!
//! Accepts enriched documents (inline provenance markers already embedded by
//! the upstream tagger) together with their extracted signals, and runs the
//! dual-write: signals into the structured store, the document into the
//! retrieval engine's index.

mod coordinator;
mod errors;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use coordinator::{DualWriteCoordinator, IngestReport};
use errors::IngestionError;
use factweave_common::{
    config::AppConfig,
    db::models::FactType,
    db::{DbPool, NewSignal, Repository, SignalStore},
    engine::{HttpRetrievalEngine, IndexDocument, RetrievalEngine},
    errors::AppError,
    metrics,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use validator::Validate;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<DualWriteCoordinator>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(true)
        .json()
        .init();

    info!(
        "Starting Factweave Ingestion Service v{}",
        factweave_common::VERSION
    );

    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    metrics::register_metrics();

    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    let store: Arc<dyn SignalStore> = Arc::new(Repository::new(db));

    let engine: Arc<dyn RetrievalEngine> = Arc::new(HttpRetrievalEngine::new(
        config.engine.base_url.clone(),
        config.engine_timeout(),
    )?);

    let coordinator = Arc::new(DualWriteCoordinator::new(store, engine));

    let state = AppState { coordinator };

    let app = Router::new()
        .route("/health", get(health))
        .route("/v1/ingest", post(ingest))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// Ingest request: the enriched document plus its extracted signals
#[derive(Debug, Deserialize, Validate)]
struct IngestRequest {
    document: DocumentInput,

    #[serde(default)]
    #[validate(nested)]
    signals: Vec<SignalInput>,
}

#[derive(Debug, Deserialize)]
struct DocumentInput {
    /// Assigned by the caller for idempotent re-ingestion; generated if absent
    document_id: Option<Uuid>,

    content: String,

    artifact_path: String,

    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Debug, Deserialize, Validate)]
struct SignalInput {
    subject_id: String,

    fact_type: String,

    value: String,

    period: Option<String>,

    #[validate(range(min = 0.0, max = 1.0))]
    confidence: f32,

    /// Defaults to ingestion time when the extractor carried no date
    observed_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct IngestResponse {
    #[serde(flatten)]
    report: IngestReport,
}

async fn ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    if request.document.content.is_empty() {
        return Err(AppError::Validation {
            message: "Document content is empty".to_string(),
            field: Some("document.content".to_string()),
        });
    }

    let document_id = request.document.document_id.unwrap_or_else(Uuid::new_v4);

    let signals = request
        .signals
        .into_iter()
        .map(|s| {
            let fact_type =
                FactType::parse(&s.fact_type).ok_or_else(|| AppError::InvalidFormat {
                    message: format!("Unknown fact type: {}", s.fact_type),
                })?;
            Ok(NewSignal {
                subject_id: s.subject_id,
                fact_type,
                value: s.value,
                period: s.period,
                confidence: s.confidence,
                observed_at: s.observed_at.unwrap_or_else(Utc::now),
                source_document_id: document_id,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    let document = IndexDocument {
        document_id,
        content: request.document.content,
        artifact_path: request.document.artifact_path,
        metadata: request.document.metadata,
    };

    let report = state
        .coordinator
        .ingest(document, signals)
        .await
        .map_err(|e| match e {
            IngestionError::IndexError(message) => AppError::IndexError { message },
            other => AppError::Internal {
                message: other.to_string(),
            },
        })?;

    Ok(Json(IngestResponse { report }))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
