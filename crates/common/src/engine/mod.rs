//! Retrieval engine client abstraction
//!
//! The semantic engine (vector search, graph traversal, answer synthesis) is
//! an external service consumed over HTTP. This module provides the trait
//! seam, the reqwest-backed client, and a counting mock for tests.
//!
//! Mode strings are opaque: the router's decision selects which configured
//! mode is passed through, nothing here interprets them.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// A unit of retrieved evidence text, owned by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineChunk {
    pub id: String,

    pub content: String,

    /// Fallback attribution key, format "source_type:details"
    pub artifact_path: String,
}

/// One edge in a multi-hop reasoning path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipHop {
    pub entity1: String,
    pub relation: String,
    pub entity2: String,
}

/// Engine answer: synthesized text plus the raw evidence it used
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResponse {
    pub answer: String,

    pub chunks: Vec<EngineChunk>,

    /// Reasoning paths for multi-hop answers; empty for single-hop
    #[serde(default)]
    pub paths: Vec<Vec<RelationshipHop>>,
}

/// Document handed to the engine's indexer at ingestion time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    pub document_id: Uuid,

    /// Enriched text with inline provenance markers already embedded
    pub content: String,

    pub artifact_path: String,

    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Trait for the external retrieval engine
#[async_trait]
pub trait RetrievalEngine: Send + Sync {
    /// Run a semantic query in the given (opaque) mode
    async fn query(&self, text: &str, mode: &str) -> Result<EngineResponse>;

    /// Hand a document to the engine's indexer
    async fn index_document(&self, document: &IndexDocument) -> Result<()>;
}

/// HTTP client for the retrieval engine
pub struct HttpRetrievalEngine {
    client: reqwest::Client,
    base_url: String,
    timeout_ms: u64,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    text: &'a str,
    mode: &'a str,
}

impl HttpRetrievalEngine {
    /// Create a new client. The timeout bounds every engine call; a timeout
    /// is surfaced to the caller since no fallback answer source exists.
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            timeout_ms: timeout.as_millis() as u64,
        })
    }
}

#[async_trait]
impl RetrievalEngine for HttpRetrievalEngine {
    async fn query(&self, text: &str, mode: &str) -> Result<EngineResponse> {
        let url = format!("{}/query", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&QueryRequest { text, mode })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::EngineTimeout {
                        timeout_ms: self.timeout_ms,
                    }
                } else {
                    AppError::EngineError {
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::EngineError {
                message: format!("Engine error {}: {}", status, body),
            });
        }

        response.json().await.map_err(|e| AppError::EngineError {
            message: format!("Failed to parse engine response: {}", e),
        })
    }

    async fn index_document(&self, document: &IndexDocument) -> Result<()> {
        let url = format!("{}/index", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(document)
            .send()
            .await
            .map_err(|e| AppError::IndexError {
                message: format!("Index request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::IndexError {
                message: format!("Indexer error {}: {}", status, body),
            });
        }

        Ok(())
    }
}

/// Mock retrieval engine for tests: returns a canned response and counts
/// calls, so tests can assert the fast path skips the engine entirely.
#[derive(Default)]
pub struct MockRetrievalEngine {
    response: Option<EngineResponse>,
    query_calls: AtomicUsize,
    index_calls: AtomicUsize,
}

impl MockRetrievalEngine {
    pub fn new(response: EngineResponse) -> Self {
        Self {
            response: Some(response),
            query_calls: AtomicUsize::new(0),
            index_calls: AtomicUsize::new(0),
        }
    }

    /// A mock that fails every query
    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn index_calls(&self) -> usize {
        self.index_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalEngine for MockRetrievalEngine {
    async fn query(&self, _text: &str, _mode: &str) -> Result<EngineResponse> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);

        self.response
            .clone()
            .ok_or_else(|| AppError::EngineError {
                message: "mock engine unreachable".to_string(),
            })
    }

    async fn index_document(&self, _document: &IndexDocument) -> Result<()> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);

        if self.response.is_none() {
            return Err(AppError::IndexError {
                message: "mock indexer unreachable".to_string(),
            });
        }
        Ok(())
    }
}
