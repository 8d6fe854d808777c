//! Signal store trait seam
//!
//! Every component takes an explicit `Arc<dyn SignalStore>` instead of a
//! global handle, so tests substitute `MemorySignalStore` for Postgres.

use crate::db::models::{FactType, Signal};
use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A signal about to be written; the store assigns id and created_at
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSignal {
    pub subject_id: String,
    pub fact_type: FactType,
    pub value: String,
    pub period: Option<String>,
    pub confidence: f32,
    pub observed_at: DateTime<Utc>,
    pub source_document_id: Uuid,
}

/// Structured fact store contract
///
/// Inserts are append-only; reads are index-backed point/range lookups.
/// The store is an optimization layer over the retrieval engine's index,
/// so callers must tolerate it being unavailable.
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Append a signal (no overwrite semantics)
    async fn insert(&self, signal: NewSignal) -> Result<Signal>;

    /// Most recently observed signal for (subject, fact_type), optionally
    /// filtered to an exact period
    async fn latest(
        &self,
        subject_id: &str,
        fact_type: FactType,
        period: Option<&str>,
    ) -> Result<Option<Signal>>;

    /// Signal history for (subject, fact_type), newest first
    async fn history(
        &self,
        subject_id: &str,
        fact_type: FactType,
        limit: u64,
    ) -> Result<Vec<Signal>>;

    /// All signals extracted from a document (secondary key lookup)
    async fn by_document(&self, document_id: Uuid) -> Result<Vec<Signal>>;

    /// Availability probe; failure means "route queries as if no store"
    async fn ping(&self) -> Result<()>;
}

/// In-memory signal store for tests and local development
#[derive(Default)]
pub struct MemorySignalStore {
    signals: RwLock<Vec<Signal>>,
}

impl MemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.signals.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.signals.read().await.is_empty()
    }
}

#[async_trait]
impl SignalStore for MemorySignalStore {
    async fn insert(&self, signal: NewSignal) -> Result<Signal> {
        let now = Utc::now();
        let model = Signal {
            id: Uuid::new_v4(),
            subject_id: signal.subject_id,
            fact_type: signal.fact_type.as_str().to_string(),
            value: signal.value,
            period: signal.period,
            confidence: signal.confidence,
            observed_at: signal.observed_at.into(),
            source_document_id: signal.source_document_id,
            created_at: now.into(),
        };

        self.signals.write().await.push(model.clone());
        Ok(model)
    }

    async fn latest(
        &self,
        subject_id: &str,
        fact_type: FactType,
        period: Option<&str>,
    ) -> Result<Option<Signal>> {
        let signals = self.signals.read().await;
        let latest = signals
            .iter()
            .filter(|s| s.subject_id == subject_id && s.fact_type == fact_type.as_str())
            .filter(|s| period.is_none() || s.period.as_deref() == period)
            .max_by_key(|s| s.observed_at)
            .cloned();
        Ok(latest)
    }

    async fn history(
        &self,
        subject_id: &str,
        fact_type: FactType,
        limit: u64,
    ) -> Result<Vec<Signal>> {
        let signals = self.signals.read().await;
        let mut matching: Vec<Signal> = signals
            .iter()
            .filter(|s| s.subject_id == subject_id && s.fact_type == fact_type.as_str())
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn by_document(&self, document_id: Uuid) -> Result<Vec<Signal>> {
        let signals = self.signals.read().await;
        Ok(signals
            .iter()
            .filter(|s| s.source_document_id == document_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
