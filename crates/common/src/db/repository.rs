//! Repository pattern for signal store access
//!
//! SQL-backed implementation of `SignalStore` over Postgres. All reads ride
//! the composite index (subject_id, fact_type, observed_at DESC); the query
//! path never scans.

use crate::db::models::*;
use crate::db::store::{NewSignal, SignalStore};
use crate::db::DbPool;
use crate::errors::Result;
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

/// Repository for signal store operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Signal Operations
    // ========================================================================

    /// Append a signal. Signals are immutable once written; repeated
    /// observations of the same (subject, fact_type, period) insert new rows.
    pub async fn insert_signal(&self, signal: NewSignal) -> Result<Signal> {
        let now = chrono::Utc::now();

        let model = SignalActiveModel {
            id: Set(Uuid::new_v4()),
            subject_id: Set(signal.subject_id),
            fact_type: Set(signal.fact_type.as_str().to_string()),
            value: Set(signal.value),
            period: Set(signal.period),
            confidence: Set(signal.confidence),
            observed_at: Set(signal.observed_at.into()),
            source_document_id: Set(signal.source_document_id),
            created_at: Set(now.into()),
        };

        model.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Most recent signal for (subject, fact_type), optionally pinned to a
    /// period. Index-backed: equality on the two leading columns plus the
    /// descending sort on observed_at.
    pub async fn latest_signal(
        &self,
        subject_id: &str,
        fact_type: FactType,
        period: Option<&str>,
    ) -> Result<Option<Signal>> {
        let mut query = SignalEntity::find()
            .filter(SignalColumn::SubjectId.eq(subject_id))
            .filter(SignalColumn::FactType.eq(fact_type.as_str()));

        if let Some(period) = period {
            query = query.filter(SignalColumn::Period.eq(period));
        }

        query
            .order_by_desc(SignalColumn::ObservedAt)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Signal history for (subject, fact_type), newest first
    pub async fn signal_history(
        &self,
        subject_id: &str,
        fact_type: FactType,
        limit: u64,
    ) -> Result<Vec<Signal>> {
        SignalEntity::find()
            .filter(SignalColumn::SubjectId.eq(subject_id))
            .filter(SignalColumn::FactType.eq(fact_type.as_str()))
            .order_by_desc(SignalColumn::ObservedAt)
            .limit(limit)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// All signals extracted from one source document
    pub async fn signals_by_document(&self, document_id: Uuid) -> Result<Vec<Signal>> {
        SignalEntity::find()
            .filter(SignalColumn::SourceDocumentId.eq(document_id))
            .order_by_desc(SignalColumn::ObservedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl SignalStore for Repository {
    async fn insert(&self, signal: NewSignal) -> Result<Signal> {
        self.insert_signal(signal).await
    }

    async fn latest(
        &self,
        subject_id: &str,
        fact_type: FactType,
        period: Option<&str>,
    ) -> Result<Option<Signal>> {
        self.latest_signal(subject_id, fact_type, period).await
    }

    async fn history(
        &self,
        subject_id: &str,
        fact_type: FactType,
        limit: u64,
    ) -> Result<Vec<Signal>> {
        self.signal_history(subject_id, fact_type, limit).await
    }

    async fn by_document(&self, document_id: Uuid) -> Result<Vec<Signal>> {
        self.signals_by_document(document_id).await
    }

    async fn ping(&self) -> Result<()> {
        Repository::ping(self).await
    }
}
