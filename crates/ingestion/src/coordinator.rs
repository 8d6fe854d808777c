//! Dual-write coordinator
//!
//! During ingestion, extracted signals are written to the structured store
//! while the enriched document goes to the retrieval engine's indexer.
//! The store is an optimization layer: each signal write failure is logged
//! and counted, never propagated. The engine's index is the system of
//! record, so the document is always handed over and an indexer failure
//! fails the ingest.

use crate::errors::IngestionError;
use factweave_common::db::{NewSignal, SignalStore};
use factweave_common::engine::{IndexDocument, RetrievalEngine};
use factweave_common::metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Outcome of one document ingest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub document_id: Uuid,
    pub signals_written: usize,
    pub signals_failed: usize,
    pub indexed: bool,
}

/// Dual-write coordinator
pub struct DualWriteCoordinator {
    store: Arc<dyn SignalStore>,
    engine: Arc<dyn RetrievalEngine>,
}

impl DualWriteCoordinator {
    pub fn new(store: Arc<dyn SignalStore>, engine: Arc<dyn RetrievalEngine>) -> Self {
        Self { store, engine }
    }

    /// Ingest one enriched document and its extracted signals.
    ///
    /// Signal writes and document indexing are independent paths: a failure
    /// in one must not block the other.
    #[instrument(skip(self, document, signals), fields(document_id = %document.document_id))]
    pub async fn ingest(
        &self,
        document: IndexDocument,
        signals: Vec<NewSignal>,
    ) -> Result<IngestReport, IngestionError> {
        let start = Instant::now();
        let document_id = document.document_id;

        let mut signals_written = 0;
        let mut signals_failed = 0;

        for signal in signals {
            match self.store.insert(signal).await {
                Ok(_) => {
                    signals_written += 1;
                    metrics::record_signal_write(true);
                }
                Err(e) => {
                    // Non-fatal: the store is not the source of record.
                    signals_failed += 1;
                    metrics::record_signal_write(false);
                    warn!(
                        document_id = %document_id,
                        error = %e,
                        "Signal write failed, continuing ingestion"
                    );
                }
            }
        }

        // Always handed to the indexer, whatever the store outcome.
        self.engine
            .index_document(&document)
            .await
            .map_err(|e| IngestionError::IndexError(e.to_string()))?;

        metrics::record_ingestion(start.elapsed().as_secs_f64());

        info!(
            document_id = %document_id,
            signals_written,
            signals_failed,
            "Document ingested"
        );

        Ok(IngestReport {
            document_id,
            signals_written,
            signals_failed,
            indexed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use factweave_common::db::models::{FactType, Signal};
    use factweave_common::db::MemorySignalStore;
    use factweave_common::engine::{EngineResponse, MockRetrievalEngine};
    use factweave_common::errors::{AppError, Result};

    /// Store that rejects every write
    struct RejectingStore;

    #[async_trait]
    impl SignalStore for RejectingStore {
        async fn insert(&self, _signal: NewSignal) -> Result<Signal> {
            Err(AppError::DatabaseConnection {
                message: "write refused".to_string(),
            })
        }

        async fn latest(
            &self,
            _subject_id: &str,
            _fact_type: FactType,
            _period: Option<&str>,
        ) -> Result<Option<Signal>> {
            Ok(None)
        }

        async fn history(
            &self,
            _subject_id: &str,
            _fact_type: FactType,
            _limit: u64,
        ) -> Result<Vec<Signal>> {
            Ok(Vec::new())
        }

        async fn by_document(&self, _document_id: Uuid) -> Result<Vec<Signal>> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    fn document() -> IndexDocument {
        IndexDocument {
            document_id: Uuid::new_v4(),
            content: "EMAIL_SOURCE(doc1.eml) NVDA upgraded to BUY.".to_string(),
            artifact_path: "email:doc1.eml".to_string(),
            metadata: serde_json::json!({}),
        }
    }

    fn signal() -> NewSignal {
        NewSignal {
            subject_id: "NVDA".to_string(),
            fact_type: FactType::Rating,
            value: "BUY".to_string(),
            period: None,
            confidence: 0.9,
            observed_at: Utc::now(),
            source_document_id: Uuid::new_v4(),
        }
    }

    fn reachable_engine() -> Arc<MockRetrievalEngine> {
        Arc::new(MockRetrievalEngine::new(EngineResponse {
            answer: String::new(),
            chunks: vec![],
            paths: vec![],
        }))
    }

    #[tokio::test]
    async fn test_ingest_writes_signals_and_indexes() {
        let store = Arc::new(MemorySignalStore::new());
        let engine = reachable_engine();
        let coordinator = DualWriteCoordinator::new(store.clone(), engine.clone());

        let report = coordinator
            .ingest(document(), vec![signal(), signal()])
            .await
            .unwrap();

        assert_eq!(report.signals_written, 2);
        assert_eq!(report.signals_failed, 0);
        assert!(report.indexed);
        assert_eq!(store.len().await, 2);
        assert_eq!(engine.index_calls(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_block_indexing() {
        let engine = reachable_engine();
        let coordinator = DualWriteCoordinator::new(Arc::new(RejectingStore), engine.clone());

        let report = coordinator
            .ingest(document(), vec![signal(), signal()])
            .await
            .unwrap();

        assert_eq!(report.signals_written, 0);
        assert_eq!(report.signals_failed, 2);
        assert!(report.indexed);
        assert_eq!(engine.index_calls(), 1);
    }

    #[tokio::test]
    async fn test_indexer_failure_is_fatal() {
        let store = Arc::new(MemorySignalStore::new());
        let engine = Arc::new(MockRetrievalEngine::unreachable());
        let coordinator = DualWriteCoordinator::new(store.clone(), engine);

        let result = coordinator.ingest(document(), vec![signal()]).await;

        assert!(matches!(result, Err(IngestionError::IndexError(_))));
        // The signal write happened before the index attempt.
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_ingest_with_no_signals_still_indexes() {
        let store = Arc::new(MemorySignalStore::new());
        let engine = reachable_engine();
        let coordinator = DualWriteCoordinator::new(store, engine.clone());

        let report = coordinator.ingest(document(), vec![]).await.unwrap();

        assert_eq!(report.signals_written, 0);
        assert!(report.indexed);
        assert_eq!(engine.index_calls(), 1);
    }
}
