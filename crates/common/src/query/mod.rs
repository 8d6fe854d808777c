//! Query orchestration
//!
//! Ties the router, signal store, retrieval engine, and attributors into one
//! query path:
//! - structured queries answer from the signal store alone (fast path)
//! - semantic queries delegate to the engine, then every chunk, sentence,
//!   and reasoning hop is attributed
//! - hybrid queries run both legs concurrently and merge
//!
//! The store is an optimization layer: any store failure degrades to the
//! semantic path. The engine is the system of record for semantic answers:
//! its failures and timeouts surface to the caller.

use crate::attribution::{
    AttributedChunk, AttributedPath, AttributedSentence, ContextParser, PathAttributor,
    SentenceAttributor,
};
use crate::config::AppConfig;
use crate::db::models::Signal;
use crate::db::SignalStore;
use crate::embeddings::Embedder;
use crate::engine::RetrievalEngine;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::routing::{QueryClassification, QueryRouter, QueryType};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Which leg produced the leading answer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    Structured,
    Semantic,
}

/// Fact-store answer: the signal plus a display summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredAnswer {
    pub signal: Signal,
    pub summary: String,
}

/// Engine answer enriched with full attribution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticAnswer {
    pub answer: String,
    pub chunks: Vec<AttributedChunk>,
    pub sentences: Vec<AttributedSentence>,
    pub paths: Vec<AttributedPath>,
}

/// Complete query result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub query: String,
    pub classification: QueryClassification,
    pub structured: Option<StructuredAnswer>,
    pub semantic: Option<SemanticAnswer>,
    pub primary: AnswerSource,
}

/// Query engine: the composition root used by the gateway
pub struct QueryEngine {
    router: QueryRouter,
    store: Arc<dyn SignalStore>,
    engine: Arc<dyn RetrievalEngine>,
    parser: ContextParser,
    path_attributor: PathAttributor,
    sentence_attributor: SentenceAttributor,
    semantic_mode: String,
    hybrid_mode: String,
    engine_timeout: Duration,
}

impl QueryEngine {
    pub fn new(
        store: Arc<dyn SignalStore>,
        engine: Arc<dyn RetrievalEngine>,
        embedder: Arc<dyn Embedder>,
        config: &AppConfig,
    ) -> Self {
        Self {
            router: QueryRouter::new(),
            store,
            engine,
            parser: ContextParser::new(),
            path_attributor: PathAttributor::new(config.attribution.inferred_hop_confidence),
            sentence_attributor: SentenceAttributor::new(
                embedder,
                config.attribution.sentence_threshold,
            ),
            semantic_mode: config.engine.semantic_mode.clone(),
            hybrid_mode: config.engine.hybrid_mode.clone(),
            engine_timeout: config.engine_timeout(),
        }
    }

    /// Answer a query with full provenance
    #[instrument(skip(self), fields(query = %query))]
    pub async fn answer(&self, query: &str) -> Result<QueryAnswer> {
        let start = Instant::now();

        // A failed probe routes the query as if the store did not exist.
        let store_available = self.store.ping().await.is_ok();
        if !store_available {
            warn!("Signal store unavailable, routing without it");
        }

        let classification = self.router.classify(query, store_available);
        debug!(query_type = ?classification.query_type, "Query classified");

        let result = match classification.query_type {
            QueryType::Structured => self.answer_structured(query, &classification).await,
            QueryType::Semantic | QueryType::Unknown => {
                let semantic = self.answer_semantic(query, &self.semantic_mode).await?;
                Ok(QueryAnswer {
                    query: query.to_string(),
                    classification: classification.clone(),
                    structured: None,
                    semantic: Some(semantic),
                    primary: AnswerSource::Semantic,
                })
            }
            QueryType::Hybrid => self.answer_hybrid(query, &classification).await,
        };

        if let Ok(ref answer) = result {
            let route = match answer.classification.query_type {
                QueryType::Structured => "structured",
                QueryType::Semantic => "semantic",
                QueryType::Hybrid => "hybrid",
                QueryType::Unknown => "unknown",
            };
            metrics::record_query(start.elapsed().as_secs_f64(), route);
        }

        result
    }

    /// Structured fast path, degrading to semantic when the store has no
    /// answer (missing extraction, store error, or no matching signal)
    async fn answer_structured(
        &self,
        query: &str,
        classification: &QueryClassification,
    ) -> Result<QueryAnswer> {
        match self.lookup_signal(classification).await {
            Ok(Some(structured)) => {
                return Ok(QueryAnswer {
                    query: query.to_string(),
                    classification: classification.clone(),
                    structured: Some(structured),
                    semantic: None,
                    primary: AnswerSource::Structured,
                });
            }
            Ok(None) => debug!("No matching signal, degrading to semantic path"),
            Err(e) => warn!(error = %e, "Signal lookup failed, degrading to semantic path"),
        }

        let semantic = self.answer_semantic(query, &self.semantic_mode).await?;
        Ok(QueryAnswer {
            query: query.to_string(),
            classification: classification.clone(),
            structured: None,
            semantic: Some(semantic),
            primary: AnswerSource::Semantic,
        })
    }

    /// Hybrid: both legs run concurrently; the merge waits on both. The
    /// structured leg may fail silently, the semantic leg may not.
    async fn answer_hybrid(
        &self,
        query: &str,
        classification: &QueryClassification,
    ) -> Result<QueryAnswer> {
        let (structured_result, semantic_result) = tokio::join!(
            self.lookup_signal(classification),
            self.answer_semantic(query, &self.hybrid_mode),
        );

        let structured = match structured_result {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Structured leg failed in hybrid query");
                None
            }
        };
        let semantic = semantic_result?;

        let primary = reconcile(&structured, &semantic);

        Ok(QueryAnswer {
            query: query.to_string(),
            classification: classification.clone(),
            structured,
            semantic: Some(semantic),
            primary,
        })
    }

    /// Point lookup against the signal store using the extracted parameters
    async fn lookup_signal(
        &self,
        classification: &QueryClassification,
    ) -> Result<Option<StructuredAnswer>> {
        let (Some(subject), Some(fact_type)) =
            (&classification.subject, classification.fact_type)
        else {
            return Ok(None);
        };

        let signal = self
            .store
            .latest(subject, fact_type, classification.period.as_deref())
            .await?;

        Ok(signal.map(|signal| {
            let period = signal
                .period
                .as_deref()
                .map(|p| format!(" ({})", p))
                .unwrap_or_default();
            let summary = format!(
                "{} {}{}: {}",
                signal.subject_id, signal.fact_type, period, signal.value
            );
            StructuredAnswer { signal, summary }
        }))
    }

    /// Semantic leg: engine query under timeout, then chunk, path, and
    /// sentence attribution
    async fn answer_semantic(&self, query: &str, mode: &str) -> Result<SemanticAnswer> {
        let start = Instant::now();
        let response = match tokio::time::timeout(
            self.engine_timeout,
            self.engine.query(query, mode),
        )
        .await
        {
            Ok(Ok(response)) => {
                metrics::record_engine_call(start.elapsed().as_secs_f64(), true);
                response
            }
            Ok(Err(e)) => {
                metrics::record_engine_call(start.elapsed().as_secs_f64(), false);
                return Err(e);
            }
            Err(_) => {
                metrics::record_engine_call(start.elapsed().as_secs_f64(), false);
                return Err(AppError::EngineTimeout {
                    timeout_ms: self.engine_timeout.as_millis() as u64,
                });
            }
        };

        let chunks: Vec<AttributedChunk> = response
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let attributed = self.parser.enrich(chunk, i + 1);
                metrics::record_attribution(match attributed.attribution_method {
                    crate::attribution::AttributionMethod::InlineMarker => "inline_marker",
                    crate::attribution::AttributionMethod::DerivedPath => "derived_path",
                    crate::attribution::AttributionMethod::Default => "default",
                });
                attributed
            })
            .collect();

        let paths = self.path_attributor.attribute_paths(&response.paths, &chunks);

        // A provider outage must not fail the query: return the answer with
        // every sentence marked unattributed.
        let sentences = match self
            .sentence_attributor
            .attribute(&response.answer, &chunks)
            .await
        {
            Ok(sentences) => sentences,
            Err(e) => {
                warn!(error = %e, "Sentence attribution failed, returning unattributed answer");
                self.sentence_attributor.unattributed(&response.answer)
            }
        };

        let unattributed = sentences.iter().filter(|s| !s.has_attribution).count();
        metrics::record_unattributed_sentences(unattributed);

        Ok(SemanticAnswer {
            answer: response.answer,
            chunks,
            sentences,
            paths,
        })
    }
}

/// Hybrid reconciliation: the leg with the most recent observation leads.
/// Undated semantic evidence never outranks a dated signal; ties keep the
/// structured signal in front.
fn reconcile(structured: &Option<StructuredAnswer>, semantic: &SemanticAnswer) -> AnswerSource {
    let Some(structured) = structured else {
        return AnswerSource::Semantic;
    };

    let semantic_latest = semantic.chunks.iter().filter_map(|c| c.observed_at).max();
    let signal_observed = structured.signal.observed_at.with_timezone(&Utc);

    match semantic_latest {
        Some(t) if t > signal_observed => AnswerSource::Semantic,
        _ => AnswerSource::Structured,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::FactType;
    use crate::db::{MemorySignalStore, NewSignal};
    use crate::embeddings::MockEmbedder;
    use crate::engine::{EngineChunk, EngineResponse, MockRetrievalEngine, RelationshipHop};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use uuid::Uuid;

    /// Store whose probe always fails, simulating an outage
    struct UnavailableStore;

    #[async_trait]
    impl SignalStore for UnavailableStore {
        async fn insert(&self, _signal: NewSignal) -> Result<Signal> {
            Err(AppError::DatabaseConnection {
                message: "store down".to_string(),
            })
        }

        async fn latest(
            &self,
            _subject_id: &str,
            _fact_type: FactType,
            _period: Option<&str>,
        ) -> Result<Option<Signal>> {
            Err(AppError::DatabaseConnection {
                message: "store down".to_string(),
            })
        }

        async fn history(
            &self,
            _subject_id: &str,
            _fact_type: FactType,
            _limit: u64,
        ) -> Result<Vec<Signal>> {
            Err(AppError::DatabaseConnection {
                message: "store down".to_string(),
            })
        }

        async fn by_document(&self, _document_id: Uuid) -> Result<Vec<Signal>> {
            Err(AppError::DatabaseConnection {
                message: "store down".to_string(),
            })
        }

        async fn ping(&self) -> Result<()> {
            Err(AppError::DatabaseConnection {
                message: "store down".to_string(),
            })
        }
    }

    fn engine_response(marker_date: Option<&str>) -> EngineResponse {
        let date = marker_date
            .map(|d| format!(", {}", d))
            .unwrap_or_default();
        EngineResponse {
            answer: "NVDA was upgraded to BUY after strong margins.".to_string(),
            chunks: vec![EngineChunk {
                id: "chunk-1".to_string(),
                content: format!("EMAIL_SOURCE(doc1.eml{}) NVDA upgraded to BUY.", date),
                artifact_path: "email:doc1.eml".to_string(),
            }],
            paths: vec![vec![RelationshipHop {
                entity1: "NVDA".to_string(),
                relation: "upgraded to".to_string(),
                entity2: "BUY".to_string(),
            }]],
        }
    }

    async fn seeded_store(observed: chrono::DateTime<Utc>) -> Arc<MemorySignalStore> {
        let store = Arc::new(MemorySignalStore::new());
        store
            .insert(NewSignal {
                subject_id: "NVDA".to_string(),
                fact_type: FactType::Rating,
                value: "BUY".to_string(),
                period: None,
                confidence: 0.9,
                observed_at: observed,
                source_document_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        store
    }

    fn query_engine(
        store: Arc<dyn SignalStore>,
        engine: Arc<MockRetrievalEngine>,
    ) -> QueryEngine {
        QueryEngine::new(
            store,
            engine,
            Arc::new(MockEmbedder::new(8)),
            &AppConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_structured_path_skips_engine() {
        let observed = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let store = seeded_store(observed).await;
        let engine = Arc::new(MockRetrievalEngine::new(engine_response(None)));
        let qe = query_engine(store, engine.clone());

        let answer = qe.answer("What is NVDA's rating?").await.unwrap();

        assert_eq!(answer.classification.query_type, QueryType::Structured);
        assert_eq!(answer.primary, AnswerSource::Structured);
        assert_eq!(answer.structured.as_ref().unwrap().signal.value, "BUY");
        assert!(answer.semantic.is_none());
        assert_eq!(engine.query_calls(), 0);
    }

    #[tokio::test]
    async fn test_semantic_path_attributes_chunks() {
        let observed = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let store = seeded_store(observed).await;
        let engine = Arc::new(MockRetrievalEngine::new(engine_response(None)));
        let qe = query_engine(store, engine.clone());

        let answer = qe.answer("Why is NVDA rated BUY?").await.unwrap();

        assert_eq!(answer.classification.query_type, QueryType::Semantic);
        assert_eq!(engine.query_calls(), 1);

        let semantic = answer.semantic.unwrap();
        assert_eq!(semantic.chunks.len(), 1);
        assert_eq!(semantic.chunks[0].source_type.as_str(), "email");
        assert_eq!(semantic.chunks[0].confidence, 0.90);
        assert_eq!(semantic.chunks[0].relevance_rank, 1);
        assert!(!semantic.sentences.is_empty());
        assert_eq!(semantic.paths.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_routes_to_semantic() {
        let observed = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let store = seeded_store(observed).await;
        let engine = Arc::new(MockRetrievalEngine::new(engine_response(None)));
        let qe = query_engine(store, engine.clone());

        let answer = qe.answer("hello there").await.unwrap();

        assert_eq!(answer.classification.query_type, QueryType::Unknown);
        assert_eq!(answer.primary, AnswerSource::Semantic);
        assert_eq!(engine.query_calls(), 1);
    }

    #[tokio::test]
    async fn test_store_outage_degrades_to_semantic() {
        let engine = Arc::new(MockRetrievalEngine::new(engine_response(None)));
        let qe = query_engine(Arc::new(UnavailableStore), engine.clone());

        let answer = qe.answer("What is NVDA's rating?").await.unwrap();

        // Router saw the store as unavailable; the query still succeeds.
        assert_eq!(answer.primary, AnswerSource::Semantic);
        assert_eq!(engine.query_calls(), 1);
    }

    #[tokio::test]
    async fn test_engine_failure_is_fatal_for_semantic_queries() {
        let observed = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let store = seeded_store(observed).await;
        let engine = Arc::new(MockRetrievalEngine::unreachable());
        let qe = query_engine(store, engine);

        let result = qe.answer("Why is NVDA rated BUY?").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_hybrid_runs_both_legs() {
        let observed = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let store = seeded_store(observed).await;
        let engine = Arc::new(MockRetrievalEngine::new(engine_response(None)));
        let qe = query_engine(store, engine.clone());

        let answer = qe
            .answer("What's NVDA's latest rating and why did it change?")
            .await
            .unwrap();

        assert_eq!(answer.classification.query_type, QueryType::Hybrid);
        assert!(answer.structured.is_some());
        assert!(answer.semantic.is_some());
        assert_eq!(engine.query_calls(), 1);
    }

    #[tokio::test]
    async fn test_hybrid_prefers_fresher_semantic_evidence() {
        // Signal observed in May; the semantic chunk carries a July marker.
        let observed = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let store = seeded_store(observed).await;
        let engine = Arc::new(MockRetrievalEngine::new(engine_response(Some("2024-07-12"))));
        let qe = query_engine(store, engine);

        let answer = qe
            .answer("What's NVDA's latest rating and why did it change?")
            .await
            .unwrap();

        assert_eq!(answer.primary, AnswerSource::Semantic);
        assert!(answer.structured.is_some());
    }

    #[tokio::test]
    async fn test_hybrid_keeps_structured_when_semantic_is_undated() {
        let observed = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let store = seeded_store(observed).await;
        let engine = Arc::new(MockRetrievalEngine::new(engine_response(None)));
        let qe = query_engine(store, engine);

        let answer = qe
            .answer("What's NVDA's latest rating and why did it change?")
            .await
            .unwrap();

        assert_eq!(answer.primary, AnswerSource::Structured);
    }
}
