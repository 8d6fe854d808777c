//! Sentence Attributor - maps answer sentences to supporting evidence
//!
//! Each sentence of a synthesized answer is compared by embedding cosine
//! similarity against every attributed chunk. Sentences below the threshold
//! are reported as unattributed, never dropped: downstream consumers must be
//! able to see "this claim has no traceable source".
//!
//! Embedding calls are batched per query: one call for the chunk set, one
//! for the sentence set. Chunk embeddings are memoized by chunk_id for the
//! query's lifetime only.

use crate::attribution::AttributedChunk;
use crate::embeddings::{cosine_similarity, Embedder};
use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A sentence mapped to the chunks that plausibly support it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributedSentence {
    pub text: String,

    /// Chunks whose similarity met the threshold, best first
    pub attributed_chunks: Vec<AttributedChunk>,

    /// Best similarity achieved, reported even below the threshold
    pub attribution_confidence: f32,

    /// True iff at least one chunk met the threshold
    pub has_attribution: bool,
}

/// Sentence attributor
pub struct SentenceAttributor {
    embedder: Arc<dyn Embedder>,
    threshold: f32,
}

impl SentenceAttributor {
    pub fn new(embedder: Arc<dyn Embedder>, threshold: f32) -> Self {
        Self { embedder, threshold }
    }

    /// Attribute every sentence of the answer to its supporting chunks.
    ///
    /// Fails only on a total embedding-provider outage; callers then fall
    /// back to `unattributed` so the answer is still returned.
    pub async fn attribute(
        &self,
        answer: &str,
        chunks: &[AttributedChunk],
    ) -> Result<Vec<AttributedSentence>> {
        let sentences = split_sentences(answer);
        if sentences.is_empty() {
            return Ok(Vec::new());
        }

        if chunks.is_empty() {
            return Ok(self.unattributed(answer));
        }

        // Per-query memo keyed by chunk_id: duplicate chunks embed once, and
        // nothing outlives this call.
        let mut seen = std::collections::HashSet::new();
        let unique: Vec<&AttributedChunk> = chunks
            .iter()
            .filter(|c| seen.insert(c.chunk_id.as_str()))
            .collect();

        let chunk_texts: Vec<String> = unique.iter().map(|c| c.content.clone()).collect();
        let chunk_embeddings = self.embedder.embed_batch(&chunk_texts).await?;
        let memo: HashMap<&str, Vec<f32>> = unique
            .iter()
            .map(|c| c.chunk_id.as_str())
            .zip(chunk_embeddings)
            .collect();

        let sentence_embeddings = self.embedder.embed_batch(&sentences).await?;

        let attributed = sentences
            .into_iter()
            .zip(sentence_embeddings)
            .map(|(text, sentence_embedding)| {
                self.attribute_one(text, &sentence_embedding, chunks, &memo)
            })
            .collect();

        Ok(attributed)
    }

    /// Degraded output for embedding-provider outages: the full answer,
    /// every sentence marked unattributed.
    pub fn unattributed(&self, answer: &str) -> Vec<AttributedSentence> {
        split_sentences(answer)
            .into_iter()
            .map(|text| AttributedSentence {
                text,
                attributed_chunks: Vec::new(),
                attribution_confidence: 0.0,
                has_attribution: false,
            })
            .collect()
    }

    fn attribute_one(
        &self,
        text: String,
        sentence_embedding: &[f32],
        chunks: &[AttributedChunk],
        memo: &HashMap<&str, Vec<f32>>,
    ) -> AttributedSentence {
        let mut scored: Vec<(f32, &AttributedChunk)> = chunks
            .iter()
            .filter_map(|chunk| {
                memo.get(chunk.chunk_id.as_str())
                    .map(|embedding| (cosine_similarity(sentence_embedding, embedding), chunk))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let attribution_confidence = scored.first().map(|(sim, _)| *sim).unwrap_or(0.0);

        let attributed_chunks: Vec<AttributedChunk> = scored
            .into_iter()
            .filter(|(sim, _)| *sim >= self.threshold)
            .map(|(_, chunk)| chunk.clone())
            .collect();

        AttributedSentence {
            text,
            has_attribution: !attributed_chunks.is_empty(),
            attributed_chunks,
            attribution_confidence,
        }
    }
}

/// Split text into sentences on terminal punctuation. Finite and
/// restartable; no streaming.
fn split_sentences(text: &str) -> Vec<String> {
    let delimiters = ['.', '?', '!'];
    let mut sentences = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        current.push(ch);
        if delimiters.contains(&ch) {
            let trimmed = current.trim().to_string();
            if !trimmed.is_empty() {
                sentences.push(trimmed);
            }
            current.clear();
        }
    }

    // Add remaining text
    let trimmed = current.trim().to_string();
    if !trimmed.is_empty() {
        sentences.push(trimmed);
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::{AttributionMethod, SourceType};
    use crate::errors::AppError;
    use async_trait::async_trait;

    /// Deterministic embedder: fixed vectors per known text, zero otherwise
    struct FakeEmbedder {
        vectors: HashMap<String, Vec<f32>>,
    }

    impl FakeEmbedder {
        fn new(entries: &[(&str, Vec<f32>)]) -> Self {
            Self {
                vectors: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(self
                .vectors
                .get(text)
                .cloned()
                .unwrap_or_else(|| vec![0.0, 0.0]))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn model_name(&self) -> &str {
            "fake-embedding"
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    /// Embedder that always fails, simulating a provider outage
    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(AppError::EmbeddingError {
                message: "provider outage".to_string(),
            })
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(AppError::EmbeddingError {
                message: "provider outage".to_string(),
            })
        }

        fn model_name(&self) -> &str {
            "failing-embedding"
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn chunk(id: &str, content: &str) -> AttributedChunk {
        AttributedChunk {
            chunk_id: id.to_string(),
            content: content.to_string(),
            artifact_path: format!("email:{}.eml", id),
            source_type: SourceType::Email,
            source_details: HashMap::new(),
            confidence: 0.90,
            observed_at: None,
            relevance_rank: 1,
            attribution_method: AttributionMethod::DerivedPath,
        }
    }

    #[test]
    fn test_sentence_splitting() {
        let sentences = split_sentences("First sentence. Second sentence! Third sentence?");
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0], "First sentence.");
    }

    #[test]
    fn test_split_keeps_trailing_fragment() {
        let sentences = split_sentences("Complete sentence. trailing fragment");
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[1], "trailing fragment");
    }

    #[tokio::test]
    async fn test_attributed_sentence() {
        let embedder = Arc::new(FakeEmbedder::new(&[
            ("Margins expanded in Q2.", vec![1.0, 0.0]),
            ("chunk about margins", vec![1.0, 0.0]),
        ]));
        let attributor = SentenceAttributor::new(embedder, 0.70);

        let chunks = vec![chunk("c1", "chunk about margins")];
        let result = attributor
            .attribute("Margins expanded in Q2.", &chunks)
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
        assert!(result[0].has_attribution);
        assert!((result[0].attribution_confidence - 1.0).abs() < 1e-5);
        assert_eq!(result[0].attributed_chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_below_threshold_reports_similarity_without_attribution() {
        // cos([1, 0], [0.65, sqrt(1 - 0.65^2)]) == 0.65
        let below = vec![0.65, (1.0_f32 - 0.65 * 0.65).sqrt()];
        let embedder = Arc::new(FakeEmbedder::new(&[
            ("Unverified claim here.", vec![1.0, 0.0]),
            ("loosely related chunk", below),
        ]));
        let attributor = SentenceAttributor::new(embedder, 0.70);

        let chunks = vec![chunk("c1", "loosely related chunk")];
        let result = attributor
            .attribute("Unverified claim here.", &chunks)
            .await
            .unwrap();

        assert!(!result[0].has_attribution);
        assert!(result[0].attributed_chunks.is_empty());
        // Best similarity is still reported for diagnostics
        assert!((result[0].attribution_confidence - 0.65).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_no_chunks_means_unattributed() {
        let embedder = Arc::new(FakeEmbedder::new(&[]));
        let attributor = SentenceAttributor::new(embedder, 0.70);

        let result = attributor.attribute("A claim.", &[]).await.unwrap();

        assert_eq!(result.len(), 1);
        assert!(!result[0].has_attribution);
        assert_eq!(result[0].attribution_confidence, 0.0);
    }

    #[tokio::test]
    async fn test_provider_outage_is_an_error() {
        let attributor = SentenceAttributor::new(Arc::new(FailingEmbedder), 0.70);
        let chunks = vec![chunk("c1", "content")];

        let result = attributor.attribute("A claim.", &chunks).await;
        assert!(result.is_err());

        // The degraded path still yields every sentence, unattributed.
        let fallback = attributor.unattributed("A claim. Another claim.");
        assert_eq!(fallback.len(), 2);
        assert!(fallback.iter().all(|s| !s.has_attribution));
    }

    #[tokio::test]
    async fn test_duplicate_chunk_ids_embed_once() {
        let embedder = Arc::new(FakeEmbedder::new(&[
            ("Sentence.", vec![1.0, 0.0]),
            ("shared content", vec![1.0, 0.0]),
        ]));
        let attributor = SentenceAttributor::new(embedder, 0.70);

        // Same chunk appearing twice in the evidence list
        let chunks = vec![chunk("c1", "shared content"), chunk("c1", "shared content")];
        let result = attributor.attribute("Sentence.", &chunks).await.unwrap();

        assert!(result[0].has_attribution);
        // Both list entries resolve against the single memoized embedding
        assert_eq!(result[0].attributed_chunks.len(), 2);
    }
}
