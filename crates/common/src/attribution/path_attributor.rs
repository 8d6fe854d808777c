//! Graph Path Attributor - evidence and confidence for multi-hop paths
//!
//! Each hop of a reasoning path is matched against the attributed evidence
//! chunks; corroboration raises hop confidence slightly (bounded), and a
//! path is only as strong as its weakest hop.

use crate::attribution::AttributedChunk;
use crate::engine::RelationshipHop;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hop confidence when no chunk mentions both entities
const INFERRED_CONFIDENCE: f32 = 0.40;

/// Confidence added per corroborating chunk beyond the first
const REDUNDANCY_BOOST_STEP: f32 = 0.05;

/// Ceiling on the total redundancy boost
const REDUNDANCY_BOOST_CAP: f32 = 0.15;

/// One attributed edge of a reasoning path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributedHop {
    /// Position in the path (1-based)
    pub hop_number: usize,

    /// Display form of the relationship
    pub relationship: String,

    /// Chunks whose content mentions both entities
    pub supporting_chunks: Vec<AttributedChunk>,

    /// Hop confidence (0.0 - 1.0)
    pub confidence: f32,

    /// Deduplicated source types of the supporting chunks
    pub source_types: Vec<String>,

    /// Most recent supporting observation, if any carried a date
    pub observed_at: Option<DateTime<Utc>>,
}

/// An attributed reasoning path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributedPath {
    pub path_id: String,

    pub hops: Vec<AttributedHop>,

    /// min over hop confidences: one unsupported hop visibly weakens the
    /// whole chain, which an average would mask
    pub overall_confidence: f32,
}

/// Path attributor
pub struct PathAttributor {
    inferred_confidence: f32,
}

impl PathAttributor {
    pub fn new(inferred_confidence: f32) -> Self {
        Self {
            inferred_confidence,
        }
    }

    /// Attribute every path against the query's evidence chunks
    pub fn attribute_paths(
        &self,
        paths: &[Vec<RelationshipHop>],
        chunks: &[AttributedChunk],
    ) -> Vec<AttributedPath> {
        paths
            .iter()
            .enumerate()
            .map(|(i, hops)| self.attribute_path(i, hops, chunks))
            .collect()
    }

    fn attribute_path(
        &self,
        index: usize,
        hops: &[RelationshipHop],
        chunks: &[AttributedChunk],
    ) -> AttributedPath {
        let attributed_hops: Vec<AttributedHop> = hops
            .iter()
            .enumerate()
            .map(|(i, hop)| self.attribute_hop(i + 1, hop, chunks))
            .collect();

        let overall_confidence = attributed_hops
            .iter()
            .map(|h| h.confidence)
            .fold(f32::INFINITY, f32::min);
        let overall_confidence = if overall_confidence.is_finite() {
            overall_confidence
        } else {
            0.0
        };

        AttributedPath {
            path_id: format!("path-{}", index + 1),
            hops: attributed_hops,
            overall_confidence,
        }
    }

    fn attribute_hop(
        &self,
        hop_number: usize,
        hop: &RelationshipHop,
        chunks: &[AttributedChunk],
    ) -> AttributedHop {
        let entity1 = hop.entity1.to_lowercase();
        let entity2 = hop.entity2.to_lowercase();

        let supporting_chunks: Vec<AttributedChunk> = chunks
            .iter()
            .filter(|c| {
                let content = c.content.to_lowercase();
                content.contains(&entity1) && content.contains(&entity2)
            })
            .cloned()
            .collect();

        let confidence = self.hop_confidence(&supporting_chunks);

        let mut source_types: Vec<String> = supporting_chunks
            .iter()
            .map(|c| c.source_type.as_str().to_string())
            .collect();
        source_types.sort();
        source_types.dedup();

        let observed_at = supporting_chunks.iter().filter_map(|c| c.observed_at).max();

        AttributedHop {
            hop_number,
            relationship: format!("{} {} {}", hop.entity1, hop.relation, hop.entity2),
            supporting_chunks,
            confidence,
            source_types,
            observed_at,
        }
    }

    /// Confidence from supporting evidence:
    /// - none: inferred, no direct textual evidence
    /// - one: that chunk's source confidence
    /// - several: mean plus a bounded redundancy boost
    fn hop_confidence(&self, supporting: &[AttributedChunk]) -> f32 {
        match supporting.len() {
            0 => self.inferred_confidence,
            1 => supporting[0].confidence,
            n => {
                let mean =
                    supporting.iter().map(|c| c.confidence).sum::<f32>() / n as f32;
                let boost =
                    (REDUNDANCY_BOOST_STEP * (n - 1) as f32).min(REDUNDANCY_BOOST_CAP);
                (mean + boost).min(1.0)
            }
        }
    }
}

impl Default for PathAttributor {
    fn default() -> Self {
        Self::new(INFERRED_CONFIDENCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::{AttributionMethod, SourceType};
    use std::collections::HashMap;

    fn chunk(id: &str, content: &str, confidence: f32) -> AttributedChunk {
        AttributedChunk {
            chunk_id: id.to_string(),
            content: content.to_string(),
            artifact_path: format!("email:{}.eml", id),
            source_type: SourceType::Email,
            source_details: HashMap::new(),
            confidence,
            observed_at: None,
            relevance_rank: 1,
            attribution_method: AttributionMethod::DerivedPath,
        }
    }

    fn hop(e1: &str, rel: &str, e2: &str) -> RelationshipHop {
        RelationshipHop {
            entity1: e1.to_string(),
            relation: rel.to_string(),
            entity2: e2.to_string(),
        }
    }

    #[test]
    fn test_unsupported_hop_gets_inferred_confidence() {
        let attributor = PathAttributor::default();

        let paths = vec![vec![hop("NVDA", "supplies", "OpenAI")]];
        let result = attributor.attribute_paths(&paths, &[]);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].hops[0].confidence, 0.40);
        assert!(result[0].hops[0].supporting_chunks.is_empty());
    }

    #[test]
    fn test_single_supporter_inherits_chunk_confidence() {
        let attributor = PathAttributor::default();

        let chunks = vec![chunk("a", "NVDA supplies GPUs to OpenAI for training.", 0.90)];
        let paths = vec![vec![hop("NVDA", "supplies", "OpenAI")]];

        let result = attributor.attribute_paths(&paths, &chunks);
        assert_eq!(result[0].hops[0].confidence, 0.90);
        assert_eq!(result[0].hops[0].supporting_chunks.len(), 1);
    }

    #[test]
    fn test_redundancy_boost() {
        let attributor = PathAttributor::default();

        let chunks = vec![
            chunk("a", "NVDA supplies chips to OpenAI.", 0.90),
            chunk("b", "OpenAI buys compute built on NVDA silicon.", 0.80),
        ];
        let paths = vec![vec![hop("NVDA", "supplies", "OpenAI")]];

        let result = attributor.attribute_paths(&paths, &chunks);
        let confidence = result[0].hops[0].confidence;

        // mean 0.85 plus one corroboration step
        assert!((confidence - 0.90).abs() < 1e-6);
    }

    #[test]
    fn test_redundancy_boost_is_capped() {
        let attributor = PathAttributor::default();

        let chunks: Vec<AttributedChunk> = (0..6)
            .map(|i| chunk(&format!("c{}", i), "NVDA supplies OpenAI.", 0.80))
            .collect();
        let paths = vec![vec![hop("NVDA", "supplies", "OpenAI")]];

        let result = attributor.attribute_paths(&paths, &chunks);
        let confidence = result[0].hops[0].confidence;

        let mean = 0.80;
        assert!(confidence <= mean + REDUNDANCY_BOOST_CAP + 1e-6);
        assert!((confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_overall_confidence_is_weakest_link() {
        let attributor = PathAttributor::default();

        let chunks = vec![chunk("a", "NVDA supplies GPUs to OpenAI.", 0.90)];
        // Second hop has no support: inferred 0.40 bounds the path.
        let paths = vec![vec![
            hop("NVDA", "supplies", "OpenAI"),
            hop("OpenAI", "partners with", "Contoso"),
        ]];

        let result = attributor.attribute_paths(&paths, &chunks);
        let path = &result[0];

        let min = path
            .hops
            .iter()
            .map(|h| h.confidence)
            .fold(f32::INFINITY, f32::min);
        assert_eq!(path.overall_confidence, min);
        assert_eq!(path.overall_confidence, 0.40);
    }

    #[test]
    fn test_entity_matching_is_case_insensitive() {
        let attributor = PathAttributor::default();

        let chunks = vec![chunk("a", "nvda supplies gpus to openai.", 0.90)];
        let paths = vec![vec![hop("NVDA", "supplies", "OpenAI")]];

        let result = attributor.attribute_paths(&paths, &chunks);
        assert_eq!(result[0].hops[0].supporting_chunks.len(), 1);
    }

    #[test]
    fn test_empty_path_has_zero_confidence() {
        let attributor = PathAttributor::default();

        let result = attributor.attribute_paths(&[vec![]], &[]);
        assert_eq!(result[0].overall_confidence, 0.0);
    }

    #[test]
    fn test_hop_source_types_deduplicated() {
        let attributor = PathAttributor::default();

        let chunks = vec![
            chunk("a", "NVDA supplies OpenAI.", 0.90),
            chunk("b", "NVDA supplies OpenAI again.", 0.90),
        ];
        let paths = vec![vec![hop("NVDA", "supplies", "OpenAI")]];

        let result = attributor.attribute_paths(&paths, &chunks);
        assert_eq!(result[0].hops[0].source_types, vec!["email".to_string()]);
    }
}
