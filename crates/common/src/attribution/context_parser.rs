//! Context Parser - resolves evidence chunks to attributable sources
//!
//! Resolution runs through three tiers:
//! 1. Inline provenance markers embedded by the upstream tagger
//! 2. The chunk's artifact path ("source_type:details")
//! 3. A default attribution (unknown source, low confidence)
//!
//! Confidence measures the artifact's trustworthiness, not how the source
//! was detected: chunks from the same artifact carry the same confidence
//! whichever tier resolved them.

use crate::engine::EngineChunk;
use chrono::{DateTime, NaiveDate, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Source type classes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Email,
    Api,
    Filing,
    Web,
    Unknown,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Email => "email",
            SourceType::Api => "api",
            SourceType::Filing => "filing",
            SourceType::Web => "web",
            SourceType::Unknown => "unknown",
        }
    }

    fn parse(s: &str) -> Option<SourceType> {
        match s {
            "email" => Some(SourceType::Email),
            "api" => Some(SourceType::Api),
            "filing" => Some(SourceType::Filing),
            "web" => Some(SourceType::Web),
            _ => None,
        }
    }

    /// Source reliability by type class. One table shared by every tier:
    /// the same artifact must score the same however it was resolved.
    pub fn confidence(&self) -> f32 {
        match self {
            SourceType::Email => 0.90,
            SourceType::Api => 0.85,
            SourceType::Filing => 0.90,
            SourceType::Web => 0.65,
            SourceType::Unknown => 0.30,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the attribution was resolved
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttributionMethod {
    /// Tier 1: inline marker in the chunk text
    InlineMarker,
    /// Tier 2: derived from the artifact path
    DerivedPath,
    /// Tier 3: no attribution source found
    Default,
}

/// A chunk resolved to its source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributedChunk {
    pub chunk_id: String,

    pub content: String,

    pub artifact_path: String,

    pub source_type: SourceType,

    /// Identifying details (file, provider, subject, filing type, url)
    pub source_details: HashMap<String, String>,

    /// Source reliability (0.0 - 1.0)
    pub confidence: f32,

    /// When the source material was produced, if the marker carried a date
    pub observed_at: Option<DateTime<Utc>>,

    /// Position in the retrieval result list (1 = most relevant)
    pub relevance_rank: usize,

    pub attribution_method: AttributionMethod,
}

/// Intermediate resolution, collapsed into `AttributedChunk` at the boundary
enum Resolution {
    Marker {
        source_type: SourceType,
        details: HashMap<String, String>,
        observed_at: Option<DateTime<Utc>>,
    },
    Derived {
        source_type: SourceType,
        details: HashMap<String, String>,
    },
    Default,
}

/// Context parser for chunk attribution
///
/// Pure over its inputs; regexes are compiled once at construction.
pub struct ContextParser {
    api_marker: Regex,
    email_marker: Regex,
    generic_marker: Regex,
}

impl ContextParser {
    pub fn new() -> Self {
        Self {
            // API_DATA(provider, subject[, date])
            api_marker: Regex::new(
                r"(?i)\bAPI_DATA\(\s*([^,()]+?)\s*,\s*([^,()]+?)\s*(?:,\s*([^()]+?)\s*)?\)",
            )
            .expect("api marker regex is valid"),
            // EMAIL_SOURCE(file[, date])
            email_marker: Regex::new(
                r"(?i)\bEMAIL_SOURCE\(\s*([^,()]+?)\s*(?:,\s*([^()]+?)\s*)?\)",
            )
            .expect("email marker regex is valid"),
            // SOURCE(type, details[, date])
            generic_marker: Regex::new(
                r"(?i)\bSOURCE\(\s*(email|api|filing|web)\s*,\s*([^,()]+?)\s*(?:,\s*([^()]+?)\s*)?\)",
            )
            .expect("generic marker regex is valid"),
        }
    }

    /// Resolve a chunk to an attributed chunk. Infallible: resolution always
    /// terminates, worst case in the Tier-3 default.
    pub fn enrich(&self, chunk: &EngineChunk, relevance_rank: usize) -> AttributedChunk {
        let resolution = self
            .from_inline_marker(&chunk.content)
            .or_else(|| self.from_artifact_path(&chunk.artifact_path))
            .unwrap_or(Resolution::Default);

        let (source_type, source_details, observed_at, attribution_method) = match resolution {
            Resolution::Marker {
                source_type,
                details,
                observed_at,
            } => (source_type, details, observed_at, AttributionMethod::InlineMarker),
            Resolution::Derived {
                source_type,
                details,
            } => (source_type, details, None, AttributionMethod::DerivedPath),
            Resolution::Default => (
                SourceType::Unknown,
                HashMap::new(),
                None,
                AttributionMethod::Default,
            ),
        };

        AttributedChunk {
            chunk_id: chunk.id.clone(),
            content: chunk.content.clone(),
            artifact_path: chunk.artifact_path.clone(),
            source_type,
            source_details,
            confidence: source_type.confidence(),
            observed_at,
            relevance_rank,
            attribution_method,
        }
    }

    /// Tier 1: inline markers. Search priority when several could match:
    /// API-style, then email-style, then the generic form.
    fn from_inline_marker(&self, content: &str) -> Option<Resolution> {
        if let Some(cap) = self.api_marker.captures(content) {
            let mut details = HashMap::new();
            details.insert("provider".to_string(), cap[1].trim().to_string());
            details.insert("subject".to_string(), cap[2].trim().to_string());

            return Some(Resolution::Marker {
                source_type: SourceType::Api,
                details,
                observed_at: cap.get(3).and_then(|m| parse_marker_date(m.as_str())),
            });
        }

        if let Some(cap) = self.email_marker.captures(content) {
            let mut details = HashMap::new();
            details.insert("file".to_string(), cap[1].trim().to_string());

            return Some(Resolution::Marker {
                source_type: SourceType::Email,
                details,
                observed_at: cap.get(2).and_then(|m| parse_marker_date(m.as_str())),
            });
        }

        if let Some(cap) = self.generic_marker.captures(content) {
            let source_type = SourceType::parse(&cap[1].trim().to_lowercase())?;
            let mut details = HashMap::new();
            details.insert(detail_key(source_type).to_string(), cap[2].trim().to_string());

            return Some(Resolution::Marker {
                source_type,
                details,
                observed_at: cap.get(3).and_then(|m| parse_marker_date(m.as_str())),
            });
        }

        None
    }

    /// Tier 2: derive the source from the artifact path prefix
    fn from_artifact_path(&self, artifact_path: &str) -> Option<Resolution> {
        let (prefix, rest) = artifact_path.split_once(':')?;
        let source_type = SourceType::parse(&prefix.trim().to_lowercase())?;

        let mut details = HashMap::new();
        match source_type {
            SourceType::Api => {
                // api:<provider>[:<subject>]
                match rest.split_once(':') {
                    Some((provider, subject)) => {
                        details.insert("provider".to_string(), provider.to_string());
                        details.insert("subject".to_string(), subject.to_string());
                    }
                    None => {
                        details.insert("provider".to_string(), rest.to_string());
                    }
                }
            }
            _ => {
                details.insert(detail_key(source_type).to_string(), rest.to_string());
            }
        }

        Some(Resolution::Derived {
            source_type,
            details,
        })
    }
}

impl Default for ContextParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Detail map key by source type
fn detail_key(source_type: SourceType) -> &'static str {
    match source_type {
        SourceType::Email => "file",
        SourceType::Api => "provider",
        SourceType::Filing => "filing_type",
        SourceType::Web => "url",
        SourceType::Unknown => "details",
    }
}

/// Marker dates are YYYY-MM-DD or RFC 3339
fn parse_marker_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, content: &str, artifact_path: &str) -> EngineChunk {
        EngineChunk {
            id: id.to_string(),
            content: content.to_string(),
            artifact_path: artifact_path.to_string(),
        }
    }

    #[test]
    fn test_email_marker() {
        let parser = ContextParser::new();

        let attributed = parser.enrich(
            &chunk(
                "c1",
                "Analyst note EMAIL_SOURCE(ACME_Q2_Earnings.eml, 2024-07-12) upgraded to BUY.",
                "email:ACME_Q2_Earnings.eml",
            ),
            1,
        );

        assert_eq!(attributed.source_type, SourceType::Email);
        assert_eq!(attributed.confidence, 0.90);
        assert_eq!(attributed.attribution_method, AttributionMethod::InlineMarker);
        assert_eq!(
            attributed.source_details.get("file").map(String::as_str),
            Some("ACME_Q2_Earnings.eml")
        );
        assert!(attributed.observed_at.is_some());
    }

    #[test]
    fn test_api_marker() {
        let parser = ContextParser::new();

        let attributed = parser.enrich(
            &chunk(
                "c2",
                "API_DATA(factset, NVDA, 2024-06-01) gross margin at 62.1 percent.",
                "api:factset:NVDA",
            ),
            2,
        );

        assert_eq!(attributed.source_type, SourceType::Api);
        assert_eq!(attributed.confidence, 0.85);
        assert_eq!(
            attributed.source_details.get("provider").map(String::as_str),
            Some("factset")
        );
        assert_eq!(attributed.relevance_rank, 2);
    }

    #[test]
    fn test_api_marker_beats_email_marker() {
        let parser = ContextParser::new();

        // Both marker styles present: API wins by priority.
        let attributed = parser.enrich(
            &chunk(
                "c3",
                "API_DATA(refinitiv, NVDA) quoted in EMAIL_SOURCE(digest.eml)",
                "api:refinitiv:NVDA",
            ),
            1,
        );

        assert_eq!(attributed.source_type, SourceType::Api);
        assert_eq!(attributed.attribution_method, AttributionMethod::InlineMarker);
    }

    #[test]
    fn test_generic_marker_filing() {
        let parser = ContextParser::new();

        let attributed = parser.enrich(
            &chunk("c4", "Risk factors SOURCE(filing, 10-K, 2024-02-21) noted.", ""),
            1,
        );

        assert_eq!(attributed.source_type, SourceType::Filing);
        assert_eq!(attributed.confidence, 0.90);
        assert_eq!(
            attributed.source_details.get("filing_type").map(String::as_str),
            Some("10-K")
        );
    }

    #[test]
    fn test_artifact_path_fallback() {
        let parser = ContextParser::new();

        let attributed = parser.enrich(
            &chunk("c5", "No markers here.", "email:ACME_Q2_Earnings.eml"),
            1,
        );

        assert_eq!(attributed.source_type, SourceType::Email);
        assert_eq!(attributed.confidence, 0.90);
        assert_eq!(attributed.attribution_method, AttributionMethod::DerivedPath);
        assert!(attributed.observed_at.is_none());
    }

    #[test]
    fn test_default_attribution() {
        let parser = ContextParser::new();

        let attributed = parser.enrich(&chunk("c6", "No markers here.", "opaque-blob"), 3);

        assert_eq!(attributed.source_type, SourceType::Unknown);
        assert_eq!(attributed.confidence, 0.30);
        assert_eq!(attributed.attribution_method, AttributionMethod::Default);
        assert!(attributed.observed_at.is_none());
    }

    #[test]
    fn test_confidence_is_tier_independent() {
        let parser = ContextParser::new();
        let path = "email:ACME_Q2_Earnings.eml";

        // Same artifact, one chunk with the inline marker and one without:
        // detection luck must not change the confidence.
        let with_marker = parser.enrich(
            &chunk("c7", "EMAIL_SOURCE(ACME_Q2_Earnings.eml) margin up.", path),
            1,
        );
        let without_marker = parser.enrich(&chunk("c8", "margin up.", path), 2);

        assert_eq!(with_marker.confidence, without_marker.confidence);
        assert_eq!(with_marker.source_type, without_marker.source_type);
        assert_ne!(with_marker.attribution_method, without_marker.attribution_method);
    }

    #[test]
    fn test_unknown_path_prefix_falls_through_to_default() {
        let parser = ContextParser::new();

        let attributed = parser.enrich(&chunk("c9", "text", "ftp:server/file"), 1);

        assert_eq!(attributed.source_type, SourceType::Unknown);
        assert_eq!(attributed.confidence, 0.30);
    }

    #[test]
    fn test_marker_date_formats() {
        assert!(parse_marker_date("2024-07-12").is_some());
        assert!(parse_marker_date("2024-07-12T09:30:00Z").is_some());
        assert!(parse_marker_date("July 12").is_none());
    }
}
