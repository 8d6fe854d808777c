//! Query Router - classifies queries between the structured and semantic paths
//!
//! Provides:
//! - Query type classification (structured / semantic / hybrid)
//! - Subject, fact-type, and period extraction
//! - Graceful fallback: anything unclassifiable routes to the semantic path
//!
//! The router is a pure function over (query text, store availability): no
//! I/O, no shared state, safe to call from any number of query tasks.

use crate::db::models::FactType;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// Query type classification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Answerable from the signal store alone (fast path)
    Structured,
    /// Requires the retrieval engine
    Semantic,
    /// Both paths, merged
    Hybrid,
    /// Unclassifiable; callers treat this as Semantic
    Unknown,
}

/// Classification result with extracted query parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryClassification {
    pub query_type: QueryType,

    /// Confidence in the classification (0.0 - 1.0)
    pub confidence: f32,

    /// Subject identifier in the query's original casing
    pub subject: Option<String>,

    pub fact_type: Option<FactType>,

    /// Period expression ("Q2 2024", "FY 2024") in original casing
    pub period: Option<String>,
}

/// Features detected in a normalized query, evaluated by the rule table
#[derive(Debug, Clone)]
struct QueryFeatures {
    has_reasoning: bool,
    has_interrogative: bool,
    subject: Option<String>,
    fact_type: Option<FactType>,
    period: Option<String>,
    store_available: bool,
}

/// One routing rule: first predicate to match wins
struct RouteRule {
    query_type: QueryType,
    confidence: f32,
    applies: fn(&QueryFeatures) -> bool,
}

fn rule_hybrid(f: &QueryFeatures) -> bool {
    f.fact_type.is_some() && f.subject.is_some() && f.has_reasoning
}

fn rule_semantic(f: &QueryFeatures) -> bool {
    f.has_reasoning
}

fn rule_structured(f: &QueryFeatures) -> bool {
    f.store_available && f.has_interrogative && f.subject.is_some() && f.fact_type.is_some()
}

fn rule_unknown(_f: &QueryFeatures) -> bool {
    true
}

/// Ordered rule table; evaluated top to bottom
static ROUTE_RULES: &[RouteRule] = &[
    RouteRule { query_type: QueryType::Hybrid, confidence: 0.85, applies: rule_hybrid },
    RouteRule { query_type: QueryType::Semantic, confidence: 0.90, applies: rule_semantic },
    RouteRule { query_type: QueryType::Structured, confidence: 0.90, applies: rule_structured },
    RouteRule { query_type: QueryType::Unknown, confidence: 0.0, applies: rule_unknown },
];

/// Fact-type keywords, matched on word boundaries against the normalized
/// query. Literals MUST be lowercase: matching runs on lowercased text and a
/// same-case mismatch would silently disable the rule (guarded by a test).
const FACT_KEYWORDS: &[(&str, FactType)] = &[
    ("price target", FactType::PriceTarget),
    ("target price", FactType::PriceTarget),
    ("rating", FactType::Rating),
    ("margin", FactType::Metric),
    ("revenue", FactType::Metric),
    ("earnings", FactType::Metric),
    ("growth", FactType::Metric),
    ("eps", FactType::Metric),
];

/// Reasoning markers that indicate the semantic path (lowercase)
const REASONING_PATTERNS: &[&str] = &[
    "why",
    "how does",
    "how do",
    "how did",
    "explain",
    "impact",
    "implication",
    "driver",
    "because",
];

/// Uppercase tokens that look like tickers but never are
const SUBJECT_STOPLIST: &[&str] = &[
    "BUY", "SELL", "HOLD", "EPS", "USD", "GAAP", "CEO", "CFO", "FY", "YOY", "THE", "AND",
];

/// Lowercase possessive owners that are grammar, not subjects
const POSSESSIVE_STOPLIST: &[&str] = &["what", "it", "that", "who", "there", "here", "today"];

/// Query router for dispatching between retrieval paths
pub struct QueryRouter {
    fact_patterns: Vec<(Regex, FactType)>,
    reasoning_patterns: Vec<Regex>,
    interrogative: Regex,
    ticker: Regex,
    possessive: Regex,
    period: Regex,
}

impl QueryRouter {
    pub fn new() -> Self {
        let fact_patterns = FACT_KEYWORDS
            .iter()
            .map(|(kw, ft)| {
                let re = Regex::new(&format!(r"\b{}\b", kw)).expect("fact keyword regex is valid");
                (re, *ft)
            })
            .collect();

        let reasoning_patterns = REASONING_PATTERNS
            .iter()
            .map(|p| Regex::new(&format!(r"\b{}\b", p)).expect("reasoning regex is valid"))
            .collect();

        Self {
            fact_patterns,
            reasoning_patterns,
            interrogative: Regex::new(
                r"(?:^(?:what|which|when|who|show|list|give|tell)\b|\bhow (?:much|many)\b)",
            )
            .expect("interrogative regex is valid"),
            ticker: Regex::new(r"\b[A-Z]{2,6}\b").expect("ticker regex is valid"),
            possessive: Regex::new(r"\b([A-Za-z][A-Za-z0-9.&-]*)'s\b")
                .expect("possessive regex is valid"),
            period: Regex::new(r"(?i)\b(?:q[1-4]\s*(?:fy)?\s*'?\d{4}|fy\s*'?\d{2,4})\b")
                .expect("period regex is valid"),
        }
    }

    /// Classify a query. Total: never panics, never fails; the worst case is
    /// `Unknown` with confidence 0, which callers route down the semantic path.
    pub fn classify(&self, query: &str, structured_store_available: bool) -> QueryClassification {
        let original = query.trim();
        let normalized = original.to_lowercase();

        let features = QueryFeatures {
            has_reasoning: self
                .reasoning_patterns
                .iter()
                .any(|re| re.is_match(&normalized)),
            has_interrogative: self.interrogative.is_match(&normalized)
                || normalized.ends_with('?'),
            subject: self.extract_subject(original),
            fact_type: self.extract_fact_type(&normalized),
            period: self.extract_period(original),
            store_available: structured_store_available,
        };

        let rule = ROUTE_RULES
            .iter()
            .find(|r| (r.applies)(&features))
            .unwrap_or(&ROUTE_RULES[ROUTE_RULES.len() - 1]);

        QueryClassification {
            query_type: rule.query_type,
            confidence: rule.confidence,
            subject: features.subject,
            fact_type: features.fact_type,
            period: features.period,
        }
    }

    /// Extract the subject identifier, preserving the original casing.
    ///
    /// Ticker-style tokens win; possessive nouns ("Tesla's rating") are the
    /// fallback for prose subjects.
    fn extract_subject(&self, original: &str) -> Option<String> {
        for m in self.ticker.find_iter(original) {
            if !SUBJECT_STOPLIST.contains(&m.as_str()) {
                return Some(m.as_str().to_string());
            }
        }

        for cap in self.possessive.captures_iter(original) {
            if let Some(owner) = cap.get(1) {
                if !POSSESSIVE_STOPLIST.contains(&owner.as_str().to_lowercase().as_str()) {
                    return Some(owner.as_str().to_string());
                }
            }
        }

        None
    }

    /// First fact-type keyword found in the normalized query
    fn extract_fact_type(&self, normalized: &str) -> Option<FactType> {
        self.fact_patterns
            .iter()
            .find(|(re, _)| re.is_match(normalized))
            .map(|(_, ft)| *ft)
    }

    /// Quarter / fiscal-year expression, original casing
    fn extract_period(&self, original: &str) -> Option<String> {
        self.period.find(original).map(|m| m.as_str().to_string())
    }
}

impl Default for QueryRouter {
    fn default() -> Self {
        Self::new()
    }
}
