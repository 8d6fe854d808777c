//! Signal entity - discrete structured facts extracted at ingestion
//!
//! Signals are append-only: multiple rows may exist per
//! (subject_id, fact_type, period), one per analyst/document observation.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Fact type enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactType {
    Rating,
    Metric,
    PriceTarget,
}

impl FactType {
    /// Parse a fact type from its wire string, rejecting unknown values
    pub fn parse(s: &str) -> Option<FactType> {
        match s {
            "rating" => Some(FactType::Rating),
            "metric" => Some(FactType::Metric),
            "price_target" => Some(FactType::PriceTarget),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FactType::Rating => "rating",
            FactType::Metric => "metric",
            FactType::PriceTarget => "price_target",
        }
    }
}

impl From<FactType> for String {
    fn from(fact_type: FactType) -> Self {
        fact_type.as_str().to_string()
    }
}

impl std::fmt::Display for FactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The composite index (subject_id, fact_type, observed_at DESC) backs
/// latest/history lookups; reads never scan the table.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "signals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub subject_id: String,

    #[sea_orm(column_type = "Text")]
    pub fact_type: String,

    #[sea_orm(column_type = "Text")]
    pub value: String,

    /// Reporting period ("Q2 2024", "FY 2024"); None for point-in-time facts
    #[sea_orm(column_type = "Text", nullable)]
    pub period: Option<String>,

    /// Source reliability in [0, 1]
    pub confidence: f32,

    /// When the fact was observed in the source document
    pub observed_at: DateTimeWithTimeZone,

    /// Document the signal was extracted from
    pub source_document_id: Uuid,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Get the fact type as an enum
    pub fn fact_type(&self) -> Option<FactType> {
        FactType::parse(&self.fact_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_type_round_trip() {
        for ft in [FactType::Rating, FactType::Metric, FactType::PriceTarget] {
            assert_eq!(FactType::parse(ft.as_str()), Some(ft));
        }
    }

    #[test]
    fn test_fact_type_rejects_unknown() {
        assert_eq!(FactType::parse("sentiment"), None);
        assert_eq!(FactType::parse(""), None);
    }
}
