use std::collections::HashMap;

use common::storage::types::firm_profile::FirmProfile;
use serde::{Deserialize, Serialize};

/// Filter keys the decomposer emits and the merge/structured paths understand.
pub const FILTER_CITY: &str = "city";
pub const FILTER_STATE: &str = "state";
pub const FILTER_AUM: &str = "aum";

/// Rank attribute names accepted by the structured path.
pub const RANK_AUM: &str = "aum";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryShape {
    Similarity,
    RankedByAttribute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RankDirection {
    #[default]
    Descending,
    Ascending,
}

/// Closed set of filter constraints. Downstream code matches exhaustively;
/// adding a variant is a breaking change on purpose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    Equals { value: String },
    Range { min: Option<f64>, max: Option<f64> },
    AnyVariant { variants: Vec<String> },
}

/// Structured interpretation of a raw query, produced by the decomposer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryIntent {
    pub raw_query: String,
    pub semantic_query: String,
    pub filters: HashMap<String, Constraint>,
    pub shape: QueryShape,
    pub rank_attribute: Option<String>,
    pub rank_direction: RankDirection,
}

/// One narrative row returned by vector search, similarity already mapped
/// into [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeMatch {
    pub crd_number: String,
    pub narrative_id: String,
    pub narrative: String,
    pub score: f32,
}

/// Which cascade stage produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceStage {
    Semantic,
    AttributeRanked,
    StructuredFallback,
    ExhaustedFallback,
}

impl ProvenanceStage {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::AttributeRanked => "attribute_ranked",
            Self::StructuredFallback => "structured_fallback",
            Self::ExhaustedFallback => "exhausted_fallback",
        }
    }

    /// Only total exhaustion counts as degraded toward callers.
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::ExhaustedFallback)
    }
}

/// Request-scoped result row. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResult {
    pub profile: FirmProfile,
    pub similarity: f32,
    pub stage: ProvenanceStage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub results: Vec<RankedResult>,
    pub confidence: f32,
    pub stage: ProvenanceStage,
}

impl RetrievalResponse {
    pub fn exhausted() -> Self {
        Self {
            results: Vec::new(),
            confidence: 0.0,
            stage: ProvenanceStage::ExhaustedFallback,
        }
    }
}
