use serde::{Deserialize, Serialize};

/// Tunable parameters that govern each retrieval stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineTuning {
    /// Maximum rows returned to the caller.
    pub result_limit: usize,
    /// Vector search asks for `candidate_multiplier * result_limit` rows so
    /// filtering still leaves a full page.
    pub candidate_multiplier: usize,
    /// Similarity floor for vector matches.
    pub score_threshold: f32,
    /// Fixed confidence reported for attribute-ranked and structured
    /// responses. Clamped into [0, 0.2].
    pub structured_confidence: f32,
    /// Wall-clock budget for the whole semantic stage (embed + search +
    /// merge), in milliseconds.
    pub semantic_budget_ms: u64,
    /// Wall-clock budget for the structured stage, in milliseconds.
    pub structured_budget_ms: u64,
    /// Wall-clock budget around the whole cascade, in milliseconds. Expiry
    /// yields an exhausted response, never an error.
    pub overall_budget_ms: u64,
    /// Per-call timeout for a single embedding request, in milliseconds.
    pub embed_timeout_ms: u64,
    /// Fixed delay before the single embedding retry, in milliseconds.
    pub embed_retry_delay_ms: u64,
    /// Per-call timeout for the decomposition chat call, in milliseconds.
    pub decompose_timeout_ms: u64,
    /// Verbs that flip a query into descending attribute ranking.
    pub descending_rank_verbs: Vec<String>,
    /// Verbs that flip a query into ascending attribute ranking.
    pub ascending_rank_verbs: Vec<String>,
    /// TTL for cached semantic responses, in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            result_limit: 10,
            candidate_multiplier: 2,
            score_threshold: 0.35,
            structured_confidence: 0.15,
            semantic_budget_ms: 2_000,
            structured_budget_ms: 1_000,
            overall_budget_ms: 5_000,
            embed_timeout_ms: 800,
            embed_retry_delay_ms: 200,
            decompose_timeout_ms: 1_500,
            descending_rank_verbs: vec!["largest".into(), "biggest".into(), "top".into()],
            ascending_rank_verbs: vec!["smallest".into()],
            cache_ttl_secs: 300,
        }
    }
}

impl EngineTuning {
    pub fn candidate_take(&self) -> usize {
        (self.result_limit.max(1)) * self.candidate_multiplier.max(1)
    }
}
