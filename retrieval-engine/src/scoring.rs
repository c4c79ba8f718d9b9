use std::cmp::Ordering;

use crate::{
    config::EngineTuning,
    types::{ProvenanceStage, RankedResult},
};

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Maps a KNN distance into a [0, 1] similarity.
pub fn distance_to_similarity(distance: f32) -> f32 {
    if !distance.is_finite() {
        return 0.0;
    }
    clamp_unit(1.0 / (1.0 + distance.max(0.0)))
}

/// Confidence for a finished response. Semantic responses report the mean of
/// the top-3 similarities; attribute-ranked and structured responses report a
/// fixed low constant since no similarity evidence backs the ordering.
pub fn confidence(results: &[RankedResult], stage: ProvenanceStage, tuning: &EngineTuning) -> f32 {
    if results.is_empty() {
        return 0.0;
    }

    match stage {
        ProvenanceStage::Semantic => {
            let mut similarities: Vec<f32> = results.iter().map(|r| r.similarity).collect();
            similarities.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
            let top = &similarities[..similarities.len().min(3)];
            clamp_unit(top.iter().sum::<f32>() / top.len() as f32)
        }
        ProvenanceStage::AttributeRanked | ProvenanceStage::StructuredFallback => {
            tuning.structured_confidence.clamp(0.0, 0.2)
        }
        ProvenanceStage::ExhaustedFallback => 0.0,
    }
}
