use std::{sync::Arc, time::Duration};

use common::error::AppError;
use tracing::{info, instrument, warn};

use crate::{
    config::EngineTuning,
    embedder::Embedder,
    locations::LocationVariants,
    merge::merge_and_filter,
    store::{AttributeStore, NarrativeStore},
    types::{ProvenanceStage, QueryIntent, QueryShape, RankedResult},
};

/// Stages the cascade walks through, in order. There is no path back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CascadeState {
    Semantic,
    Structured,
    Exhausted,
}

/// Why a stage gave up and handed the request to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradeReason {
    ProviderTimeout,
    ProviderUnavailable,
    ProviderRejected,
    EmptyResultSet,
    BudgetExceeded,
    StoreError,
}

impl DegradeReason {
    pub const fn label(self) -> &'static str {
        match self {
            Self::ProviderTimeout => "provider_timeout",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::ProviderRejected => "provider_rejected",
            Self::EmptyResultSet => "empty_result_set",
            Self::BudgetExceeded => "budget_exceeded",
            Self::StoreError => "store_error",
        }
    }
}

fn reason_for(error: &AppError) -> DegradeReason {
    match error {
        AppError::ProviderTimeout(_) => DegradeReason::ProviderTimeout,
        AppError::ProviderRejected(_) => DegradeReason::ProviderRejected,
        AppError::ProviderUnavailable(_) => DegradeReason::ProviderUnavailable,
        AppError::Database(_) | AppError::StoreUnavailable(_) => DegradeReason::StoreError,
        _ => DegradeReason::ProviderUnavailable,
    }
}

/// Runs a decomposed query through semantic retrieval, degrading to the
/// structured path and finally to an empty exhausted response. Never returns
/// an error: total infrastructure failure is an `ExhaustedFallback` answer.
pub struct CascadeController {
    embedder: Arc<dyn Embedder>,
    narratives: Arc<dyn NarrativeStore>,
    attributes: Arc<dyn AttributeStore>,
    variants: LocationVariants,
    tuning: EngineTuning,
}

impl CascadeController {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        narratives: Arc<dyn NarrativeStore>,
        attributes: Arc<dyn AttributeStore>,
        variants: LocationVariants,
        tuning: EngineTuning,
    ) -> Self {
        Self {
            embedder,
            narratives,
            attributes,
            variants,
            tuning,
        }
    }

    #[instrument(skip(self, intent), fields(shape = ?intent.shape))]
    pub async fn run(&self, intent: &QueryIntent) -> (Vec<RankedResult>, ProvenanceStage) {
        let mut state = CascadeState::Semantic;
        loop {
            match state {
                CascadeState::Semantic => match self.semantic_stage(intent).await {
                    Ok(results) if !results.is_empty() => {
                        let stage = match intent.shape {
                            QueryShape::Similarity => ProvenanceStage::Semantic,
                            QueryShape::RankedByAttribute => ProvenanceStage::AttributeRanked,
                        };
                        info!(stage = stage.label(), results = results.len(), "semantic stage succeeded");
                        return (results, stage);
                    }
                    Ok(_) => {
                        state = self.degrade(CascadeState::Semantic, DegradeReason::EmptyResultSet);
                    }
                    Err(reason) => {
                        state = self.degrade(CascadeState::Semantic, reason);
                    }
                },
                CascadeState::Structured => match self.structured_stage(intent).await {
                    // An empty structured result is still a valid answer,
                    // distinguishable from exhaustion.
                    Ok(results) => {
                        info!(
                            stage = ProvenanceStage::StructuredFallback.label(),
                            results = results.len(),
                            "structured stage answered"
                        );
                        return (results, ProvenanceStage::StructuredFallback);
                    }
                    Err(reason) => {
                        state = self.degrade(CascadeState::Structured, reason);
                    }
                },
                CascadeState::Exhausted => {
                    return (Vec::new(), ProvenanceStage::ExhaustedFallback);
                }
            }
        }
    }

    /// Semantic retrieval under its wall-clock budget. Dropping the timed-out
    /// future cancels any in-flight embed or search call.
    async fn semantic_stage(
        &self,
        intent: &QueryIntent,
    ) -> Result<Vec<RankedResult>, DegradeReason> {
        let budget = Duration::from_millis(self.tuning.semantic_budget_ms);
        match tokio::time::timeout(budget, self.semantic_inner(intent)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(DegradeReason::BudgetExceeded),
        }
    }

    async fn semantic_inner(
        &self,
        intent: &QueryIntent,
    ) -> Result<Vec<RankedResult>, DegradeReason> {
        let vector = self
            .embedder
            .embed(&intent.semantic_query)
            .await
            .map_err(|e| reason_for(&e))?;

        let matches = self
            .narratives
            .search_by_vector(&vector, self.tuning.score_threshold, self.tuning.candidate_take())
            .await
            .map_err(|e| reason_for(&e))?;

        merge_and_filter(
            self.attributes.as_ref(),
            matches,
            intent,
            self.tuning.result_limit,
            &self.variants,
        )
        .await
        .map_err(|e| reason_for(&e))
    }

    async fn structured_stage(
        &self,
        intent: &QueryIntent,
    ) -> Result<Vec<RankedResult>, DegradeReason> {
        let budget = Duration::from_millis(self.tuning.structured_budget_ms);
        let query = self
            .attributes
            .query_filtered(intent, self.tuning.result_limit);

        let profiles = match tokio::time::timeout(budget, query).await {
            Ok(Ok(profiles)) => profiles,
            Ok(Err(error)) => {
                warn!(%error, "structured query failed");
                return Err(DegradeReason::StoreError);
            }
            Err(_) => return Err(DegradeReason::BudgetExceeded),
        };

        Ok(profiles
            .into_iter()
            .map(|profile| RankedResult {
                profile,
                similarity: 0.0,
                stage: ProvenanceStage::StructuredFallback,
            })
            .collect())
    }

    fn degrade(&self, from: CascadeState, reason: DegradeReason) -> CascadeState {
        let next = match from {
            CascadeState::Semantic => CascadeState::Structured,
            CascadeState::Structured | CascadeState::Exhausted => CascadeState::Exhausted,
        };
        warn!(
            from = ?from,
            to = ?next,
            reason = reason.label(),
            "cascade stage degraded"
        );
        next
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering as AtomicOrdering},
        time::Instant,
    };

    use async_trait::async_trait;
    use common::storage::types::firm_profile::FirmProfile;

    use crate::types::{NarrativeMatch, RankDirection};

    use super::*;

    struct HangingEmbedder;

    #[async_trait]
    impl Embedder for HangingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, AppError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, AppError> {
            Err(AppError::ProviderUnavailable("down".into()))
        }
    }

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, AppError> {
            Ok(self.0.clone())
        }
    }

    struct StaticNarratives(Vec<NarrativeMatch>);

    #[async_trait]
    impl NarrativeStore for StaticNarratives {
        async fn search_by_vector(
            &self,
            _vector: &[f32],
            threshold: f32,
            _limit: usize,
        ) -> Result<Vec<NarrativeMatch>, AppError> {
            Ok(self.0.iter().filter(|m| m.score >= threshold).cloned().collect())
        }
    }

    struct DownNarratives;

    #[async_trait]
    impl NarrativeStore for DownNarratives {
        async fn search_by_vector(
            &self,
            _vector: &[f32],
            _threshold: f32,
            _limit: usize,
        ) -> Result<Vec<NarrativeMatch>, AppError> {
            Err(AppError::StoreUnavailable("narrative store down".into()))
        }
    }

    struct StaticAttributes {
        profiles: Vec<FirmProfile>,
        filtered_calls: AtomicUsize,
    }

    impl StaticAttributes {
        fn new(profiles: Vec<FirmProfile>) -> Self {
            Self {
                profiles,
                filtered_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AttributeStore for StaticAttributes {
        async fn fetch_batch(
            &self,
            crd_numbers: Vec<String>,
        ) -> Result<Vec<FirmProfile>, AppError> {
            Ok(self
                .profiles
                .iter()
                .filter(|p| crd_numbers.contains(&p.id))
                .cloned()
                .collect())
        }

        async fn query_filtered(
            &self,
            _intent: &QueryIntent,
            limit: usize,
        ) -> Result<Vec<FirmProfile>, AppError> {
            self.filtered_calls.fetch_add(1, AtomicOrdering::SeqCst);
            let mut profiles = self.profiles.clone();
            profiles.sort_by(|a, b| a.id.cmp(&b.id));
            profiles.truncate(limit);
            Ok(profiles)
        }
    }

    struct DownAttributes;

    #[async_trait]
    impl AttributeStore for DownAttributes {
        async fn fetch_batch(&self, _crd: Vec<String>) -> Result<Vec<FirmProfile>, AppError> {
            Err(AppError::StoreUnavailable("attribute store down".into()))
        }

        async fn query_filtered(
            &self,
            _intent: &QueryIntent,
            _limit: usize,
        ) -> Result<Vec<FirmProfile>, AppError> {
            Err(AppError::StoreUnavailable("attribute store down".into()))
        }
    }

    fn profile(crd: &str) -> FirmProfile {
        FirmProfile::new(
            crd.to_string(),
            format!("Firm {crd}"),
            "ST LOUIS".to_string(),
            "MO".to_string(),
            Some(1e9),
            None,
            None,
        )
    }

    fn similarity_intent() -> QueryIntent {
        QueryIntent {
            raw_query: "municipal bond advisers".into(),
            semantic_query: "municipal bond advisers".into(),
            filters: HashMap::new(),
            shape: QueryShape::Similarity,
            rank_attribute: None,
            rank_direction: RankDirection::Descending,
        }
    }

    fn controller(
        embedder: Arc<dyn Embedder>,
        narratives: Arc<dyn NarrativeStore>,
        attributes: Arc<dyn AttributeStore>,
        tuning: EngineTuning,
    ) -> CascadeController {
        CascadeController::new(
            embedder,
            narratives,
            attributes,
            LocationVariants::default(),
            tuning,
        )
    }

    #[tokio::test]
    async fn semantic_success_reports_semantic_stage() {
        let matches = vec![NarrativeMatch {
            crd_number: "100001".into(),
            narrative_id: "n1".into(),
            narrative: "municipal bonds".into(),
            score: 0.8,
        }];
        let cascade = controller(
            Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])),
            Arc::new(StaticNarratives(matches)),
            Arc::new(StaticAttributes::new(vec![profile("100001")])),
            EngineTuning::default(),
        );

        let (results, stage) = cascade.run(&similarity_intent()).await;
        assert_eq!(stage, ProvenanceStage::Semantic);
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn hanging_embedder_degrades_within_budget() {
        let tuning = EngineTuning {
            semantic_budget_ms: 100,
            ..EngineTuning::default()
        };
        let cascade = controller(
            Arc::new(HangingEmbedder),
            Arc::new(StaticNarratives(vec![])),
            Arc::new(StaticAttributes::new(vec![profile("100001")])),
            tuning,
        );

        let started = Instant::now();
        let (results, stage) = cascade.run(&similarity_intent()).await;
        assert!(started.elapsed() < Duration::from_millis(600));
        assert_eq!(stage, ProvenanceStage::StructuredFallback);
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn failing_embedder_never_yields_semantic_stage() {
        let cascade = controller(
            Arc::new(FailingEmbedder),
            Arc::new(StaticNarratives(vec![])),
            Arc::new(StaticAttributes::new(vec![profile("100001")])),
            EngineTuning::default(),
        );

        let (_, stage) = cascade.run(&similarity_intent()).await;
        assert_eq!(stage, ProvenanceStage::StructuredFallback);
    }

    #[tokio::test]
    async fn empty_narrative_store_is_structured_not_empty_semantic() {
        let cascade = controller(
            Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])),
            Arc::new(StaticNarratives(vec![])),
            Arc::new(StaticAttributes::new(vec![profile("100001")])),
            EngineTuning::default(),
        );

        let (results, stage) = cascade.run(&similarity_intent()).await;
        assert_eq!(stage, ProvenanceStage::StructuredFallback);
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn empty_structured_result_is_still_structured() {
        let cascade = controller(
            Arc::new(FailingEmbedder),
            Arc::new(StaticNarratives(vec![])),
            Arc::new(StaticAttributes::new(vec![])),
            EngineTuning::default(),
        );

        let (results, stage) = cascade.run(&similarity_intent()).await;
        assert!(results.is_empty());
        assert_eq!(stage, ProvenanceStage::StructuredFallback);
    }

    #[tokio::test]
    async fn both_stores_down_exhausts_without_error() {
        let cascade = controller(
            Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])),
            Arc::new(DownNarratives),
            Arc::new(DownAttributes),
            EngineTuning::default(),
        );

        let (results, stage) = cascade.run(&similarity_intent()).await;
        assert!(results.is_empty());
        assert_eq!(stage, ProvenanceStage::ExhaustedFallback);
    }
}
