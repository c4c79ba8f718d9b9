pub mod cache;
pub mod cascade;
pub mod config;
pub mod credit;
pub mod decompose;
pub mod embedder;
pub mod locations;
pub mod merge;
pub mod scoring;
pub mod store;
pub mod types;

use std::sync::Arc;

use common::error::AppError;
use tracing::{instrument, warn};

pub use cache::QueryCache;
pub use cascade::CascadeController;
pub use config::EngineTuning;
pub use credit::{AllowAllGate, CreditGate, RequestOutcome, SurrealCreditGate};
pub use decompose::QueryDecomposer;
pub use embedder::{Embedder, EmbeddingClient};
pub use locations::LocationVariants;
pub use store::{AttributeStore, NarrativeStore, SurrealAttributeStore, SurrealNarrativeStore};
pub use types::{
    Constraint, NarrativeMatch, ProvenanceStage, QueryIntent, QueryShape, RankDirection,
    RankedResult, RetrievalResponse,
};

/// Entry point for adviser search. Owns the decomposer, the fallback
/// cascade, crediting and the optional response cache.
pub struct RetrievalEngine {
    decomposer: QueryDecomposer,
    cascade: CascadeController,
    credit_gate: Arc<dyn CreditGate>,
    cache: Option<QueryCache>,
    tuning: EngineTuning,
}

impl RetrievalEngine {
    pub fn new(
        decomposer: QueryDecomposer,
        cascade: CascadeController,
        credit_gate: Arc<dyn CreditGate>,
        cache: Option<QueryCache>,
        tuning: EngineTuning,
    ) -> Self {
        Self {
            decomposer,
            cascade,
            credit_gate,
            cache,
            tuning,
        }
    }

    /// Answers a query. Only invalid input and credit denial surface as
    /// errors; upstream failures degrade through the cascade and come back
    /// as a (possibly exhausted) response.
    #[instrument(skip_all, fields(request_id = %request_id))]
    pub async fn retrieve(
        &self,
        query: &str,
        request_id: &str,
    ) -> Result<RetrievalResponse, AppError> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(AppError::InvalidInput("query must not be empty".into()));
        }

        if !self.credit_gate.authorize(request_id).await? {
            return Err(AppError::CreditDenied(format!(
                "request {request_id} was not authorized"
            )));
        }

        let intent = self.decomposer.decompose(trimmed).await;

        let cache_key = self.cache.as_ref().map(|_| QueryCache::key(&intent));
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(response) = cache.get(key) {
                self.finalize(request_id, RequestOutcome::Served(response.stage))
                    .await;
                return Ok(response);
            }
        }

        let overall_budget = std::time::Duration::from_millis(self.tuning.overall_budget_ms);
        let (results, stage) = match tokio::time::timeout(overall_budget, self.cascade.run(&intent))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    budget_ms = self.tuning.overall_budget_ms,
                    "overall retrieval budget exceeded"
                );
                (Vec::new(), ProvenanceStage::ExhaustedFallback)
            }
        };
        let confidence = scoring::confidence(&results, stage, &self.tuning);
        let response = RetrievalResponse {
            results,
            confidence,
            stage,
        };

        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.insert(key, &response);
        }

        self.finalize(request_id, RequestOutcome::Served(stage)).await;
        Ok(response)
    }

    /// Records the request outcome exactly once per served request. Ledger
    /// failures are logged, never surfaced.
    async fn finalize(&self, request_id: &str, outcome: RequestOutcome) {
        if let Err(error) = self.credit_gate.finalize(request_id, outcome).await {
            warn!(%error, request_id, "failed to record request outcome");
        }
    }
}
