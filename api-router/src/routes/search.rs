use axum::{extract::State, response::IntoResponse, Json};
use retrieval_engine::{ProvenanceStage, RetrievalResponse};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Optional caller-supplied id; repeating it makes crediting idempotent.
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResultRow {
    pub crd_number: String,
    pub firm_name: String,
    pub city: String,
    pub state: String,
    pub aum: Option<f64>,
    pub similarity: f32,
    pub stage: ProvenanceStage,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultRow>,
    pub confidence: f32,
    pub stage: ProvenanceStage,
    pub degraded: bool,
}

impl From<RetrievalResponse> for SearchResponse {
    fn from(response: RetrievalResponse) -> Self {
        Self {
            degraded: response.stage.is_degraded(),
            confidence: response.confidence,
            stage: response.stage,
            results: response
                .results
                .into_iter()
                .map(|r| SearchResultRow {
                    crd_number: r.profile.id,
                    firm_name: r.profile.firm_name,
                    city: r.profile.city,
                    state: r.profile.state,
                    aum: r.profile.aum,
                    similarity: r.similarity,
                    stage: r.stage,
                })
                .collect(),
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn search(
    State(state): State<ApiState>,
    Json(payload): Json<SearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = payload
        .request_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let response = state.engine.retrieve(&payload.query, &request_id).await?;

    Ok(Json(SearchResponse::from(response)))
}
