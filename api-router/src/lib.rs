use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use routes::{liveness::live, readiness::ready, search::search};

pub mod api_state;
pub mod error;
mod routes;

use api_state::ApiState;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(_app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Probe endpoints (for k8s/systemd probes)
    let probes = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let search_routes = Router::new().route("/search", post(search));

    probes.merge(search_routes)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use common::{
        storage::db::SurrealDbClient,
        storage::types::{firm_narrative::FirmNarrative, firm_profile::FirmProfile},
        utils::{config::AppConfig, embedding::EmbeddingProvider},
    };
    use http_body_util::BodyExt;
    use retrieval_engine::{
        AllowAllGate, CascadeController, EmbeddingClient, EngineTuning, LocationVariants,
        QueryDecomposer, RetrievalEngine, SurrealAttributeStore, SurrealNarrativeStore,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;

    const TEST_DIMENSION: usize = 8;

    fn test_config() -> AppConfig {
        AppConfig {
            openai_api_key: "test".into(),
            surrealdb_address: "memory".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: "test_ns".into(),
            surrealdb_database: "test_db".into(),
            http_port: 0,
            openai_base_url: "http://localhost".into(),
            embedding_backend: "hashed".into(),
            embedding_model: "text-embedding-3-small".into(),
            embedding_dimensions: TEST_DIMENSION as u32,
            decomposition_model: "gpt-4o-mini".into(),
        }
    }

    async fn setup_state() -> ApiState {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory(namespace, database)
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.query(format!(
            "DEFINE INDEX idx_embedding_narratives ON TABLE firm_narrative \
             FIELDS embedding HNSW DIMENSION {TEST_DIMENSION}"
        ))
        .await
        .expect("define index");

        let provider = EmbeddingProvider::new_hashed(TEST_DIMENSION);
        db.store_item(FirmProfile::new(
            "100001".into(),
            "Gateway Capital".into(),
            "ST LOUIS".into(),
            "MO".into(),
            Some(5e9),
            None,
            None,
        ))
        .await
        .expect("store profile");
        let narrative = "Gateway Capital manages fixed income portfolios";
        let embedding = provider.embed(narrative).await.expect("embed");
        db.store_item(FirmNarrative::new(
            "100001".into(),
            narrative.into(),
            Some(embedding),
        ))
        .await
        .expect("store narrative");

        let tuning = EngineTuning::default();
        let variants = LocationVariants::default();
        let embedder = Arc::new(EmbeddingClient::new(
            EmbeddingProvider::new_hashed(TEST_DIMENSION),
            TEST_DIMENSION,
            &tuning,
        ));
        let cascade = CascadeController::new(
            embedder,
            Arc::new(SurrealNarrativeStore::new(db.clone())),
            Arc::new(SurrealAttributeStore::new(db.clone(), variants.clone())),
            variants.clone(),
            tuning.clone(),
        );
        let engine = RetrievalEngine::new(
            QueryDecomposer::heuristic_only(tuning.clone(), variants),
            cascade,
            Arc::new(AllowAllGate),
            None,
            tuning,
        );

        ApiState::new(Arc::new(engine), db, test_config())
    }

    fn app(state: ApiState) -> Router {
        Router::new()
            .merge(api_routes_v1::<ApiState>(&state))
            .with_state(state)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn search_request(body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/search")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn live_probe_answers_ok() {
        let app = app(setup_state().await);
        let response = app
            .oneshot(Request::builder().uri("/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_probe_answers_ok_with_live_db() {
        let app = app(setup_state().await);
        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn search_returns_results_and_stage() {
        let app = app(setup_state().await);
        let response = app
            .oneshot(search_request(
                json!({ "query": "fixed income portfolios", "request_id": "req-1" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["degraded"], json!(false));
        assert_eq!(body["stage"], json!("semantic"));
        assert_eq!(body["results"][0]["crd_number"], json!("100001"));
        assert_eq!(body["results"][0]["firm_name"], json!("Gateway Capital"));
    }

    #[tokio::test]
    async fn empty_query_is_bad_request() {
        let app = app(setup_state().await);
        let response = app
            .oneshot(search_request(json!({ "query": "   " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn request_id_is_optional() {
        let app = app(setup_state().await);
        let response = app
            .oneshot(search_request(json!({ "query": "fixed income" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
