use std::{str::FromStr, sync::Arc, time::Duration};

use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{
    storage::db::SurrealDbClient,
    utils::{
        config::get_config,
        embedding::{EmbeddingBackend, EmbeddingProvider},
    },
};
use retrieval_engine::{
    CascadeController, EmbeddingClient, EngineTuning, LocationVariants, QueryCache,
    QueryDecomposer, RetrievalEngine, SurrealAttributeStore, SurrealCreditGate,
    SurrealNarrativeStore,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;
    let tuning = EngineTuning::default();
    let variants = LocationVariants::default();

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    // Ensure tables and the vector index exist at the configured dimension.
    db.ensure_initialized(config.embedding_dimensions as usize)
        .await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider = match EmbeddingBackend::from_str(&config.embedding_backend)? {
        EmbeddingBackend::OpenAI => EmbeddingProvider::new_openai(
            openai_client.clone(),
            config.embedding_model.clone(),
            config.embedding_dimensions,
        ),
        EmbeddingBackend::Hashed => {
            EmbeddingProvider::new_hashed(config.embedding_dimensions as usize)
        }
    };
    info!(
        embedding_backend = embedding_provider.backend_label(),
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    let embedder = Arc::new(EmbeddingClient::new(
        embedding_provider,
        config.embedding_dimensions as usize,
        &tuning,
    ));

    let cascade = CascadeController::new(
        embedder,
        Arc::new(SurrealNarrativeStore::new(db.clone())),
        Arc::new(SurrealAttributeStore::new(db.clone(), variants.clone())),
        variants.clone(),
        tuning.clone(),
    );

    let decomposer = QueryDecomposer::new(
        Some(openai_client),
        config.decomposition_model.clone(),
        tuning.clone(),
        variants,
    );

    let cache = (tuning.cache_ttl_secs > 0)
        .then(|| QueryCache::new(Duration::from_secs(tuning.cache_ttl_secs)));

    let engine = Arc::new(RetrievalEngine::new(
        decomposer,
        cascade,
        Arc::new(SurrealCreditGate::new(db.clone())),
        cache,
        tuning,
    ));

    let api_state = ApiState::new(engine, db, config.clone());

    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
    }

    Ok(())
}
