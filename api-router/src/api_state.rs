use std::sync::Arc;

use common::{storage::db::SurrealDbClient, utils::config::AppConfig};
use retrieval_engine::RetrievalEngine;

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<RetrievalEngine>,
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
}

impl ApiState {
    pub fn new(engine: Arc<RetrievalEngine>, db: Arc<SurrealDbClient>, config: AppConfig) -> Self {
        Self { engine, db, config }
    }
}
