use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::types::{Constraint, ProvenanceStage, QueryIntent, RetrievalResponse};

/// Read-through cache over the semantic path. Entries keep their original
/// stage provenance and expire after the TTL; expired entries are dropped on
/// lookup so a recovered provider is re-consulted rather than masked.
pub struct QueryCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, RetrievalResponse)>>,
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Deterministic key over the semantic query and the canonicalized
    /// filter set.
    pub fn key(intent: &QueryIntent) -> String {
        let mut filters: Vec<(&String, &Constraint)> = intent.filters.iter().collect();
        filters.sort_by(|a, b| a.0.cmp(b.0));

        let mut hasher = Sha256::new();
        hasher.update(intent.semantic_query.as_bytes());
        for (key, constraint) in filters {
            hasher.update(b"\x1f");
            hasher.update(key.as_bytes());
            hasher.update(b"\x1f");
            // Constraint serialization is stable for a given value.
            if let Ok(encoded) = serde_json::to_vec(constraint) {
                hasher.update(&encoded);
            }
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<RetrievalResponse> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some((stored_at, response)) if stored_at.elapsed() <= self.ttl => {
                debug!(stage = response.stage.label(), "query cache hit");
                Some(response.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Only semantic-derived responses are worth caching; fallback responses
    /// must re-probe the providers on every request.
    pub fn insert(&self, key: String, response: &RetrievalResponse) {
        if !matches!(
            response.stage,
            ProvenanceStage::Semantic | ProvenanceStage::AttributeRanked
        ) {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, (Instant::now(), response.clone()));
        }
    }
}
