use std::{cmp::Ordering, sync::Arc};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::firm_narrative::FirmNarrative,
        types::firm_profile::FirmProfile,
    },
};
use tracing::instrument;

use crate::{
    locations::LocationVariants,
    merge::{constraint_allows, rank_key},
    scoring::distance_to_similarity,
    types::{Constraint, NarrativeMatch, QueryIntent, RankDirection, FILTER_AUM, FILTER_STATE},
};

/// Seam over vector search so the cascade can run against in-memory fakes.
#[async_trait]
pub trait NarrativeStore: Send + Sync {
    /// Returns matches at or above `threshold`, sorted by similarity
    /// descending. An empty list is a valid answer, not an error.
    async fn search_by_vector(
        &self,
        vector: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<NarrativeMatch>, AppError>;
}

/// Seam over the structured profile table.
#[async_trait]
pub trait AttributeStore: Send + Sync {
    /// Batch lookup of profiles by CRD number; missing ids are skipped.
    async fn fetch_batch(&self, crd_numbers: Vec<String>) -> Result<Vec<FirmProfile>, AppError>;

    /// Attribute-only query used by the structured fallback: applies the
    /// intent's filters, orders by the rank attribute when present (else by
    /// CRD number) and truncates to `limit`.
    async fn query_filtered(
        &self,
        intent: &QueryIntent,
        limit: usize,
    ) -> Result<Vec<FirmProfile>, AppError>;
}

pub struct SurrealNarrativeStore {
    db: Arc<SurrealDbClient>,
}

impl SurrealNarrativeStore {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NarrativeStore for SurrealNarrativeStore {
    #[instrument(skip(self, vector), fields(dimension = vector.len()))]
    async fn search_by_vector(
        &self,
        vector: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<NarrativeMatch>, AppError> {
        if limit == 0 {
            return Err(AppError::InvalidInput("search limit must be positive".into()));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AppError::InvalidInput(format!(
                "similarity threshold {threshold} outside [0, 1]"
            )));
        }

        let rows = FirmNarrative::vector_search(limit, vector.to_vec(), &self.db).await?;

        let mut matches: Vec<NarrativeMatch> = rows
            .into_iter()
            .map(|row| NarrativeMatch {
                crd_number: row.crd_number,
                narrative_id: row.id,
                narrative: row.narrative,
                score: distance_to_similarity(row.distance),
            })
            .filter(|m| m.score >= threshold)
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.narrative_id.cmp(&b.narrative_id))
        });

        Ok(matches)
    }
}

pub struct SurrealAttributeStore {
    db: Arc<SurrealDbClient>,
    variants: LocationVariants,
}

impl SurrealAttributeStore {
    pub fn new(db: Arc<SurrealDbClient>, variants: LocationVariants) -> Self {
        Self { db, variants }
    }
}

#[async_trait]
impl AttributeStore for SurrealAttributeStore {
    async fn fetch_batch(&self, crd_numbers: Vec<String>) -> Result<Vec<FirmProfile>, AppError> {
        FirmProfile::fetch_batch(crd_numbers, &self.db).await
    }

    #[instrument(skip(self, intent), fields(filters = intent.filters.len()))]
    async fn query_filtered(
        &self,
        intent: &QueryIntent,
        limit: usize,
    ) -> Result<Vec<FirmProfile>, AppError> {
        // State equality and AUM ranges narrow the scan in the database; the
        // spelling-sensitive city filter is applied in Rust afterwards.
        let mut conditions: Vec<String> = Vec::new();
        let mut query = String::from("SELECT * FROM firm_profile");

        if matches!(intent.filters.get(FILTER_STATE), Some(Constraint::Equals { .. })) {
            conditions.push("string::uppercase(state) = $state".to_string());
        }
        if let Some(Constraint::Range { min, max }) = intent.filters.get(FILTER_AUM) {
            if min.is_some() {
                conditions.push("aum != NONE AND aum >= $min_aum".to_string());
            }
            if max.is_some() {
                conditions.push("aum != NONE AND aum <= $max_aum".to_string());
            }
        }

        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }

        let mut db_query = self.db.query(query);
        if let Some(Constraint::Equals { value }) = intent.filters.get(FILTER_STATE) {
            db_query = db_query.bind(("state", value.trim().to_ascii_uppercase()));
        }
        if let Some(Constraint::Range { min, max }) = intent.filters.get(FILTER_AUM) {
            if let Some(min) = *min {
                db_query = db_query.bind(("min_aum", min));
            }
            if let Some(max) = *max {
                db_query = db_query.bind(("max_aum", max));
            }
        }

        let rows: Vec<FirmProfile> = db_query.await?.take(0)?;

        let mut profiles: Vec<FirmProfile> = rows
            .into_iter()
            .filter(|profile| {
                intent
                    .filters
                    .iter()
                    .all(|(key, constraint)| constraint_allows(profile, key, constraint, &self.variants))
            })
            .collect();

        order_structured(&mut profiles, intent);
        profiles.truncate(limit);
        Ok(profiles)
    }
}

/// Deterministic ordering for the structured path: rank attribute when the
/// intent names one (nulls last), CRD number otherwise.
pub fn order_structured(profiles: &mut [FirmProfile], intent: &QueryIntent) {
    if let Some(attribute) = intent.rank_attribute.as_deref() {
        let direction = intent.rank_direction;
        profiles.sort_by(|a, b| {
            compare_structured(rank_key(a, attribute), rank_key(b, attribute), direction)
                .then_with(|| a.id.cmp(&b.id))
        });
    } else {
        profiles.sort_by(|a, b| a.id.cmp(&b.id));
    }
}

fn compare_structured(a: Option<f64>, b: Option<f64>, direction: RankDirection) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
            match direction {
                RankDirection::Descending => ord.reverse(),
                RankDirection::Ascending => ord,
            }
        }
    }
}
