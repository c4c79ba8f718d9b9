use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

stored_object!(FirmNarrative, "firm_narrative", {
    crd_number: String,
    narrative: String,
    embedding: Option<Vec<f32>>
});

/// Row shape returned by the KNN query: the narrative fields plus the raw
/// index distance. Distance-to-similarity conversion happens in the caller.
#[derive(Debug, Deserialize)]
pub struct NarrativeDistanceRow {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    pub crd_number: String,
    pub narrative: String,
    pub distance: f32,
}

impl FirmNarrative {
    pub fn new(crd_number: String, narrative: String, embedding: Option<Vec<f32>>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            crd_number,
            narrative,
            embedding,
        }
    }

    /// KNN search over the HNSW index, nearest first. Rows without an
    /// embedding are excluded; the index would not match them, but the
    /// predicate keeps that guarantee explicit.
    pub async fn vector_search(
        take: usize,
        query_embedding: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<Vec<NarrativeDistanceRow>, AppError> {
        let closest_query = format!(
            "SELECT id, crd_number, narrative, vector::distance::knn() AS distance \
             FROM {} \
             WHERE embedding != NONE AND embedding <|{},40|> {:?} \
             ORDER BY distance",
            Self::table_name(),
            take.max(1),
            query_embedding,
        );

        let rows: Vec<NarrativeDistanceRow> = db.query(closest_query).await?.take(0)?;

        Ok(rows)
    }
}
