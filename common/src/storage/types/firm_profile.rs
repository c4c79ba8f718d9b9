use std::collections::HashMap;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(FirmProfile, "firm_profile", {
    firm_name: String,
    city: String,
    state: String,
    aum: Option<f64>,
    employee_count: Option<u32>,
    services: Option<String>
});

impl FirmProfile {
    /// The `id` is the firm's CRD number, which the registry guarantees
    /// unique. City and state are kept exactly as filed; matching against
    /// them goes through variant expansion at query time.
    pub fn new(
        crd_number: String,
        firm_name: String,
        city: String,
        state: String,
        aum: Option<f64>,
        employee_count: Option<u32>,
        services: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: crd_number,
            created_at: now,
            updated_at: now,
            firm_name,
            city,
            state,
            aum,
            employee_count,
            services,
        }
    }

    /// Batch lookup by CRD number, single round trip. The returned order is
    /// unspecified; callers re-associate by id.
    pub async fn fetch_batch(
        crd_numbers: Vec<String>,
        db: &SurrealDbClient,
    ) -> Result<Vec<FirmProfile>, AppError> {
        if crd_numbers.is_empty() {
            return Ok(Vec::new());
        }

        let thing_ids: Vec<Thing> = crd_numbers
            .iter()
            .map(|id| Thing::from((Self::table_name(), id.as_str())))
            .collect();

        let mut response = db
            .query("SELECT * FROM type::table($table) WHERE id IN $things")
            .bind(("table", Self::table_name().to_owned()))
            .bind(("things", thing_ids))
            .await?;

        let profiles: Vec<FirmProfile> = response.take(0)?;
        Ok(profiles)
    }

    /// Batch lookup returning a map keyed by CRD number.
    pub async fn fetch_batch_by_id(
        crd_numbers: Vec<String>,
        db: &SurrealDbClient,
    ) -> Result<HashMap<String, FirmProfile>, AppError> {
        let profiles = Self::fetch_batch(crd_numbers, db).await?;
        Ok(profiles
            .into_iter()
            .map(|profile| (profile.id.clone(), profile))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn setup_test_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    fn profile(crd: &str, name: &str, city: &str, aum: Option<f64>) -> FirmProfile {
        FirmProfile::new(
            crd.into(),
            name.into(),
            city.into(),
            "MO".into(),
            aum,
            None,
            None,
        )
    }

    #[tokio::test]
    async fn test_profile_creation_keeps_raw_fields() {
        let profile = FirmProfile::new(
            "104510".into(),
            "Gateway Advisers LLC".into(),
            "ST. LOUIS".into(),
            "MO".into(),
            Some(5_000_000_000.0),
            Some(42),
            Some("portfolio management".into()),
        );

        assert_eq!(profile.id, "104510");
        assert_eq!(profile.city, "ST. LOUIS");
        assert_eq!(profile.aum, Some(5_000_000_000.0));
        assert_eq!(profile.employee_count, Some(42));
    }

    #[tokio::test]
    async fn test_fetch_batch_returns_only_requested_ids() {
        let db = setup_test_db().await;

        for p in [
            profile("100001", "Firm A", "ST LOUIS", Some(5e9)),
            profile("100002", "Firm B", "ST. LOUIS", Some(12e9)),
            profile("100003", "Firm C", "Chicago", Some(50e9)),
        ] {
            db.store_item(p).await.expect("Failed to store profile");
        }

        let fetched =
            FirmProfile::fetch_batch(vec!["100001".into(), "100003".into()], &db)
                .await
                .expect("Batch fetch failed");

        assert_eq!(fetched.len(), 2);
        assert!(fetched.iter().all(|p| p.id == "100001" || p.id == "100003"));
    }

    #[tokio::test]
    async fn test_fetch_batch_empty_input_is_empty() {
        let db = setup_test_db().await;
        let fetched = FirmProfile::fetch_batch(Vec::new(), &db)
            .await
            .expect("Batch fetch failed");
        assert!(fetched.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_batch_by_id_keys_by_crd() {
        let db = setup_test_db().await;
        db.store_item(profile("100001", "Firm A", "ST LOUIS", None))
            .await
            .expect("Failed to store profile");

        let map = FirmProfile::fetch_batch_by_id(vec!["100001".into()], &db)
            .await
            .expect("Batch fetch failed");

        assert_eq!(map.len(), 1);
        assert_eq!(map.get("100001").map(|p| p.firm_name.as_str()), Some("Firm A"));
    }
}
