use std::sync::Arc;

use async_trait::async_trait;
use common::{error::AppError, storage::db::SurrealDbClient};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::types::ProvenanceStage;

const LEDGER_TABLE: &str = "credit_ledger";

/// How a credited request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    Served(ProvenanceStage),
    Failed,
}

impl RequestOutcome {
    pub fn label(self) -> String {
        match self {
            Self::Served(stage) => format!("served:{}", stage.label()),
            Self::Failed => "failed".to_string(),
        }
    }
}

/// Seam for request crediting. `authorize` charges a request id at most
/// once; `finalize` records how the request ended.
#[async_trait]
pub trait CreditGate: Send + Sync {
    async fn authorize(&self, request_id: &str) -> Result<bool, AppError>;
    async fn finalize(&self, request_id: &str, outcome: RequestOutcome) -> Result<(), AppError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerEntry {
    outcome: Option<String>,
}

/// Ledger-backed gate. A repeated `authorize` for an already-charged request
/// id is accepted without a second charge, which makes retried requests
/// idempotent on billing.
pub struct SurrealCreditGate {
    db: Arc<SurrealDbClient>,
}

impl SurrealCreditGate {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CreditGate for SurrealCreditGate {
    #[instrument(skip(self))]
    async fn authorize(&self, request_id: &str) -> Result<bool, AppError> {
        let existing: Option<LedgerEntry> =
            self.db.select((LEDGER_TABLE, request_id)).await?;
        if existing.is_some() {
            return Ok(true);
        }

        let created: Result<Option<LedgerEntry>, surrealdb::Error> = self
            .db
            .create((LEDGER_TABLE, request_id))
            .content(LedgerEntry { outcome: None })
            .await;

        match created {
            Ok(_) => Ok(true),
            // Lost a race with a concurrent charge for the same id: the
            // request is already paid for.
            Err(error) if error.to_string().contains("already exists") => Ok(true),
            Err(error) => Err(AppError::Database(error)),
        }
    }

    #[instrument(skip(self))]
    async fn finalize(&self, request_id: &str, outcome: RequestOutcome) -> Result<(), AppError> {
        self.db
            .query(
                "UPDATE type::thing($table, $id) SET outcome = $outcome WHERE outcome = NONE",
            )
            .bind(("table", LEDGER_TABLE))
            .bind(("id", request_id.to_owned()))
            .bind(("outcome", outcome.label()))
            .await?;
        Ok(())
    }
}

/// Gate that grants everything and records nothing. Used when crediting is
/// disabled.
pub struct AllowAllGate;

#[async_trait]
impl CreditGate for AllowAllGate {
    async fn authorize(&self, _request_id: &str) -> Result<bool, AppError> {
        Ok(true)
    }

    async fn finalize(&self, _request_id: &str, _outcome: RequestOutcome) -> Result<(), AppError> {
        Ok(())
    }
}
