use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("Embedding provider timed out: {0}")]
    ProviderTimeout(String),
    #[error("Embedding provider rejected request: {0}")]
    ProviderRejected(String),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Credit denied: {0}")]
    CreditDenied(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}
