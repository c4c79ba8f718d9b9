use std::time::Duration;

use async_trait::async_trait;
use common::{error::AppError, utils::embedding::EmbeddingProvider};
use tokio_retry::{strategy::FixedInterval, Retry};
use tracing::{error, instrument, warn};

use crate::config::EngineTuning;

/// Seam for embedding providers so the cascade can be exercised against
/// failing, hanging, or deterministic implementations.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
}

/// Production embedder: per-call timeout, one retry with a fixed delay, and
/// dimensionality validation on the returned vector.
pub struct EmbeddingClient {
    provider: EmbeddingProvider,
    expected_dimension: usize,
    call_timeout: Duration,
    retry_delay: Duration,
}

impl EmbeddingClient {
    pub fn new(provider: EmbeddingProvider, expected_dimension: usize, tuning: &EngineTuning) -> Self {
        Self {
            provider,
            expected_dimension,
            call_timeout: Duration::from_millis(tuning.embed_timeout_ms),
            retry_delay: Duration::from_millis(tuning.embed_retry_delay_ms),
        }
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let call = self.provider.embed(text);
        let vector = tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| {
                AppError::ProviderTimeout(format!(
                    "embedding call exceeded {} ms",
                    self.call_timeout.as_millis()
                ))
            })?
            .map_err(classify_provider_error)?;

        if vector.len() != self.expected_dimension {
            return Err(AppError::ProviderUnavailable(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.expected_dimension,
                vector.len()
            )));
        }

        Ok(vector)
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    #[instrument(skip(self, text), fields(backend = self.provider.backend_label()))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        // One retry with a fixed delay; two attempts total.
        let retry_strategy = FixedInterval::new(self.retry_delay).take(1);

        Retry::spawn(retry_strategy, || self.embed_once(text))
            .await
            .inspect_err(|err| match err {
                AppError::ProviderRejected(reason) => {
                    error!(%reason, "embedding provider rejected the request");
                }
                other => {
                    warn!(error = %other, "embedding unavailable");
                }
            })
    }
}

/// Sorts provider failures into the rejected/unavailable taxonomy. Client
/// errors (auth, bad request) are rejections; everything else is transient
/// unavailability.
fn classify_provider_error(error: anyhow::Error) -> AppError {
    if let Some(openai_error) = error.downcast_ref::<async_openai::error::OpenAIError>() {
        if let async_openai::error::OpenAIError::ApiError(api_error) = openai_error {
            return AppError::ProviderRejected(api_error.message.clone());
        }
    }
    AppError::ProviderUnavailable(error.to_string())
}
