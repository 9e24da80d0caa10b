use async_trait::async_trait;

use super::types::CompletionRequest;
use crate::core::errors::ApiError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// provider name for logs (e.g. "openai-compatible", "disabled")
    fn name(&self) -> &str;

    /// false when no endpoint is configured; callers skip the semantic path
    fn is_available(&self) -> bool;

    /// embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError>;

    /// embed many texts; a failed item is `None` without failing the batch
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>, ApiError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            match self.embed(text).await {
                Ok(vector) if !vector.is_empty() => out.push(Some(vector)),
                Ok(_) => out.push(None),
                Err(err) => {
                    tracing::debug!("Embedding item failed: {}", err);
                    out.push(None);
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;

    /// chat completion (non-streaming)
    async fn complete(&self, request: CompletionRequest) -> Result<String, ApiError>;
}

/// Stand-in used when no LLM endpoint is configured.
#[derive(Debug, Clone, Default)]
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ApiError> {
        Err(ApiError::ProviderUnavailable(
            "No embedding endpoint configured".to_string(),
        ))
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Option<Vec<f32>>>, ApiError> {
        Err(ApiError::ProviderUnavailable(
            "No embedding endpoint configured".to_string(),
        ))
    }
}

#[async_trait]
impl Synthesizer for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<String, ApiError> {
        Err(ApiError::ProviderUnavailable(
            "No LLM endpoint configured".to_string(),
        ))
    }
}
