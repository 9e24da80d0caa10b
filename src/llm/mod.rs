pub mod client;
pub mod provider;
pub mod retry;
pub mod types;

use std::sync::Arc;

pub use client::OpenAiCompatClient;
pub use provider::{DisabledProvider, EmbeddingProvider, Synthesizer};
pub use retry::RetryPolicy;
pub use types::{ChatMessage, CompletionRequest};

use crate::core::config::Settings;
use crate::core::errors::ApiError;

/// Embedding and synthesis backends selected from configuration.
#[derive(Clone)]
pub struct Providers {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl Providers {
    pub fn from_settings(settings: &Settings) -> Result<Self, ApiError> {
        match settings.llm.base_url.as_deref() {
            Some(base_url) => {
                let client = Arc::new(OpenAiCompatClient::new(
                    base_url,
                    &settings.llm,
                    &settings.retry,
                )?);
                tracing::info!(
                    "LLM endpoint {} (chat: {}, embeddings: {})",
                    base_url,
                    settings.llm.chat_model,
                    settings.llm.embedding_model
                );
                Ok(Self {
                    embedder: client.clone(),
                    synthesizer: client,
                })
            }
            None => {
                tracing::warn!("No llm.base_url configured; using keyword retrieval only");
                Ok(Self::disabled())
            }
        }
    }

    pub fn disabled() -> Self {
        let disabled = Arc::new(DisabledProvider);
        Self {
            embedder: disabled.clone(),
            synthesizer: disabled,
        }
    }
}
