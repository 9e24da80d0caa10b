//! OpenAI-compatible HTTP client for chat completions and embeddings.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde_json::{json, Value};

use super::provider::{EmbeddingProvider, Synthesizer};
use super::retry::{is_retryable_status, AttemptError, RetryPolicy};
use super::types::CompletionRequest;
use crate::core::config::settings::{LlmSettings, RetrySettings};
use crate::core::errors::ApiError;

#[derive(Clone)]
pub struct OpenAiCompatClient {
    base_url: String,
    api_key: Option<String>,
    chat_model: String,
    embedding_model: String,
    client: Client,
    retry: RetryPolicy,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl OpenAiCompatClient {
    pub fn new(
        base_url: &str,
        llm: &LlmSettings,
        retry: &RetrySettings,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(llm.timeout_secs))
            .connect_timeout(Duration::from_secs(llm.timeout_secs.min(10)))
            .build()
            .map_err(ApiError::internal)?;

        let per_minute = NonZeroU32::new(llm.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)));

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: llm.api_key.clone(),
            chat_model: llm.chat_model.clone(),
            embedding_model: llm.embedding_model.clone(),
            client,
            retry: RetryPolicy::from_settings(retry),
            limiter,
        })
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, AttemptError> {
        self.limiter.until_ready().await;

        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let res = request.send().await.map_err(classify_transport_error)?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            let err = ApiError::ProviderUnavailable(format!(
                "{} returned {}: {}",
                path,
                status.as_u16(),
                truncate(&text, 300)
            ));
            return Err(if is_retryable_status(status.as_u16()) {
                AttemptError::Retryable(err)
            } else {
                AttemptError::Fatal(err)
            });
        }

        res.json::<Value>()
            .await
            .map_err(|e| AttemptError::Fatal(ApiError::provider(e)))
    }

    async fn embed_inputs(&self, inputs: &[String]) -> Result<Vec<Option<Vec<f32>>>, ApiError> {
        let body = json!({
            "model": self.embedding_model,
            "input": inputs,
        });
        let body = &body;
        let payload = self
            .retry
            .run("embeddings", move || self.post_json("embeddings", body))
            .await?;

        let mut embeddings: Vec<Option<Vec<f32>>> = vec![None; inputs.len()];
        if let Some(data) = payload["data"].as_array() {
            for (position, item) in data.iter().enumerate() {
                let index = item["index"].as_u64().map(|i| i as usize).unwrap_or(position);
                let Some(values) = item["embedding"].as_array() else {
                    continue;
                };
                let vector: Vec<f32> = values
                    .iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect();
                if let Some(slot) = embeddings.get_mut(index) {
                    if !vector.is_empty() {
                        *slot = Some(vector);
                    }
                }
            }
        }
        Ok(embeddings)
    }
}

fn classify_transport_error(err: reqwest::Error) -> AttemptError {
    let retryable = err.is_timeout() || err.is_connect() || err.is_request();
    let err = ApiError::provider(err);
    if retryable {
        AttemptError::Retryable(err)
    } else {
        AttemptError::Fatal(err)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatClient {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let mut batch = self.embed_inputs(&[text.to_string()]).await?;
        batch
            .pop()
            .flatten()
            .ok_or_else(|| ApiError::ProviderUnavailable("Empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>, ApiError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_inputs(texts).await
    }
}

#[async_trait]
impl Synthesizer for OpenAiCompatClient {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ApiError> {
        let body = json!({
            "model": self.chat_model,
            "messages": request.messages(),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": false,
        });

        let body = &body;
        let payload = self
            .retry
            .run("chat completion", move || self.post_json("chat/completions", body))
            .await?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .trim()
            .to_string();

        if content.is_empty() {
            return Err(ApiError::ProviderUnavailable(
                "Empty completion response".to_string(),
            ));
        }
        Ok(content)
    }
}
