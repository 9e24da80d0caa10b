//! Daily ceiling on estimated LLM tokens, checked before any paid call.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use crate::core::errors::ApiError;
use crate::llm::EmbeddingProvider;
use crate::store::conversations::estimate_tokens;
use crate::store::UsageStore;

#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    pub day: String,
    pub tokens_used: u64,
    pub daily_limit: u64,
}

#[derive(Clone)]
pub struct UsageBudget {
    store: UsageStore,
    daily_limit: u64,
}

impl UsageBudget {
    /// `daily_limit == 0` disables the ceiling.
    pub fn new(store: UsageStore, daily_limit: u64) -> Self {
        Self { store, daily_limit }
    }

    /// Fails with `ResourceExhausted` when `estimated_tokens` would push
    /// today's usage past the ceiling.
    pub async fn ensure_available(&self, estimated_tokens: u64) -> Result<(), ApiError> {
        if self.daily_limit == 0 {
            return Ok(());
        }
        let used = self.store.tokens_on(Utc::now().date_naive()).await?;
        if used.saturating_add(estimated_tokens) > self.daily_limit {
            tracing::warn!(
                "Daily token budget reached: {} used + {} requested > {}",
                used,
                estimated_tokens,
                self.daily_limit
            );
            return Err(ApiError::ResourceExhausted(format!(
                "Daily usage limit reached ({} of {} estimated tokens used)",
                used, self.daily_limit
            )));
        }
        Ok(())
    }

    /// Records usage after a call. Failures are logged, never surfaced.
    pub async fn record(&self, tokens: u64) {
        if let Err(err) = self.store.record(Utc::now().date_naive(), tokens).await {
            tracing::warn!("Failed to record token usage: {}", err);
        }
    }

    pub async fn snapshot(&self) -> Result<UsageSnapshot, ApiError> {
        let day = Utc::now().date_naive();
        Ok(UsageSnapshot {
            day: day.to_string(),
            tokens_used: self.store.tokens_on(day).await?,
            daily_limit: self.daily_limit,
        })
    }
}

/// Embedding provider that charges its input against the daily budget.
#[derive(Clone)]
pub struct MeteredEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    budget: UsageBudget,
}

impl MeteredEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, budget: UsageBudget) -> Self {
        Self { inner, budget }
    }
}

#[async_trait]
impl EmbeddingProvider for MeteredEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let estimate = estimate_tokens(text) as u64;
        self.budget.ensure_available(estimate).await?;
        let vector = self.inner.embed(text).await?;
        self.budget.record(estimate).await;
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>, ApiError> {
        let estimate: u64 = texts.iter().map(|t| estimate_tokens(t) as u64).sum();
        self.budget.ensure_available(estimate).await?;
        let vectors = self.inner.embed_batch(texts).await?;
        let used: u64 = texts
            .iter()
            .zip(vectors.iter())
            .filter(|(_, vector)| vector.is_some())
            .map(|(text, _)| estimate_tokens(text) as u64)
            .sum();
        self.budget.record(used).await;
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_pool;

    struct UnitEmbedder;

    #[async_trait]
    impl EmbeddingProvider for UnitEmbedder {
        fn name(&self) -> &str {
            "unit"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ApiError> {
            Ok(vec![1.0, 0.0])
        }
    }

    async fn usage_store() -> UsageStore {
        let path = std::env::temp_dir().join(format!("dcnews-budget-{}.db", uuid::Uuid::new_v4()));
        let pool = open_pool(&path).await.unwrap();
        UsageStore::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn rejects_calls_past_the_ceiling() {
        let budget = UsageBudget::new(usage_store().await, 1_000);
        budget.ensure_available(900).await.unwrap();
        budget.record(900).await;

        let err = budget.ensure_available(200).await.unwrap_err();
        assert!(matches!(err, ApiError::ResourceExhausted(_)));
        budget.ensure_available(100).await.unwrap();
        assert_eq!(budget.snapshot().await.unwrap().tokens_used, 900);
    }

    #[tokio::test]
    async fn zero_limit_disables_the_check() {
        let budget = UsageBudget::new(usage_store().await, 0);
        budget.record(u64::MAX / 2).await;
        budget.ensure_available(1_000_000).await.unwrap();
    }

    #[tokio::test]
    async fn metered_embeddings_are_recorded() {
        let budget = UsageBudget::new(usage_store().await, 1_000);
        let embedder = MeteredEmbedder::new(Arc::new(UnitEmbedder), budget.clone());

        embedder.embed("twelve bytes").await.unwrap();
        let batch = embedder
            .embed_batch(&["abcd".to_string(), "abcdefgh".to_string()])
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(embedder.name(), "unit");
        assert_eq!(budget.snapshot().await.unwrap().tokens_used, 3 + 1 + 2);
    }

    #[tokio::test]
    async fn exhausted_budget_blocks_embeddings() {
        let budget = UsageBudget::new(usage_store().await, 10);
        budget.record(10).await;
        let embedder = MeteredEmbedder::new(Arc::new(UnitEmbedder), budget.clone());

        let err = embedder.embed("Ashburn power").await.unwrap_err();
        assert!(matches!(err, ApiError::ResourceExhausted(_)));
        let err = embedder
            .embed_batch(&["Loudoun substation".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ResourceExhausted(_)));
        assert_eq!(budget.snapshot().await.unwrap().tokens_used, 10);
    }
}
