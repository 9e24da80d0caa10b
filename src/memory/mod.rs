//! Conversation memory: message persistence, budget checks and the
//! summarize-then-prune maintenance pass.
//!
//! Maintenance folds everything except the newest `keep_last` messages into
//! `memory_summary` and deletes the folded rows in the same transaction. The
//! summarizer is optional: when it fails (provider down, budget exhausted)
//! the raw transcript is folded in instead, so a pass never blocks a turn.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::chat::budget::UsageBudget;
use crate::core::config::settings::MemorySettings;
use crate::core::errors::ApiError;
use crate::llm::Synthesizer;
use crate::store::conversations::MessageTotals;
use crate::store::{ConversationStore, Message, Role};

pub mod summary;

use summary::{clean_summary, fallback_summary, render_transcript, summary_request};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceOutcome {
    pub performed: bool,
    pub folded_messages: u64,
    pub retained_messages: usize,
    pub used_fallback: bool,
}

/// What a turn needs from memory when building its prompt.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    pub summary: String,
    pub recent: Vec<Message>,
}

#[derive(Clone)]
pub struct MemoryManager {
    store: ConversationStore,
    synthesizer: Arc<dyn Synthesizer>,
    budget: UsageBudget,
    settings: MemorySettings,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl MemoryManager {
    pub fn new(
        store: ConversationStore,
        synthesizer: Arc<dyn Synthesizer>,
        budget: UsageBudget,
        settings: MemorySettings,
    ) -> Self {
        Self {
            store,
            synthesizer,
            budget,
            settings,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    /// Appends without pruning; call `maintain` to enforce the ceilings.
    pub async fn append(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message, ApiError> {
        let _guard = self.lock_for(conversation_id).lock_owned().await;
        self.store.append(conversation_id, role, content).await
    }

    pub fn needs_maintenance(&self, totals: MessageTotals) -> bool {
        totals.count > self.settings.max_messages || totals.tokens > self.settings.max_tokens
    }

    /// Summarizes and prunes one conversation if it is over either ceiling.
    /// Holds that conversation's lock only; other conversations proceed.
    pub async fn maintain(&self, conversation_id: &str) -> Result<MaintenanceOutcome, ApiError> {
        let _guard = self.lock_for(conversation_id).lock_owned().await;

        let totals = self.store.totals(conversation_id).await?;
        if !self.needs_maintenance(totals) {
            return Ok(MaintenanceOutcome {
                retained_messages: totals.count,
                ..MaintenanceOutcome::default()
            });
        }

        let messages = self.store.messages(conversation_id).await?;
        let keep = self.retained_count(&messages);
        let split = messages.len() - keep;
        if split == 0 {
            return Ok(MaintenanceOutcome {
                retained_messages: messages.len(),
                ..MaintenanceOutcome::default()
            });
        }

        let folded = &messages[..split];
        let through_id = folded[split - 1].id;
        let previous = self
            .store
            .get(conversation_id)
            .await?
            .map(|state| state.memory_summary)
            .unwrap_or_default();

        let transcript = render_transcript(folded);
        let (summary, used_fallback) = match self.summarize(&previous, &transcript).await {
            Ok(summary) => (summary, false),
            Err(err) => {
                tracing::warn!(
                    "Summarizer unavailable for conversation {}, folding raw transcript: {}",
                    conversation_id,
                    err
                );
                (
                    fallback_summary(&previous, &transcript, self.settings.summary_char_budget),
                    true,
                )
            }
        };

        let deleted = self
            .store
            .fold_into_summary(conversation_id, &summary, through_id)
            .await?;
        tracing::info!(
            "Conversation {}: folded {} messages into summary, {} retained",
            conversation_id,
            deleted,
            keep
        );

        Ok(MaintenanceOutcome {
            performed: true,
            folded_messages: deleted,
            retained_messages: keep,
            used_fallback,
        })
    }

    pub async fn context(&self, conversation_id: &str) -> Result<MemoryContext, ApiError> {
        let summary = self
            .store
            .get(conversation_id)
            .await?
            .map(|state| state.memory_summary)
            .unwrap_or_default();
        let recent = self
            .store
            .recent_messages(conversation_id, self.settings.recent_messages_for_prompt)
            .await?;
        Ok(MemoryContext { summary, recent })
    }

    /// Newest messages to keep: at most `keep_last`, fewer if their tokens
    /// alone exceed `max_tokens`. Always keeps at least one.
    fn retained_count(&self, messages: &[Message]) -> usize {
        let mut keep = self.settings.keep_last.min(messages.len());
        let tail_tokens = |n: usize| -> usize {
            messages[messages.len() - n..]
                .iter()
                .map(|m| m.token_estimate.max(0) as usize)
                .sum()
        };
        while keep > 1 && tail_tokens(keep) > self.settings.max_tokens {
            keep -= 1;
        }
        keep
    }

    async fn summarize(&self, previous: &str, transcript: &str) -> Result<String, ApiError> {
        if !self.synthesizer.is_available() {
            return Err(ApiError::ProviderUnavailable(format!(
                "summarizer '{}' is not configured",
                self.synthesizer.name()
            )));
        }

        let request = summary_request(previous, transcript);
        let estimate = request.estimated_tokens();
        self.budget.ensure_available(estimate).await?;
        let raw = self.synthesizer.complete(request).await?;
        self.budget.record(estimate).await;

        let summary = clean_summary(&raw, self.settings.summary_char_budget);
        if summary.is_empty() {
            return Err(ApiError::ProviderUnavailable(
                "summarizer returned no text".to_string(),
            ));
        }
        Ok(summary)
    }

    fn lock_for(&self, conversation_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Drop locks nobody else holds so the map does not grow without bound.
        locks.retain(|id, lock| id == conversation_id || Arc::strong_count(lock) > 1);
        locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionRequest, DisabledProvider};
    use crate::store::{open_pool, UsageStore};
    use async_trait::async_trait;

    struct FixedSummarizer;

    #[async_trait]
    impl Synthesizer for FixedSummarizer {
        fn name(&self) -> &str {
            "fixed"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<String, ApiError> {
            Ok("- Goal: track Ashburn power (see https://ex.com/x)\n- Prefers MW figures".to_string())
        }
    }

    fn settings() -> MemorySettings {
        MemorySettings {
            max_messages: 20,
            keep_last: 12,
            max_tokens: 8_000,
            summary_char_budget: 4_000,
            recent_messages_for_prompt: 8,
        }
    }

    async fn manager(synthesizer: Arc<dyn Synthesizer>, daily_limit: u64) -> MemoryManager {
        let path = std::env::temp_dir().join(format!("dcnews-memory-{}.db", uuid::Uuid::new_v4()));
        let pool = open_pool(&path).await.unwrap();
        let store = ConversationStore::new(pool.clone()).await.unwrap();
        let budget = UsageBudget::new(UsageStore::new(pool).await.unwrap(), daily_limit);
        MemoryManager::new(store, synthesizer, budget, settings())
    }

    async fn fill(manager: &MemoryManager, conversation_id: &str, count: usize) {
        for i in 0..count {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            manager
                .append(conversation_id, role, &format!("message {i} about Ashburn"))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn twenty_five_messages_prune_to_keep_last_with_summary() {
        let manager = manager(Arc::new(FixedSummarizer), 0).await;
        fill(&manager, "conv-a", 25).await;

        let outcome = manager.maintain("conv-a").await.unwrap();
        assert!(outcome.performed);
        assert!(!outcome.used_fallback);
        assert_eq!(outcome.folded_messages, 13);

        let remaining = manager.store().messages("conv-a").await.unwrap();
        assert!(remaining.len() <= 12);
        assert_eq!(remaining.first().unwrap().content, "message 13 about Ashburn");

        let state = manager.store().get("conv-a").await.unwrap().unwrap();
        assert!(!state.memory_summary.is_empty());
        assert!(!state.memory_summary.contains("https://"));
    }

    #[tokio::test]
    async fn summarizer_failure_falls_back_to_transcript() {
        let manager = manager(Arc::new(DisabledProvider), 0).await;
        fill(&manager, "conv-b", 25).await;

        let outcome = manager.maintain("conv-b").await.unwrap();
        assert!(outcome.performed);
        assert!(outcome.used_fallback);

        let state = manager.store().get("conv-b").await.unwrap().unwrap();
        assert!(state.memory_summary.contains("User: message 0 about Ashburn"));
        assert!(manager.store().messages("conv-b").await.unwrap().len() <= 12);
    }

    #[tokio::test]
    async fn exhausted_budget_still_prunes() {
        let manager = manager(Arc::new(FixedSummarizer), 1).await;
        fill(&manager, "conv-c", 21).await;

        let outcome = manager.maintain("conv-c").await.unwrap();
        assert!(outcome.used_fallback);
        assert_eq!(outcome.retained_messages, 12);
    }

    #[tokio::test]
    async fn under_the_ceilings_nothing_changes() {
        let manager = manager(Arc::new(FixedSummarizer), 0).await;
        fill(&manager, "conv-d", 20).await;

        let outcome = manager.maintain("conv-d").await.unwrap();
        assert!(!outcome.performed);
        assert_eq!(manager.store().messages("conv-d").await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn oversized_messages_trigger_token_maintenance() {
        let manager = manager(Arc::new(FixedSummarizer), 0).await;
        let big = "x".repeat(12_000);
        for _ in 0..4 {
            manager.append("conv-e", Role::User, &big).await.unwrap();
        }

        let outcome = manager.maintain("conv-e").await.unwrap();
        assert!(outcome.performed);
        let totals = manager.store().totals("conv-e").await.unwrap();
        assert!(totals.tokens <= 8_000);
        assert_eq!(totals.count, 2);
    }

    #[tokio::test]
    async fn context_returns_summary_and_recent_messages() {
        let manager = manager(Arc::new(FixedSummarizer), 0).await;
        fill(&manager, "conv-f", 25).await;
        manager.maintain("conv-f").await.unwrap();

        let context = manager.context("conv-f").await.unwrap();
        assert!(context.summary.starts_with("- Goal"));
        assert_eq!(context.recent.len(), 8);
        assert_eq!(context.recent.last().unwrap().content, "message 24 about Ashburn");
    }
}
