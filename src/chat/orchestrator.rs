//! One chat turn: memory upkeep, routing, retrieval, narrowing, theming,
//! source binding, synthesis and citation cleanup.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::budget::UsageBudget;
use super::prompt::{
    build_context, chat_user_prompt, theme_hints, ChatPromptInput, CHAT_SYSTEM_PROMPT,
    DEFAULT_AUDIENCE,
};
use super::router::{route, Route};
use crate::core::config::settings::{LlmSettings, RetrievalSettings};
use crate::core::errors::ApiError;
use crate::llm::{CompletionRequest, Synthesizer};
use crate::memory::{MemoryContext, MemoryManager};
use crate::retrieval::citations;
use crate::retrieval::cluster::cluster_candidates;
use crate::retrieval::recency::{apply_constraints, detect_requested_window};
use crate::retrieval::sources::{bind_sources, select_for_themes};
use crate::retrieval::{CandidateRetriever, RecencyPolicy, RetrievalPath, Source};

pub const NO_COVERAGE_ANSWER: &str = "I couldn't find coverage in the news corpus that matches this question. Try a broader topic, another market, or a longer time window.";
pub const SYNTHESIS_UNAVAILABLE_ANSWER: &str = "I found matching coverage but the answer service is unavailable right now. Please try again shortly.";
pub const BUDGET_EXHAUSTED_ANSWER: &str = "The daily usage limit has been reached, so no new answers can be generated today. Please try again tomorrow.";

/// Per-context character cap for one source block.
const SOURCE_CONTENT_CHARS: usize = 1_200;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatMeta {
    pub time_window_days: i64,
    pub sources_used: usize,
    pub coverage_thin: bool,
    pub widened_to_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<RetrievalPath>,
    pub themes: Vec<String>,
    pub clarification: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub conversation_id: String,
    pub meta: ChatMeta,
}

#[derive(Clone)]
pub struct Orchestrator {
    retriever: CandidateRetriever,
    memory: MemoryManager,
    synthesizer: Arc<dyn Synthesizer>,
    budget: UsageBudget,
    recency: RecencyPolicy,
    retrieval: RetrievalSettings,
    llm: LlmSettings,
}

impl Orchestrator {
    pub fn new(
        retriever: CandidateRetriever,
        memory: MemoryManager,
        synthesizer: Arc<dyn Synthesizer>,
        budget: UsageBudget,
        retrieval: RetrievalSettings,
        llm: LlmSettings,
    ) -> Self {
        Self {
            retriever,
            memory,
            synthesizer,
            budget,
            recency: RecencyPolicy::from(&retrieval),
            retrieval,
            llm,
        }
    }

    pub fn retriever(&self) -> &CandidateRetriever {
        &self.retriever
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ApiError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(ApiError::Validation("query must not be empty".to_string()));
        }
        let audience = request
            .audience
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(DEFAULT_AUDIENCE)
            .to_string();
        let conversation_id = request
            .conversation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if let Err(err) = self.memory.maintain(&conversation_id).await {
            tracing::warn!("Memory maintenance failed for {}: {}", conversation_id, err);
        }
        let memory = match self.memory.context(&conversation_id).await {
            Ok(context) => context,
            Err(err) => {
                tracing::warn!("Could not load memory for {}: {}", conversation_id, err);
                MemoryContext::default()
            }
        };

        let has_history = !memory.recent.is_empty() || !memory.summary.trim().is_empty();
        let mut meta = ChatMeta {
            time_window_days: self.recency.default_window_days,
            ..ChatMeta::default()
        };

        if let Route::Clarify(question) = route(query, has_history) {
            meta.clarification = true;
            return self
                .finish(&conversation_id, &audience, query, question, Vec::new(), meta)
                .await;
        }

        let requested_window = detect_requested_window(query);
        let retrieval = self
            .retriever
            .retrieve(query, self.retrieval.pool_size)
            .await?;
        meta.retrieval = Some(retrieval.path);

        let recency = self
            .recency
            .apply(&retrieval.candidates, requested_window, Utc::now());
        meta.time_window_days = recency.window_days;
        meta.coverage_thin = recency.coverage_thin;
        meta.widened_to_days = recency.widened_to_days;

        let mut candidates = apply_constraints(recency.kept, query);
        tracing::debug!(
            "Turn {}: {} retrieved, {} within {} days",
            conversation_id,
            retrieval.candidates.len(),
            candidates.len(),
            meta.time_window_days
        );
        if candidates.is_empty() {
            return self
                .finish(
                    &conversation_id,
                    &audience,
                    query,
                    NO_COVERAGE_ANSWER.to_string(),
                    Vec::new(),
                    meta,
                )
                .await;
        }

        let clusters = cluster_candidates(
            &mut candidates,
            self.retriever.embedder().as_ref(),
            self.retrieval.max_themes,
        )
        .await;
        let selected = select_for_themes(&candidates, &clusters, self.retrieval.max_sources);
        let bound = bind_sources(&selected, self.retrieval.max_sources);
        meta.themes = clusters.iter().map(|c| c.label.clone()).collect();

        let context = build_context(&bound.items, SOURCE_CONTENT_CHARS);
        let themes = theme_hints(&bound.items, &clusters);
        let user_prompt = chat_user_prompt(&ChatPromptInput {
            query,
            audience: &audience,
            memory: &memory,
            context: &context,
            themes: &themes,
            window_days: meta.time_window_days,
            coverage_thin: meta.coverage_thin,
        });
        let completion = CompletionRequest::new(CHAT_SYSTEM_PROMPT, user_prompt)
            .with_limits(self.llm.max_tokens, self.llm.temperature);

        let (answer, sources) = match self.synthesize(completion, bound.len()).await {
            Ok(answer) => (answer, bound.sources),
            Err(ApiError::ResourceExhausted(_)) => {
                (BUDGET_EXHAUSTED_ANSWER.to_string(), Vec::new())
            }
            Err(err) => {
                tracing::warn!("Synthesis failed for {}: {}", conversation_id, err);
                (SYNTHESIS_UNAVAILABLE_ANSWER.to_string(), Vec::new())
            }
        };

        self.finish(&conversation_id, &audience, query, answer, sources, meta)
            .await
    }

    async fn synthesize(
        &self,
        request: CompletionRequest,
        source_count: usize,
    ) -> Result<String, ApiError> {
        if !self.synthesizer.is_available() {
            return Err(ApiError::ProviderUnavailable(format!(
                "synthesizer '{}' is not configured",
                self.synthesizer.name()
            )));
        }
        let estimate = request.estimated_tokens();
        self.budget.ensure_available(estimate).await?;
        let raw = self.synthesizer.complete(request).await?;
        self.budget.record(estimate).await;

        let answer = citations::validate(&raw, source_count);
        if answer.is_empty() {
            return Err(ApiError::ProviderUnavailable(
                "synthesizer returned no text".to_string(),
            ));
        }
        Ok(answer)
    }

    async fn finish(
        &self,
        conversation_id: &str,
        audience: &str,
        query: &str,
        answer: String,
        sources: Vec<Source>,
        mut meta: ChatMeta,
    ) -> Result<ChatResponse, ApiError> {
        self.memory
            .store()
            .record_turn(conversation_id, Some(audience), query, &answer)
            .await?;
        meta.sources_used = sources.len();
        Ok(ChatResponse {
            answer,
            sources,
            conversation_id: conversation_id.to_string(),
            meta,
        })
    }
}
