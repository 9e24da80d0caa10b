//! Daily industry digest built from one publication window, cached per
//! date, audience and requested window.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::budget::UsageBudget;
use crate::chat::prompt::{build_context, theme_hints, DEFAULT_AUDIENCE};
use crate::core::errors::ApiError;
use crate::ingest::canonical::canonicalize;
use crate::llm::{CompletionRequest, Synthesizer};
use crate::retrieval::citations;
use crate::retrieval::cluster::cluster_candidates;
use crate::retrieval::sources::{bind_sources, select_for_themes};
use crate::retrieval::{make_snippet, Candidate, CandidateRetriever, Relevance, Source};
use crate::store::{DigestRecord, DigestStore, Document, DocumentStore};

pub mod stories;

pub use stories::{KeyFacts, Story, StoryQuery, StoryService, StorySummary};

pub const DIGEST_QUERY: &str =
    "data center real estate development leasing land power permitting colocation hyperscale";
pub const NO_ARTICLES_BODY: &str = "No recent articles found for this window.";
pub const NO_DIGEST_BODY: &str = "No digest generated.";

const MAX_WINDOW_DAYS: i64 = 30;
const THIN_WINDOW_MIN_DOCS: usize = 4;
const WIDENED_WINDOW_DAYS: i64 = 7;
const WINDOW_LOAD_LIMIT: usize = 500;
const RETRIEVE_COUNT: usize = 60;
const RANKED_FLOOR: usize = 30;
const MAX_CANDIDATES: usize = 50;
const MAX_DIGEST_SOURCES: usize = 18;
const MAX_DIGEST_THEMES: usize = 5;
const DIGEST_MAX_TOKENS: u32 = 900;
const DIGEST_TEMPERATURE: f32 = 0.3;
const SOURCE_CONTENT_CHARS: usize = 1_200;

const DIGEST_SYSTEM_PROMPT: &str = "You are a data center real estate analyst. Be direct and specific.

Rules:
- Use ONLY the provided articles and context.
- Do NOT paste raw URLs in the body.
- Every factual claim tied to an article must carry an inline citation like [1].
- If coverage is thin and the window was widened, say so in \"What changed\".
- Use only dash bullets.
- Do NOT include a Sources section in the answer body.

Output format exactly:
## Today's Data Center Real Estate Digest (YYYY-MM-DD)
### What changed
- bullet [n]

### Themes
### <Theme 1>
- bullet [n]

### Why it matters (for Data Center Real Estate)
- bullet [n]

### Deals and leasing signals (if present)
- bullet [n]

### Permitting and power constraints (if present)
- bullet [n]

### What to do next
- bullet [n]";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DigestRequest {
    /// `YYYY-MM-DD`; today (UTC) when absent.
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub window_days: Option<i64>,
    /// Regenerate even when a cached digest exists.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestMeta {
    pub window_days: i64,
    pub coverage_thin: bool,
    pub widened_to_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Digest {
    pub date: String,
    pub audience: String,
    pub title: String,
    pub content_md: String,
    pub sources: Vec<Source>,
    pub meta: DigestMeta,
    pub cached: bool,
}

pub fn digest_title(date: NaiveDate) -> String {
    format!("Today's Data Center Real Estate Digest ({})", date)
}

/// Date (today UTC when absent), audience and clamped requested window.
fn resolve_request(request: &DigestRequest) -> Result<(NaiveDate, String, i64), ApiError> {
    let date = match request.date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
            ApiError::Validation(format!("date must be YYYY-MM-DD, got '{}'", raw))
        })?,
        None => Utc::now().date_naive(),
    };
    let audience = request
        .audience
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or(DEFAULT_AUDIENCE)
        .to_string();
    let requested_days = request.window_days.unwrap_or(1).clamp(1, MAX_WINDOW_DAYS);
    Ok((date, audience, requested_days))
}

fn digest_from_record(record: DigestRecord) -> Result<Digest, ApiError> {
    let sources: Vec<Source> = serde_json::from_value(record.sources)
        .map_err(|e| ApiError::Integrity(format!("cached digest sources: {}", e)))?;
    let meta: DigestMeta = serde_json::from_value(record.meta)
        .map_err(|e| ApiError::Integrity(format!("cached digest meta: {}", e)))?;
    Ok(Digest {
        date: record.date,
        audience: record.audience,
        title: record.title,
        content_md: record.content_md,
        sources,
        meta,
        cached: true,
    })
}

#[derive(Clone)]
pub struct DigestService {
    documents: DocumentStore,
    store: DigestStore,
    retriever: CandidateRetriever,
    synthesizer: Arc<dyn Synthesizer>,
    budget: UsageBudget,
    snippet_chars: usize,
}

impl DigestService {
    pub fn new(
        documents: DocumentStore,
        store: DigestStore,
        retriever: CandidateRetriever,
        synthesizer: Arc<dyn Synthesizer>,
        budget: UsageBudget,
        snippet_chars: usize,
    ) -> Self {
        Self {
            documents,
            store,
            retriever,
            synthesizer,
            budget,
            snippet_chars,
        }
    }

    /// Cached digest for the request's key, else a freshly generated one.
    /// Only synthesized digests are stored; empty windows and synthesis
    /// failures are rebuilt on the next call.
    pub async fn get_or_create(&self, request: DigestRequest) -> Result<Digest, ApiError> {
        let (date, audience, requested_days) = resolve_request(&request)?;
        let date_key = date.to_string();

        if !request.force {
            if let Some(record) = self.store.find(&date_key, &audience, requested_days).await? {
                tracing::debug!("Digest {} served from cache", date_key);
                return digest_from_record(record);
            }
        }

        let digest = self.build(date, audience, requested_days).await?;
        if digest.sources.is_empty() || digest.content_md == NO_DIGEST_BODY {
            return Ok(digest);
        }

        let record = DigestRecord {
            date: digest.date.clone(),
            audience: digest.audience.clone(),
            window_days: requested_days,
            title: digest.title.clone(),
            content_md: digest.content_md.clone(),
            sources: serde_json::to_value(&digest.sources).map_err(ApiError::internal)?,
            meta: serde_json::to_value(&digest.meta).map_err(ApiError::internal)?,
            created_at: Utc::now(),
        };
        if let Err(err) = self.store.save(&record).await {
            tracing::warn!("Failed to cache digest {}: {}", digest.date, err);
        }
        Ok(digest)
    }

    /// Always builds a new digest; nothing is read from or written to the cache.
    pub async fn generate(&self, request: DigestRequest) -> Result<Digest, ApiError> {
        let (date, audience, requested_days) = resolve_request(&request)?;
        self.build(date, audience, requested_days).await
    }

    async fn build(
        &self,
        date: NaiveDate,
        audience: String,
        requested_days: i64,
    ) -> Result<Digest, ApiError> {
        let end = date
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .ok_or_else(|| ApiError::Validation(format!("date out of range: {}", date)))?;

        let mut window_days = requested_days;
        let mut window = self
            .documents
            .published_between(end - Duration::days(window_days), end, WINDOW_LOAD_LIMIT)
            .await?;
        let mut widened_to_days = None;
        if window.len() < THIN_WINDOW_MIN_DOCS && window_days < WIDENED_WINDOW_DAYS {
            window_days = WIDENED_WINDOW_DAYS;
            widened_to_days = Some(window_days);
            window = self
                .documents
                .published_between(end - Duration::days(window_days), end, WINDOW_LOAD_LIMIT)
                .await?;
        }

        let title = digest_title(date);
        let mut digest = Digest {
            date: date.to_string(),
            audience,
            title,
            content_md: String::new(),
            sources: Vec::new(),
            meta: DigestMeta {
                window_days,
                coverage_thin: widened_to_days.is_some(),
                widened_to_days,
            },
            cached: false,
        };

        if window.is_empty() {
            digest.content_md = NO_ARTICLES_BODY.to_string();
            digest.meta.coverage_thin = true;
            return Ok(digest);
        }

        let mut candidates = self.rank_window(window).await;
        let clusters = cluster_candidates(
            &mut candidates,
            self.retriever.embedder().as_ref(),
            MAX_DIGEST_THEMES,
        )
        .await;
        let selected = select_for_themes(&candidates, &clusters, MAX_DIGEST_SOURCES);
        let bound = bind_sources(&selected, MAX_DIGEST_SOURCES);

        let sources_block = bound
            .sources
            .iter()
            .map(|s| format!("{}. {} - {}", s.index, s.title, s.publisher))
            .collect::<Vec<_>>()
            .join("\n");
        let coverage_note = if digest.meta.coverage_thin {
            format!("Coverage thin; window widened to {} days.", window_days)
        } else {
            "Coverage ok.".to_string()
        };
        let themes = theme_hints(&bound.items, &clusters);
        let user_prompt = format!(
            "Date: {}\nAudience: {}\nWindow days: {}\nCoverage note: {}\n\n\
             Available Articles (numbered for citations):\n{}\n\n\
             Sources list to cite (exact; citations must refer to these numbers):\n{}\n\n\
             Themes:\n{}",
            digest.date,
            digest.audience,
            window_days,
            coverage_note,
            build_context(&bound.items, SOURCE_CONTENT_CHARS),
            sources_block,
            themes
        );

        let completion = CompletionRequest::new(DIGEST_SYSTEM_PROMPT, user_prompt)
            .with_limits(DIGEST_MAX_TOKENS, DIGEST_TEMPERATURE);
        digest.content_md = match self.synthesize(completion, bound.len()).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!("Digest synthesis failed for {}: {}", digest.date, err);
                NO_DIGEST_BODY.to_string()
            }
        };
        digest.sources = bound.sources;

        tracing::info!(
            "Digest {} built from {} candidates, {} sources",
            digest.date,
            candidates.len(),
            digest.sources.len()
        );
        Ok(digest)
    }

    /// Retriever order for documents inside the window, then the rest of the
    /// window newest first; deduped by canonical URL and capped.
    async fn rank_window(&self, window: Vec<Document>) -> Vec<Candidate> {
        let in_window: HashSet<i64> = window.iter().map(|d| d.id).collect();
        let retrieved = self.retriever.retrieve(DIGEST_QUERY, RETRIEVE_COUNT).await;
        let mut ranked: Vec<Candidate> = match retrieved {
            Ok(retrieval) => retrieval
                .candidates
                .into_iter()
                .filter(|c| in_window.contains(&c.document.id))
                .collect(),
            Err(err) => {
                tracing::warn!("Digest ranking unavailable: {}", err);
                Vec::new()
            }
        };

        if ranked.len() < RANKED_FLOOR {
            let present: HashSet<i64> = ranked.iter().map(|c| c.document.id).collect();
            for document in window {
                if present.contains(&document.id) {
                    continue;
                }
                ranked.push(Candidate {
                    snippet: make_snippet(&document.body, self.snippet_chars),
                    document,
                    relevance: Relevance::Keyword(0.0),
                    cluster_id: None,
                });
            }
        }

        let mut seen = HashSet::new();
        ranked.retain(|c| {
            let url = c.url();
            !url.is_empty() && seen.insert(canonicalize(url))
        });
        ranked.truncate(MAX_CANDIDATES);
        ranked
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

        let text = citations::validate(&raw, source_count);
        if text.is_empty() {
            return Err(ApiError::ProviderUnavailable("empty digest".to_string()));
        }
        Ok(text)
    }
}
