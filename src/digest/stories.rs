//! Recent-story feed with per-article analyst summaries.
//!
//! Summaries are generated once per article and cached; `force` regenerates.
//! A failed regeneration leaves the cached summary in place.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::chat::budget::UsageBudget;
use crate::core::errors::ApiError;
use crate::llm::{CompletionRequest, Synthesizer};
use crate::retrieval::make_snippet;
use crate::retrieval::vocabulary::{contains_term, normalize_for_match, MARKETS, TOPIC_SYNONYMS};
use crate::store::{format_timestamp, Document, DocumentStore, StorySummaryRecord, StorySummaryStore};

const DEFAULT_STORY_DAYS: i64 = 1;
const MAX_STORY_DAYS: i64 = 30;
const DEFAULT_STORY_LIMIT: usize = 30;
const MAX_STORY_LIMIT: usize = 60;
const STORY_SCAN_LIMIT: usize = 1_000;

const SUMMARY_CONTENT_CHARS: usize = 14_000;
const SUMMARY_MAX_TOKENS: u32 = 550;
const SUMMARY_TEMPERATURE: f32 = 0.2;

const SUMMARY_LABEL: &str = "SUMMARY:";
const KEY_FACTS_LABEL: &str = "KEY_FACTS_JSON:";
const SO_WHAT_LABEL: &str = "SO_WHAT:";

const SUMMARY_SYSTEM_PROMPT: &str = "You are an expert data center real estate analyst.
Write concise, grounded summaries for DC real estate decision makers.

Rules:
- Use ONLY the provided article text.
- Do NOT add facts that aren't in the text.
- Output format exactly as specified.";

const SUMMARY_OUTPUT_FORMAT: &str = "Output format exactly:
SUMMARY:
- bullet
- bullet

KEY_FACTS_JSON:
{\"market_metro\":null,\"address\":null,\"city\":null,\"state\":null,\"mw\":null,\"rack_kw\":null,\"capex\":null,\"sqft\":null,\"land_acres\":null,\"developer\":null,\"operator\":null,\"timeline\":null,\"permitting_status\":null,\"power_utility_iso\":null,\"stage\":null}

SO_WHAT:
- bullet";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoryQuery {
    #[serde(default)]
    pub days: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Market key (`nova`, `dfw`, ...) or a free-text location.
    #[serde(default)]
    pub market: Option<String>,
    /// Topic key (`power`, `cooling`, ...) or a free-text term.
    #[serde(default)]
    pub topic: Option<String>,
}

/// Structured facts pulled out of one article. Every field is optional text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyFacts {
    pub market_metro: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub mw: Option<String>,
    pub rack_kw: Option<String>,
    pub capex: Option<String>,
    pub sqft: Option<String>,
    pub land_acres: Option<String>,
    pub developer: Option<String>,
    pub operator: Option<String>,
    pub timeline: Option<String>,
    pub permitting_status: Option<String>,
    pub power_utility_iso: Option<String>,
    pub stage: Option<String>,
}

impl KeyFacts {
    /// Lenient read: numbers and booleans become text, anything else is dropped.
    pub fn from_value(value: &Value) -> Self {
        let empty = Map::new();
        let map = value.as_object().unwrap_or(&empty);
        let fact = |key: &str| match map.get(key) {
            Some(Value::String(s)) => {
                let s = s.trim();
                (!s.is_empty() && !s.eq_ignore_ascii_case("null")).then(|| s.to_string())
            }
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        };
        Self {
            market_metro: fact("market_metro"),
            address: fact("address"),
            city: fact("city"),
            state: fact("state"),
            mw: fact("mw"),
            rack_kw: fact("rack_kw"),
            capex: fact("capex"),
            sqft: fact("sqft"),
            land_acres: fact("land_acres"),
            developer: fact("developer"),
            operator: fact("operator"),
            timeline: fact("timeline"),
            permitting_status: fact("permitting_status"),
            power_utility_iso: fact("power_utility_iso"),
            stage: fact("stage"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Story {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub source: String,
    pub source_type: String,
    pub published_at: Option<DateTime<Utc>>,
    pub snippet: String,
    pub summary_md: Option<String>,
    pub key_facts: Option<KeyFacts>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorySummary {
    pub article_id: i64,
    pub summary_md: String,
    pub key_facts: KeyFacts,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub cached: bool,
}

impl StorySummary {
    fn from_record(record: StorySummaryRecord, cached: bool) -> Self {
        Self {
            article_id: record.article_id,
            key_facts: KeyFacts::from_value(&record.key_facts),
            summary_md: record.summary_md,
            model: record.model,
            created_at: record.created_at,
            cached,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSummary {
    pub summary_md: String,
    pub key_facts: KeyFacts,
}

/// Splits a model reply into summary bullets plus so-what bullets, and the
/// key-facts JSON block. Missing sections yield empty output, never an error.
pub fn parse_story_summary(raw: &str) -> ParsedSummary {
    let text = raw.trim();
    if text.is_empty() {
        return ParsedSummary::default();
    }

    let summary_lines = extract_section(text, SUMMARY_LABEL, &[KEY_FACTS_LABEL, SO_WHAT_LABEL]);
    let so_what_lines = extract_section(text, SO_WHAT_LABEL, &[]);

    let mut bullets: Vec<String> = summary_lines
        .iter()
        .filter(|line| line.starts_with("- "))
        .cloned()
        .collect();
    let mut so_what: Vec<String> = so_what_lines
        .iter()
        .filter(|line| line.starts_with("- "))
        .cloned()
        .collect();
    if so_what.is_empty() {
        if let Some(first) = so_what_lines.first() {
            so_what.push(format!(
                "- {}",
                first.trim_start_matches(|c| c == '-' || c == ' ').trim()
            ));
        }
    }
    bullets.extend(so_what);

    ParsedSummary {
        summary_md: bullets.join("\n").trim().to_string(),
        key_facts: extract_json_block(text)
            .map(|value| KeyFacts::from_value(&value))
            .unwrap_or_default(),
    }
}

/// Non-empty trimmed lines after `start`, up to the first of `ends`.
fn extract_section(text: &str, start: &str, ends: &[&str]) -> Vec<String> {
    let Some(pos) = text.find(start) else {
        return Vec::new();
    };
    let mut section = &text[pos + start.len()..];
    if let Some(cut) = ends.iter().filter_map(|end| section.find(end)).min() {
        section = &section[..cut];
    }
    section
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// First balanced `{...}` after the key-facts label.
fn extract_json_block(text: &str) -> Option<Value> {
    let pos = text.find(KEY_FACTS_LABEL)?;
    let payload = &text[pos + KEY_FACTS_LABEL.len()..];
    let start = payload.find('{')?;
    let mut depth = 0usize;
    for (offset, ch) in payload[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let block = &payload[start..start + offset + 1];
                    return serde_json::from_str(block).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Market key expands to its metro terms; unknown input is matched as-is.
fn market_terms(market: &str) -> Vec<String> {
    let key = market.trim().to_lowercase();
    match MARKETS.iter().find(|m| m.key == key) {
        Some(found) => std::iter::once(found.key)
            .chain(found.terms.iter().copied())
            .map(str::to_string)
            .collect(),
        None => vec![key],
    }
}

fn topic_terms(topic: &str) -> Vec<String> {
    let key = topic.trim().to_lowercase();
    let mut terms = vec![key.clone()];
    if let Some((_, synonyms)) = TOPIC_SYNONYMS.iter().find(|(k, _)| *k == key) {
        terms.extend(synonyms.iter().map(|s| s.to_string()));
    }
    terms
}

fn mentions_any(document: &Document, terms: &[String]) -> bool {
    let text = normalize_for_match(&format!("{} {}", document.title, document.body));
    terms.iter().any(|term| contains_term(&text, term))
}

fn summary_user_prompt(document: &Document) -> String {
    let content: String = document.body.chars().take(SUMMARY_CONTENT_CHARS).collect();
    let published = document
        .published_at
        .map(format_timestamp)
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "Summarize this article for data center real estate readers.\n\n\
         Title: {}\nSource: {}\nPublished: {}\n\nArticle text:\n{}\n\n{}",
        document.title, document.source, published, content, SUMMARY_OUTPUT_FORMAT
    )
}

#[derive(Clone)]
pub struct StoryService {
    documents: DocumentStore,
    summaries: StorySummaryStore,
    synthesizer: Arc<dyn Synthesizer>,
    budget: UsageBudget,
    model: String,
    snippet_chars: usize,
}

impl StoryService {
    pub fn new(
        documents: DocumentStore,
        summaries: StorySummaryStore,
        synthesizer: Arc<dyn Synthesizer>,
        budget: UsageBudget,
        model: String,
        snippet_chars: usize,
    ) -> Self {
        Self {
            documents,
            summaries,
            synthesizer,
            budget,
            model,
            snippet_chars,
        }
    }

    /// Recent documents, optionally narrowed by market and topic, with any
    /// cached summaries attached.
    pub async fn list(&self, query: StoryQuery) -> Result<Vec<Story>, ApiError> {
        let days = query.days.unwrap_or(DEFAULT_STORY_DAYS).clamp(1, MAX_STORY_DAYS);
        let limit = query.limit.unwrap_or(DEFAULT_STORY_LIMIT).clamp(1, MAX_STORY_LIMIT);
        let market = query
            .market
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .map(market_terms);
        let topic = query
            .topic
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(topic_terms);

        let mut documents = self
            .documents
            .since(Utc::now() - Duration::days(days), STORY_SCAN_LIMIT)
            .await?;
        documents.retain(|doc| {
            market.as_ref().map_or(true, |terms| mentions_any(doc, terms))
                && topic.as_ref().map_or(true, |terms| mentions_any(doc, terms))
        });
        documents.truncate(limit);

        let ids: Vec<i64> = documents.iter().map(|d| d.id).collect();
        let mut summaries = self.summaries.get_many(&ids).await?;
        tracing::debug!(
            "Story list: {} documents over {} days, {} summarized",
            documents.len(),
            days,
            summaries.len()
        );

        Ok(documents
            .into_iter()
            .map(|doc| {
                let summary = summaries.remove(&doc.id);
                Story {
                    snippet: make_snippet(&doc.body, self.snippet_chars),
                    id: doc.id,
                    title: doc.title,
                    url: doc.url,
                    source: doc.source,
                    source_type: doc.source_type,
                    published_at: doc.published_at,
                    key_facts: summary.as_ref().map(|s| KeyFacts::from_value(&s.key_facts)),
                    summary_md: summary.map(|s| s.summary_md),
                }
            })
            .collect())
    }

    pub async fn summarize(&self, article_id: i64, force: bool) -> Result<StorySummary, ApiError> {
        let document = self
            .documents
            .get(article_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Article not found".to_string()))?;

        if !force {
            if let Some(existing) = self.summaries.get(article_id).await? {
                return Ok(StorySummary::from_record(existing, true));
            }
        }

        if !self.synthesizer.is_available() {
            return Err(ApiError::ProviderUnavailable(
                "AI service is not available".to_string(),
            ));
        }

        let completion = CompletionRequest::new(SUMMARY_SYSTEM_PROMPT, summary_user_prompt(&document))
            .with_limits(SUMMARY_MAX_TOKENS, SUMMARY_TEMPERATURE);
        let estimate = completion.estimated_tokens();
        self.budget.ensure_available(estimate).await?;
        let raw = self.synthesizer.complete(completion).await.map_err(|err| {
            tracing::warn!("Story summary failed for {}: {}", article_id, err);
            err
        })?;
        self.budget.record(estimate).await;

        let parsed = parse_story_summary(&raw);
        if parsed.summary_md.is_empty() {
            return Err(ApiError::ProviderUnavailable(
                "Summary generation failed".to_string(),
            ));
        }

        let record = StorySummaryRecord {
            article_id,
            summary_md: parsed.summary_md,
            key_facts: serde_json::to_value(&parsed.key_facts).map_err(ApiError::internal)?,
            model: self.model.clone(),
            created_at: Utc::now(),
        };
        self.summaries.upsert(&record).await?;
        tracing::info!("Story {} summarized", article_id);
        Ok(StorySummary::from_record(record, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::canonical::{canonicalize, fingerprint};
    use crate::store::{open_pool, NewDocument, UsageStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const REPLY: &str = "SUMMARY:\n- Campus adds 300MW in Ashburn\n- Phase one energizes in 2027\n\n\
        KEY_FACTS_JSON:\n{\"market_metro\":\"Northern Virginia\",\"mw\":300,\"capex\":null,\"stage\":\"\"}\n\n\
        SO_WHAT:\n- Tightens near-term supply in Loudoun";

    struct CountingSynthesizer {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl CountingSynthesizer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Synthesizer for CountingSynthesizer {
        fn name(&self) -> &str {
            "counting"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<String, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ApiError::ProviderUnavailable("upstream 503".to_string()));
            }
            Ok(REPLY.to_string())
        }
    }

    async fn service(synthesizer: Arc<CountingSynthesizer>) -> (StoryService, DocumentStore) {
        let db_path =
            std::env::temp_dir().join(format!("dcnews-stories-{}.db", uuid::Uuid::new_v4()));
        let pool = open_pool(&db_path).await.unwrap();
        let documents = DocumentStore::new(pool.clone()).await.unwrap();
        let summaries = StorySummaryStore::new(pool.clone()).await.unwrap();
        let budget = UsageBudget::new(UsageStore::new(pool).await.unwrap(), 0);
        let service = StoryService::new(
            documents.clone(),
            summaries,
            synthesizer,
            budget,
            "test-model".to_string(),
            200,
        );
        (service, documents)
    }

    async fn insert(documents: &DocumentStore, url: &str, title: &str, body: &str, age: Duration) -> i64 {
        let canonical_url = canonicalize(url);
        documents
            .insert(&NewDocument {
                title: title.to_string(),
                body: body.to_string(),
                url: url.to_string(),
                url_hash: fingerprint(&canonical_url),
                canonical_url,
                source: "DCD".to_string(),
                source_type: "rss".to_string(),
                published_at: Some(Utc::now() - age),
                author: None,
                relevance_score: 6.0,
                tags: Vec::new(),
            })
            .await
            .unwrap()
    }

    #[test]
    fn parses_bullets_and_key_facts() {
        let parsed = parse_story_summary(REPLY);
        assert_eq!(
            parsed.summary_md,
            "- Campus adds 300MW in Ashburn\n- Phase one energizes in 2027\n- Tightens near-term supply in Loudoun"
        );
        assert_eq!(parsed.key_facts.market_metro.as_deref(), Some("Northern Virginia"));
        assert_eq!(parsed.key_facts.mw.as_deref(), Some("300"));
        assert_eq!(parsed.key_facts.capex, None);
        assert_eq!(parsed.key_facts.stage, None);
    }

    #[test]
    fn so_what_without_dash_gets_one_bullet() {
        let parsed = parse_story_summary("SUMMARY:\n- One point\nSO_WHAT:\nWatch the utility queue.\nMore text");
        assert_eq!(parsed.summary_md, "- One point\n- Watch the utility queue.");
        assert_eq!(parsed.key_facts, KeyFacts::default());
    }

    #[test]
    fn unlabelled_reply_parses_to_nothing() {
        assert!(parse_story_summary("just prose").summary_md.is_empty());
        assert!(parse_story_summary("   ").summary_md.is_empty());
    }

    #[test]
    fn broken_json_block_is_ignored() {
        let parsed = parse_story_summary("SUMMARY:\n- A\nKEY_FACTS_JSON:\n{\"mw\": 5,\nSO_WHAT:\n- B");
        assert_eq!(parsed.key_facts, KeyFacts::default());
        assert_eq!(parsed.summary_md, "- A\n- B");
    }

    #[test]
    fn key_facts_accept_numbers_and_skip_nulls() {
        let facts = KeyFacts::from_value(&json!({ "sqft": 250000, "city": "null", "operator": " QTS " }));
        assert_eq!(facts.sqft.as_deref(), Some("250000"));
        assert_eq!(facts.city, None);
        assert_eq!(facts.operator.as_deref(), Some("QTS"));
        assert_eq!(KeyFacts::from_value(&json!("nope")), KeyFacts::default());
    }

    #[tokio::test]
    async fn second_request_is_served_from_cache() {
        let synthesizer = CountingSynthesizer::new();
        let (service, documents) = service(synthesizer.clone()).await;
        let id = insert(&documents, "https://ex.com/a", "Ashburn data center", "Body", Duration::hours(3)).await;

        let first = service.summarize(id, false).await.unwrap();
        let second = service.summarize(id, false).await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.summary_md, second.summary_md);
        assert_eq!(second.model, "test-model");
        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_regenerates_and_failure_keeps_the_cached_summary() {
        let synthesizer = CountingSynthesizer::new();
        let (service, documents) = service(synthesizer.clone()).await;
        let id = insert(&documents, "https://ex.com/a", "Ashburn data center", "Body", Duration::hours(3)).await;

        service.summarize(id, false).await.unwrap();
        let forced = service.summarize(id, true).await.unwrap();
        assert!(!forced.cached);
        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 2);

        synthesizer.fail.store(true, Ordering::SeqCst);
        let err = service.summarize(id, true).await.unwrap_err();
        assert!(matches!(err, ApiError::ProviderUnavailable(_)));

        let kept = service.summarize(id, false).await.unwrap();
        assert!(kept.cached);
        assert_eq!(kept.summary_md, forced.summary_md);
    }

    #[tokio::test]
    async fn missing_article_is_not_found() {
        let (service, _) = service(CountingSynthesizer::new()).await;
        assert!(matches!(
            service.summarize(999, false).await.unwrap_err(),
            ApiError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn list_filters_by_market_topic_and_window() {
        let synthesizer = CountingSynthesizer::new();
        let (service, documents) = service(synthesizer).await;
        let ashburn = insert(
            &documents,
            "https://ex.com/ashburn",
            "Ashburn data center waits on substation",
            "Loudoun utility timelines slip.",
            Duration::hours(5),
        )
        .await;
        insert(
            &documents,
            "https://ex.com/dallas",
            "Dallas data center adds liquid cooling",
            "Operators retrofit halls.",
            Duration::hours(6),
        )
        .await;
        insert(
            &documents,
            "https://ex.com/stale",
            "Ashburn data center power deal",
            "Utility agreement signed.",
            Duration::days(10),
        )
        .await;
        service.summarize(ashburn, false).await.unwrap();

        let stories = service
            .list(StoryQuery {
                days: Some(2),
                market: Some("nova".to_string()),
                topic: Some("power".to_string()),
                ..StoryQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(stories.len(), 1);
        assert_eq!(stories[0].id, ashburn);
        assert!(stories[0].summary_md.is_some());
        assert_eq!(
            stories[0].key_facts.as_ref().and_then(|f| f.mw.as_deref()),
            Some("300")
        );

        let all_recent = service.list(StoryQuery::default()).await.unwrap();
        assert_eq!(all_recent.len(), 2);
        assert!(all_recent.iter().all(|s| s.title != "Ashburn data center power deal"));

        let raw_term = service
            .list(StoryQuery {
                market: Some("Dallas".to_string()),
                ..StoryQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(raw_term.len(), 1);
        assert!(raw_term[0].summary_md.is_none());
    }
}
