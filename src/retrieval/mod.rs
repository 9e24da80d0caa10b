//! Evidence retrieval: candidate search, recency narrowing, theme grouping,
//! source binding and citation cleanup.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Document;

pub mod citations;
pub mod cluster;
pub mod keyword;
pub mod recency;
pub mod retriever;
pub mod sources;
pub mod vector_math;
pub mod vocabulary;

pub use cluster::Cluster;
pub use recency::{RecencyOutcome, RecencyPolicy};
pub use retriever::{CandidateRetriever, RetrievalPath, RetrieverConfig};
pub use sources::{BoundSources, Source};

/// How a candidate was ranked. Smaller distance is better; larger score is better.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Relevance {
    Distance(f32),
    Keyword(f32),
}

/// A retrieved document for one request. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub document: Document,
    pub snippet: String,
    pub relevance: Relevance,
    pub cluster_id: Option<usize>,
}

impl Candidate {
    pub fn url(&self) -> &str {
        self.document.url.trim()
    }
}

/// Vector-hit metadata after validation. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HitMetadata {
    pub article_id: Option<i64>,
    pub chunk_index: Option<usize>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub source: Option<String>,
}

impl HitMetadata {
    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::default();
        };
        let text = |key: &str| {
            map.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let article_id = map.get("article_id").and_then(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        });

        Self {
            article_id: article_id.filter(|id| *id > 0),
            chunk_index: map
                .get("chunk_index")
                .and_then(Value::as_u64)
                .map(|i| i as usize),
            title: text("title"),
            url: text("url"),
            source: text("source"),
        }
    }
}

/// First `max_chars` characters, cut back to a word boundary when possible.
pub fn make_snippet(text: &str, max_chars: usize) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.chars().count() <= max_chars {
        return normalized;
    }
    let cut: String = normalized.chars().take(max_chars).collect();
    match cut.rfind(' ') {
        Some(pos) if pos > max_chars / 2 => format!("{}...", &cut[..pos]),
        _ => format!("{}...", cut),
    }
}
