//! Hybrid candidate retrieval: semantic kNN first, keyword scan as fallback.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::keyword::{self, KeywordQuery};
use super::{make_snippet, Candidate, HitMetadata, Relevance};
use crate::core::config::settings::RetrievalSettings;
use crate::core::errors::ApiError;
use crate::index::{VectorHit, VectorIndex};
use crate::ingest::relevance::RelevanceGate;
use crate::llm::EmbeddingProvider;
use crate::store::{Document, DocumentStore};

#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub semantic_overfetch: f32,
    pub keyword_scan_limit: usize,
    pub snippet_chars: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            semantic_overfetch: 1.6,
            keyword_scan_limit: 400,
            snippet_chars: 600,
        }
    }
}

impl From<&RetrievalSettings> for RetrieverConfig {
    fn from(settings: &RetrievalSettings) -> Self {
        Self {
            semantic_overfetch: settings.semantic_overfetch,
            keyword_scan_limit: settings.keyword_scan_limit,
            snippet_chars: settings.snippet_chars,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalPath {
    Semantic,
    Keyword,
}

#[derive(Debug, Clone)]
pub struct Retrieval {
    pub candidates: Vec<Candidate>,
    pub path: RetrievalPath,
}

#[derive(Clone)]
pub struct CandidateRetriever {
    documents: DocumentStore,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    gate: Arc<RelevanceGate>,
    config: RetrieverConfig,
}

impl CandidateRetriever {
    pub fn new(
        documents: DocumentStore,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        gate: Arc<RelevanceGate>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            documents,
            index,
            embedder,
            gate,
            config,
        }
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Ranked candidates for `query`. Provider and index failures fall back
    /// to keyword scoring; only store failures surface as errors.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Retrieval, ApiError> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Retrieval {
                candidates: Vec::new(),
                path: RetrievalPath::Keyword,
            });
        }

        match self.semantic(query, k).await {
            Ok(candidates) if !candidates.is_empty() => {
                tracing::debug!("Semantic retrieval returned {} candidates", candidates.len());
                return Ok(Retrieval {
                    candidates,
                    path: RetrievalPath::Semantic,
                });
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!("Semantic retrieval unavailable, using keywords: {}", err);
            }
        }

        let candidates = self.keyword(query, k).await?;
        tracing::debug!("Keyword retrieval returned {} candidates", candidates.len());
        Ok(Retrieval {
            candidates,
            path: RetrievalPath::Keyword,
        })
    }

    async fn semantic(&self, query: &str, k: usize) -> Result<Vec<Candidate>, ApiError> {
        if !self.embedder.is_available() || self.index.count().await? == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await?;
        let fetch = ((k as f32) * self.config.semantic_overfetch).ceil().max(k as f32) as usize;
        let hits = self.index.query(&vector, fetch).await?;

        let mut best: HashMap<i64, Candidate> = HashMap::new();
        for hit in hits {
            let Some(document) = self.resolve_hit(&hit).await? else {
                tracing::debug!("Dropping vector hit {} with no stored document", hit.id);
                continue;
            };
            if !self.gate.is_allowed(&document.title, &document.body) {
                continue;
            }

            let keep = match best.get(&document.id) {
                Some(existing) => match existing.relevance {
                    Relevance::Distance(d) => hit.distance < d,
                    Relevance::Keyword(_) => true,
                },
                None => true,
            };
            if keep {
                let snippet = make_snippet(
                    hit.document.as_deref().unwrap_or(&document.body),
                    self.config.snippet_chars,
                );
                best.insert(
                    document.id,
                    Candidate {
                        document,
                        snippet,
                        relevance: Relevance::Distance(hit.distance),
                        cluster_id: None,
                    },
                );
            }
        }

        let mut candidates: Vec<Candidate> = best.into_values().collect();
        candidates.sort_by(|a, b| {
            distance_of(a)
                .partial_cmp(&distance_of(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        candidates.truncate(k);
        Ok(candidates)
    }

    async fn resolve_hit(&self, hit: &VectorHit) -> Result<Option<Document>, ApiError> {
        let metadata = HitMetadata::from_value(&hit.metadata);
        if let Some(article_id) = metadata.article_id {
            if let Some(doc) = self.documents.get(article_id).await? {
                return Ok(Some(doc));
            }
        }
        self.documents.get_by_embedding_id(&hit.id).await
    }

    async fn keyword(&self, query: &str, k: usize) -> Result<Vec<Candidate>, ApiError> {
        let parsed = KeywordQuery::parse(query);
        if parsed.is_empty() {
            return Ok(Vec::new());
        }
        let docs = self.documents.recent(self.config.keyword_scan_limit).await?;
        Ok(keyword::rank(&parsed, docs, k)
            .into_iter()
            .map(|(document, score)| Candidate {
                snippet: make_snippet(&document.body, self.config.snippet_chars),
                document,
                relevance: Relevance::Keyword(score),
                cluster_id: None,
            })
            .collect())
    }
}

fn distance_of(candidate: &Candidate) -> f32 {
    match candidate.relevance {
        Relevance::Distance(d) => d,
        Relevance::Keyword(_) => f32::MAX,
    }
}
