//! Document ingestion: canonicalize, dedupe, gate, store.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::canonical::{canonicalize, fingerprint};
use super::relevance::{passes_threshold, RelevanceGate};
use crate::core::config::settings::IngestSettings;
use crate::core::errors::ApiError;
use crate::index::VectorIndex;
use crate::store::{DocumentStore, NewDocument};

/// A scraped document as handed over by a fetcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDocument {
    pub title: String,
    #[serde(default, alias = "content")]
    pub body: String,
    pub url: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub source_type: String,
    /// RFC 3339, RFC 2822, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD`.
    #[serde(default, alias = "published_date")]
    pub published_at: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub failed: usize,
    /// Another sweep held the lock; nothing was processed.
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub deleted_documents: usize,
    pub deleted_vectors: usize,
    pub skipped: bool,
}

enum Outcome {
    Inserted,
    Duplicate,
    Rejected,
}

#[derive(Clone)]
pub struct IngestService {
    documents: DocumentStore,
    index: Arc<dyn VectorIndex>,
    gate: Arc<RelevanceGate>,
    settings: IngestSettings,
    sweep_lock: Arc<Mutex<()>>,
}

impl IngestService {
    pub fn new(
        documents: DocumentStore,
        index: Arc<dyn VectorIndex>,
        gate: Arc<RelevanceGate>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            documents,
            index,
            gate,
            settings,
            sweep_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Stores every new, relevant document. Per-document failures are logged
    /// and counted; they never abort the batch. A call made while another
    /// sweep is running returns immediately with `skipped = true`.
    pub async fn ingest(&self, raw_documents: Vec<RawDocument>) -> IngestReport {
        let Ok(_guard) = self.sweep_lock.try_lock() else {
            tracing::info!("Ingestion already running; skipping this trigger");
            return IngestReport {
                skipped: true,
                ..IngestReport::default()
            };
        };

        let mut report = IngestReport::default();
        for raw in raw_documents {
            match self.ingest_one(&raw).await {
                Ok(Outcome::Inserted) => report.inserted += 1,
                Ok(Outcome::Duplicate) => report.duplicates += 1,
                Ok(Outcome::Rejected) => report.rejected += 1,
                Err(err) => {
                    tracing::warn!("Failed to ingest {}: {}", raw.url.trim(), err);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "Ingestion finished: {} inserted, {} duplicates, {} rejected, {} failed",
            report.inserted,
            report.duplicates,
            report.rejected,
            report.failed
        );
        report
    }

    async fn ingest_one(&self, raw: &RawDocument) -> Result<Outcome, ApiError> {
        let title = raw.title.trim();
        let url = raw.url.trim();
        if title.is_empty() || url.is_empty() {
            return Err(ApiError::Validation("title and url are required".to_string()));
        }

        let canonical_url = canonicalize(url);
        let url_hash = fingerprint(&canonical_url);
        if self.documents.exists_by_hash(&url_hash).await? {
            tracing::debug!("Duplicate {}", canonical_url);
            return Ok(Outcome::Duplicate);
        }

        let body = raw.body.trim();
        let outcome = self.gate.score(title, body, &raw.tags);
        if !passes_threshold(&raw.source_type, outcome.score, self.settings.social_min_score) {
            tracing::debug!(
                "Rejected {} (score {:.1}, source type {})",
                canonical_url,
                outcome.score,
                raw.source_type
            );
            return Ok(Outcome::Rejected);
        }

        let doc = NewDocument {
            title: title.to_string(),
            body: body.to_string(),
            url: url.to_string(),
            canonical_url,
            url_hash,
            source: raw.source.trim().to_string(),
            source_type: raw.source_type.trim().to_ascii_lowercase(),
            published_at: raw.published_at.as_deref().and_then(parse_published),
            author: raw
                .author
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string),
            relevance_score: outcome.score,
            tags: outcome.tags,
        };

        match self.documents.insert(&doc).await {
            Ok(id) => {
                tracing::debug!("Stored document {} ({})", id, doc.canonical_url);
                Ok(Outcome::Inserted)
            }
            // Lost a race with a concurrent writer or hit the raw-url constraint.
            Err(ApiError::Integrity(_)) => Ok(Outcome::Duplicate),
            Err(err) => Err(err),
        }
    }

    /// Deletes documents older than `max_age_days` (published time, else
    /// scrape time) together with their vectors.
    pub async fn retention_sweep(&self, max_age_days: i64) -> Result<RetentionReport, ApiError> {
        let Ok(_guard) = self.sweep_lock.try_lock() else {
            tracing::info!("Ingestion running; skipping retention sweep");
            return Ok(RetentionReport {
                skipped: true,
                ..RetentionReport::default()
            });
        };

        let cutoff = Utc::now() - Duration::days(max_age_days.max(1));
        let ids = self.documents.delete_older_than(cutoff).await?;

        let mut deleted_vectors = 0;
        for id in &ids {
            match self.index.delete_for_article(*id).await {
                Ok(count) => deleted_vectors += count,
                Err(err) => tracing::warn!("Failed to delete vectors for {}: {}", id, err),
            }
        }

        tracing::info!(
            "Retention sweep removed {} documents and {} vectors older than {} days",
            ids.len(),
            deleted_vectors,
            max_age_days
        );
        Ok(RetentionReport {
            deleted_documents: ids.len(),
            deleted_vectors,
            skipped: false,
        })
    }

    pub fn default_retention_days(&self) -> i64 {
        self.settings.retention_days
    }
}

/// Parses the publication formats fetchers commonly emit. Naive times are UTC.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{SqliteVectorIndex, VectorRecord};
    use crate::store::open_pool;

    async fn service() -> (IngestService, DocumentStore, Arc<SqliteVectorIndex>) {
        let path = std::env::temp_dir().join(format!("dcnews-ingest-{}.db", uuid::Uuid::new_v4()));
        let pool = open_pool(&path).await.unwrap();
        let documents = DocumentStore::new(pool.clone()).await.unwrap();
        let index = Arc::new(SqliteVectorIndex::new(pool).await.unwrap());
        let settings = IngestSettings {
            social_min_score: 6.0,
            retention_days: 180,
        };
        let service = IngestService::new(
            documents.clone(),
            index.clone(),
            Arc::new(RelevanceGate::default()),
            settings,
        );
        (service, documents, index)
    }

    fn raw(title: &str, url: &str, source_type: &str) -> RawDocument {
        RawDocument {
            title: title.to_string(),
            body: "Operators are adding capacity across the market.".to_string(),
            url: url.to_string(),
            source: "Test Feed".to_string(),
            source_type: source_type.to_string(),
            published_at: Some("2026-10-01".to_string()),
            ..RawDocument::default()
        }
    }

    #[tokio::test]
    async fn tracking_variants_collapse_to_one_document() {
        let (service, documents, _) = service().await;
        let title = "New $2B hyperscale data center in Ashburn";
        let report = service
            .ingest(vec![
                raw(title, "https://news.example.com/story?utm_source=rss", "rss"),
                raw(title, "https://NEWS.example.com/story#comments", "rss"),
                raw(title, "https://news.example.com/story?fbclid=abc&utm_medium=x", "rss"),
            ])
            .await;

        assert_eq!(report.inserted, 1);
        assert_eq!(report.duplicates, 2);
        assert_eq!(documents.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn social_sources_must_clear_the_threshold() {
        let (service, _, _) = service().await;
        let report = service
            .ingest(vec![
                raw("Best recipes for apple pie", "https://reddit.example.com/r/1", "reddit"),
                raw(
                    "New $2B hyperscale data center in Ashburn",
                    "https://reddit.example.com/r/2",
                    "reddit",
                ),
                raw("Quarterly roundup", "https://feed.example.com/q", "rss"),
            ])
            .await;

        assert_eq!(report.inserted, 2);
        assert_eq!(report.rejected, 1);
    }

    #[tokio::test]
    async fn malformed_documents_do_not_abort_the_batch() {
        let (service, _, _) = service().await;
        let report = service
            .ingest(vec![
                raw("", "https://ex.com/empty-title", "rss"),
                raw("Colocation campus expands", "https://ex.com/ok", "rss"),
            ])
            .await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn concurrent_trigger_is_skipped() {
        let (service, _, _) = service().await;
        let _held = service.sweep_lock.clone().try_lock_owned().unwrap();
        let report = service
            .ingest(vec![raw("Colocation campus", "https://ex.com/x", "rss")])
            .await;
        assert!(report.skipped);
        assert_eq!(report.inserted, 0);
    }

    #[tokio::test]
    async fn retention_sweep_removes_old_documents_and_vectors() {
        let (service, documents, index) = service().await;
        let mut old = raw("Data center land deal", "https://ex.com/old", "rss");
        old.published_at = Some("2020-01-01T00:00:00Z".to_string());
        let fresh = RawDocument {
            published_at: Some(crate::store::format_timestamp(Utc::now())),
            ..raw("Data center power deal", "https://ex.com/new", "rss")
        };
        service.ingest(vec![old, fresh]).await;

        let old_doc = documents
            .recent(10)
            .await
            .unwrap()
            .into_iter()
            .find(|d| d.url.ends_with("old"))
            .unwrap();
        index
            .upsert(vec![VectorRecord {
                id: crate::index::chunk_vector_id(old_doc.id, 0),
                embedding: vec![1.0, 0.0],
                metadata: serde_json::json!({ "article_id": old_doc.id }),
                document: None,
            }])
            .await
            .unwrap();

        let report = service.retention_sweep(180).await.unwrap();
        assert_eq!(report.deleted_documents, 1);
        assert_eq!(report.deleted_vectors, 1);
        assert_eq!(documents.count().await.unwrap(), 1);
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[test]
    fn published_dates_in_common_formats() {
        assert!(parse_published("2026-10-01T08:30:00Z").is_some());
        assert!(parse_published("Thu, 01 Oct 2026 08:30:00 GMT").is_some());
        assert!(parse_published("2026-10-01 08:30:00").is_some());
        assert_eq!(
            parse_published("2026-10-01").map(crate::store::format_timestamp),
            Some("2026-10-01T00:00:00Z".to_string())
        );
        assert!(parse_published("yesterday").is_none());
    }
}
