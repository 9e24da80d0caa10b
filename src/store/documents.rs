use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{format_timestamp, parse_timestamp};
use crate::core::errors::ApiError;

/// A stored corpus document. `url_hash` is the dedup key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub url: String,
    pub canonical_url: String,
    pub url_hash: String,
    pub source: String,
    pub source_type: String,
    pub published_at: Option<DateTime<Utc>>,
    pub scraped_at: DateTime<Utc>,
    pub author: Option<String>,
    pub relevance_score: f32,
    pub tags: Vec<String>,
    pub has_embedding: bool,
    pub embedding_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub title: String,
    pub body: String,
    pub url: String,
    pub canonical_url: String,
    pub url_hash: String,
    pub source: String,
    pub source_type: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub relevance_score: f32,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub source_type: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CorpusCounts {
    pub total_documents: i64,
    pub documents_with_embeddings: i64,
    pub recent_24h: i64,
    pub by_source_type: BTreeMap<String, i64>,
}

const SELECT_COLUMNS: &str = "id, title, body, url, canonical_url, url_hash, source, source_type, \
     published_at, scraped_at, author, relevance_score, tags, has_embedding, embedding_id";

#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, ApiError> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                body TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL UNIQUE,
                canonical_url TEXT NOT NULL,
                url_hash TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                source_type TEXT NOT NULL DEFAULT '',
                published_at TEXT,
                scraped_at TEXT NOT NULL,
                author TEXT,
                relevance_score REAL NOT NULL DEFAULT 0,
                tags TEXT NOT NULL DEFAULT '[]',
                has_embedding INTEGER NOT NULL DEFAULT 0,
                embedding_id TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        for statement in [
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_url_hash ON documents(url_hash)",
            "CREATE INDEX IF NOT EXISTS idx_documents_canonical_url ON documents(canonical_url)",
            "CREATE INDEX IF NOT EXISTS idx_documents_published_at ON documents(published_at)",
            "CREATE INDEX IF NOT EXISTS idx_documents_scraped_at ON documents(scraped_at)",
            "CREATE INDEX IF NOT EXISTS idx_documents_embedding_id ON documents(embedding_id)",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(ApiError::internal)?;
        }

        Ok(())
    }

    /// Inserts a document. A duplicate `url` or `url_hash` surfaces as `ApiError::Integrity`.
    pub async fn insert(&self, doc: &NewDocument) -> Result<i64, ApiError> {
        let tags = serde_json::to_string(&doc.tags).map_err(ApiError::internal)?;
        let result = sqlx::query(
            "INSERT INTO documents (title, body, url, canonical_url, url_hash, source, source_type,
                published_at, scraped_at, author, relevance_score, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(&doc.title)
        .bind(&doc.body)
        .bind(&doc.url)
        .bind(&doc.canonical_url)
        .bind(&doc.url_hash)
        .bind(&doc.source)
        .bind(&doc.source_type)
        .bind(doc.published_at.map(format_timestamp))
        .bind(format_timestamp(Utc::now()))
        .bind(&doc.author)
        .bind(doc.relevance_score)
        .bind(&tags)
        .execute(&self.pool)
        .await
        .map_err(ApiError::from_db)?;

        Ok(result.last_insert_rowid())
    }

    pub async fn exists_by_hash(&self, url_hash: &str) -> Result<bool, ApiError> {
        let row = sqlx::query("SELECT 1 FROM documents WHERE url_hash = ? LIMIT 1")
            .bind(url_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(row.is_some())
    }

    pub async fn get(&self, id: i64) -> Result<Option<Document>, ApiError> {
        let sql = format!("SELECT {} FROM documents WHERE id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        row.as_ref().map(row_to_document).transpose()
    }

    pub async fn get_by_embedding_id(&self, embedding_id: &str) -> Result<Option<Document>, ApiError> {
        let sql = format!(
            "SELECT {} FROM documents WHERE embedding_id = ? LIMIT 1",
            SELECT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(embedding_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        row.as_ref().map(row_to_document).transpose()
    }

    /// Most recent documents by published time (scrape time when unknown).
    pub async fn recent(&self, limit: usize) -> Result<Vec<Document>, ApiError> {
        let sql = format!(
            "SELECT {} FROM documents
             ORDER BY COALESCE(published_at, scraped_at) DESC, id DESC
             LIMIT ?",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        rows.iter().map(row_to_document).collect()
    }

    /// Documents with `start <= published_at < end`, newest first.
    pub async fn published_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Document>, ApiError> {
        let sql = format!(
            "SELECT {} FROM documents
             WHERE published_at IS NOT NULL AND published_at >= ?1 AND published_at < ?2
             ORDER BY published_at DESC, id DESC
             LIMIT ?3",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(format_timestamp(start))
            .bind(format_timestamp(end))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        rows.iter().map(row_to_document).collect()
    }

    /// Documents published (or, undated, scraped) at or after `cutoff`.
    /// Dated documents come first, newest first.
    pub async fn since(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<Document>, ApiError> {
        let sql = format!(
            "SELECT {} FROM documents
             WHERE COALESCE(published_at, scraped_at) >= ?1
             ORDER BY published_at IS NULL, published_at DESC, scraped_at DESC, id DESC
             LIMIT ?2",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(format_timestamp(cutoff))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        rows.iter().map(row_to_document).collect()
    }

    pub async fn list(
        &self,
        limit: usize,
        offset: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>, ApiError> {
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s.to_lowercase()));
        let source_type = filter
            .source_type
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let sql = format!(
            "SELECT {} FROM documents
             WHERE (?1 IS NULL OR source_type = ?1)
               AND (?2 IS NULL OR LOWER(title) LIKE ?2 OR LOWER(body) LIKE ?2)
             ORDER BY COALESCE(published_at, scraped_at) DESC, id DESC
             LIMIT ?3 OFFSET ?4",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(source_type)
            .bind(search)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        rows.iter().map(row_to_document).collect()
    }

    /// Documents needing vectors; with `force` every document qualifies.
    pub async fn pending_embedding(
        &self,
        force: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, ApiError> {
        let sql = format!(
            "SELECT {} FROM documents
             WHERE ?1 = 1 OR has_embedding = 0
             ORDER BY COALESCE(published_at, scraped_at) DESC, id DESC
             LIMIT ?2",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(force as i64)
            .bind(limit.map(|l| l as i64).unwrap_or(-1))
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        rows.iter().map(row_to_document).collect()
    }

    pub async fn mark_embedded(&self, id: i64, embedding_id: &str) -> Result<(), ApiError> {
        sqlx::query("UPDATE documents SET has_embedding = 1, embedding_id = ? WHERE id = ?")
            .bind(embedding_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(())
    }

    pub async fn clear_embedding(&self, id: i64) -> Result<(), ApiError> {
        sqlx::query("UPDATE documents SET has_embedding = 0, embedding_id = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(())
    }

    /// Deletes documents older than `cutoff` and returns their ids.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<i64>, ApiError> {
        let cutoff = format_timestamp(cutoff);
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        let ids: Vec<i64> = sqlx::query(
            "SELECT id FROM documents WHERE COALESCE(published_at, scraped_at) < ?",
        )
        .bind(&cutoff)
        .fetch_all(&mut *tx)
        .await
        .map_err(ApiError::internal)?
        .iter()
        .map(|row| row.get::<i64, _>("id"))
        .collect();

        sqlx::query("DELETE FROM documents WHERE COALESCE(published_at, scraped_at) < ?")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(ids)
    }

    pub async fn count(&self) -> Result<i64, ApiError> {
        sqlx::query("SELECT COUNT(*) AS total FROM documents")
            .fetch_one(&self.pool)
            .await
            .map(|row| row.get::<i64, _>("total"))
            .map_err(ApiError::internal)
    }

    pub async fn counts(&self, now: DateTime<Utc>) -> Result<CorpusCounts, ApiError> {
        let totals = sqlx::query(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(has_embedding), 0) AS embedded,
                    COALESCE(SUM(CASE WHEN scraped_at >= ? THEN 1 ELSE 0 END), 0) AS recent
             FROM documents",
        )
        .bind(format_timestamp(now - Duration::hours(24)))
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let rows = sqlx::query(
            "SELECT source_type, COUNT(*) AS total FROM documents GROUP BY source_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let by_source_type = rows
            .iter()
            .map(|row| (row.get::<String, _>("source_type"), row.get::<i64, _>("total")))
            .collect();

        Ok(CorpusCounts {
            total_documents: totals.get("total"),
            documents_with_embeddings: totals.get("embedded"),
            recent_24h: totals.get("recent"),
            by_source_type,
        })
    }
}

fn row_to_document(row: &SqliteRow) -> Result<Document, ApiError> {
    let published_at: Option<String> = row.try_get("published_at").map_err(ApiError::internal)?;
    let scraped_at: String = row.try_get("scraped_at").map_err(ApiError::internal)?;
    let tags: String = row.try_get("tags").map_err(ApiError::internal)?;
    let has_embedding: i64 = row.try_get("has_embedding").map_err(ApiError::internal)?;
    let relevance_score: f64 = row.try_get("relevance_score").map_err(ApiError::internal)?;

    Ok(Document {
        id: row.try_get("id").map_err(ApiError::internal)?,
        title: row.try_get("title").map_err(ApiError::internal)?,
        body: row.try_get("body").map_err(ApiError::internal)?,
        url: row.try_get("url").map_err(ApiError::internal)?,
        canonical_url: row.try_get("canonical_url").map_err(ApiError::internal)?,
        url_hash: row.try_get("url_hash").map_err(ApiError::internal)?,
        source: row.try_get("source").map_err(ApiError::internal)?,
        source_type: row.try_get("source_type").map_err(ApiError::internal)?,
        published_at: published_at.as_deref().and_then(parse_timestamp),
        scraped_at: parse_timestamp(&scraped_at).unwrap_or_else(Utc::now),
        author: row.try_get("author").map_err(ApiError::internal)?,
        relevance_score: relevance_score as f32,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        has_embedding: has_embedding != 0,
        embedding_id: row.try_get("embedding_id").map_err(ApiError::internal)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::canonical::{canonicalize, fingerprint};
    use crate::store::open_pool;

    async fn temp_store() -> DocumentStore {
        let db_path =
            std::env::temp_dir().join(format!("dcnews-documents-{}.db", uuid::Uuid::new_v4()));
        let pool = open_pool(&db_path).await.unwrap();
        DocumentStore::new(pool).await.unwrap()
    }

    fn new_doc(url: &str, title: &str, published_at: Option<DateTime<Utc>>) -> NewDocument {
        let canonical_url = canonicalize(url);
        NewDocument {
            title: title.to_string(),
            body: format!("{} body text", title),
            url: url.to_string(),
            url_hash: fingerprint(&canonical_url),
            canonical_url,
            source: "DCD".to_string(),
            source_type: "rss".to_string(),
            published_at,
            author: None,
            relevance_score: 6.0,
            tags: vec!["data-center".to_string()],
        }
    }

    #[tokio::test]
    async fn since_puts_undated_documents_last() {
        let store = temp_store().await;
        let old = store
            .insert(&new_doc("https://ex.com/old", "Old", Some(Utc::now() - Duration::days(10))))
            .await
            .unwrap();
        let undated = store
            .insert(&new_doc("https://ex.com/undated", "Undated", None))
            .await
            .unwrap();
        let fresh = store
            .insert(&new_doc("https://ex.com/fresh", "Fresh", Some(Utc::now() - Duration::hours(2))))
            .await
            .unwrap();
        let older = store
            .insert(&new_doc("https://ex.com/older", "Older", Some(Utc::now() - Duration::days(1))))
            .await
            .unwrap();

        let ids: Vec<i64> = store
            .since(Utc::now() - Duration::days(3), 10)
            .await
            .unwrap()
            .iter()
            .map(|d| d.id)
            .collect();

        assert_eq!(ids, vec![fresh, older, undated]);
        assert!(!ids.contains(&old));
    }

    #[tokio::test]
    async fn insert_and_read_back() {
        let store = temp_store().await;
        let published = Utc::now() - Duration::days(1);
        let id = store
            .insert(&new_doc("https://ex.com/a", "Data center A", Some(published)))
            .await
            .unwrap();

        let doc = store.get(id).await.unwrap().unwrap();
        assert_eq!(doc.title, "Data center A");
        assert_eq!(doc.tags, vec!["data-center".to_string()]);
        assert!(!doc.has_embedding);
        assert_eq!(
            doc.published_at.map(|p| p.timestamp()),
            Some(published.timestamp())
        );
        assert!(store.exists_by_hash(&doc.url_hash).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_hash_is_an_integrity_error() {
        let store = temp_store().await;
        store
            .insert(&new_doc("https://ex.com/a?utm_source=x", "A", None))
            .await
            .unwrap();
        let err = store
            .insert(&new_doc("https://ex.com/a?fbclid=1", "A again", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Integrity(_)));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn retention_deletes_only_old_documents() {
        let store = temp_store().await;
        let old = store
            .insert(&new_doc(
                "https://ex.com/old",
                "Old",
                Some(Utc::now() - Duration::days(400)),
            ))
            .await
            .unwrap();
        store
            .insert(&new_doc("https://ex.com/new", "New", Some(Utc::now())))
            .await
            .unwrap();

        let deleted = store
            .delete_older_than(Utc::now() - Duration::days(180))
            .await
            .unwrap();
        assert_eq!(deleted, vec![old]);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn embedding_flags_drive_pending_list() {
        let store = temp_store().await;
        let a = store
            .insert(&new_doc("https://ex.com/a", "A", None))
            .await
            .unwrap();
        store
            .insert(&new_doc("https://ex.com/b", "B", None))
            .await
            .unwrap();
        store.mark_embedded(a, "article_1_chunk_0").await.unwrap();

        let pending = store.pending_embedding(false, None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(store.pending_embedding(true, Some(10)).await.unwrap().len(), 2);

        let by_embedding = store
            .get_by_embedding_id("article_1_chunk_0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_embedding.id, a);

        let counts = store.counts(Utc::now()).await.unwrap();
        assert_eq!(counts.total_documents, 2);
        assert_eq!(counts.documents_with_embeddings, 1);
        assert_eq!(counts.by_source_type.get("rss"), Some(&2));
    }

    #[tokio::test]
    async fn list_filters_by_search_and_source_type() {
        let store = temp_store().await;
        store
            .insert(&new_doc("https://ex.com/a", "Liquid cooling retrofit", None))
            .await
            .unwrap();
        store
            .insert(&new_doc("https://ex.com/b", "Substation approved", None))
            .await
            .unwrap();

        let filter = DocumentFilter {
            source_type: Some("rss".to_string()),
            search: Some("COOLING".to_string()),
        };
        let docs = store.list(10, 0, &filter).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "Liquid cooling retrofit");
    }
}
