use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use super::{format_timestamp, parse_timestamp};
use crate::core::errors::ApiError;

/// Stored per-article analyst summary. One row per document.
#[derive(Debug, Clone, PartialEq)]
pub struct StorySummaryRecord {
    pub article_id: i64,
    pub summary_md: String,
    pub key_facts: Value,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct StorySummaryStore {
    pool: SqlitePool,
}

impl StorySummaryStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS story_summaries (
                article_id INTEGER PRIMARY KEY REFERENCES documents(id) ON DELETE CASCADE,
                summary_md TEXT NOT NULL,
                key_facts_json TEXT NOT NULL DEFAULT '{}',
                model TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(Self { pool })
    }

    pub async fn get(&self, article_id: i64) -> Result<Option<StorySummaryRecord>, ApiError> {
        let row = sqlx::query(
            "SELECT article_id, summary_md, key_facts_json, model, created_at
             FROM story_summaries WHERE article_id = ?",
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        row.as_ref().map(row_to_record).transpose()
    }

    pub async fn get_many(
        &self,
        article_ids: &[i64],
    ) -> Result<HashMap<i64, StorySummaryRecord>, ApiError> {
        if article_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT article_id, summary_md, key_facts_json, model, created_at
             FROM story_summaries WHERE article_id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in article_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        rows.iter()
            .map(|row| row_to_record(row).map(|record| (record.article_id, record)))
            .collect()
    }

    pub async fn upsert(&self, record: &StorySummaryRecord) -> Result<(), ApiError> {
        let key_facts = serde_json::to_string(&record.key_facts).map_err(ApiError::internal)?;
        sqlx::query(
            "INSERT INTO story_summaries (article_id, summary_md, key_facts_json, model, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(article_id) DO UPDATE SET
                summary_md = excluded.summary_md,
                key_facts_json = excluded.key_facts_json,
                model = excluded.model,
                created_at = excluded.created_at",
        )
        .bind(record.article_id)
        .bind(&record.summary_md)
        .bind(key_facts)
        .bind(&record.model)
        .bind(format_timestamp(record.created_at))
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;
        Ok(())
    }
}

fn row_to_record(row: &SqliteRow) -> Result<StorySummaryRecord, ApiError> {
    let key_facts: String = row.get("key_facts_json");
    let created_at: String = row.get("created_at");
    Ok(StorySummaryRecord {
        article_id: row.get("article_id"),
        summary_md: row.get("summary_md"),
        key_facts: serde_json::from_str(&key_facts).unwrap_or(Value::Null),
        model: row.get("model"),
        created_at: parse_timestamp(&created_at).ok_or_else(|| {
            ApiError::Integrity(format!("bad summary timestamp '{}'", created_at))
        })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::canonical::{canonicalize, fingerprint};
    use crate::store::{open_pool, DocumentStore, NewDocument};
    use serde_json::json;

    async fn stores() -> (DocumentStore, StorySummaryStore) {
        let db_path =
            std::env::temp_dir().join(format!("dcnews-summaries-{}.db", uuid::Uuid::new_v4()));
        let pool = open_pool(&db_path).await.unwrap();
        (
            DocumentStore::new(pool.clone()).await.unwrap(),
            StorySummaryStore::new(pool).await.unwrap(),
        )
    }

    async fn insert_doc(documents: &DocumentStore, url: &str) -> i64 {
        let canonical_url = canonicalize(url);
        documents
            .insert(&NewDocument {
                title: "Ashburn data center".to_string(),
                body: "Body".to_string(),
                url: url.to_string(),
                url_hash: fingerprint(&canonical_url),
                canonical_url,
                source: "DCD".to_string(),
                source_type: "rss".to_string(),
                published_at: None,
                author: None,
                relevance_score: 6.0,
                tags: Vec::new(),
            })
            .await
            .unwrap()
    }

    fn summary(article_id: i64, text: &str) -> StorySummaryRecord {
        StorySummaryRecord {
            article_id,
            summary_md: text.to_string(),
            key_facts: json!({ "mw": "300" }),
            model: "test-model".to_string(),
            created_at: DateTime::parse_from_rfc3339("2026-10-10T08:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_and_get_many_skips_missing() {
        let (documents, summaries) = stores().await;
        let a = insert_doc(&documents, "https://ex.com/a").await;
        let b = insert_doc(&documents, "https://ex.com/b").await;

        summaries.upsert(&summary(a, "- first")).await.unwrap();
        summaries.upsert(&summary(a, "- second")).await.unwrap();

        assert_eq!(summaries.get(a).await.unwrap().unwrap().summary_md, "- second");
        assert!(summaries.get(b).await.unwrap().is_none());

        let many = summaries.get_many(&[a, b]).await.unwrap();
        assert_eq!(many.len(), 1);
        assert_eq!(many[&a].key_facts, json!({ "mw": "300" }));
        assert!(summaries.get_many(&[]).await.unwrap().is_empty());
    }
}
