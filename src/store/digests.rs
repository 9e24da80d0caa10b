use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{format_timestamp, parse_timestamp};
use crate::core::errors::ApiError;

/// A generated digest keyed by `(date, audience, window_days)`.
///
/// `window_days` is the window the caller asked for, not the widened one;
/// `sources` and `meta` are stored as JSON and typed by the digest service.
#[derive(Debug, Clone, PartialEq)]
pub struct DigestRecord {
    pub date: String,
    pub audience: String,
    pub window_days: i64,
    pub title: String,
    pub content_md: String,
    pub sources: Value,
    pub meta: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DigestStore {
    pool: SqlitePool,
}

impl DigestStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS digests (
                date TEXT NOT NULL,
                audience TEXT NOT NULL,
                window_days INTEGER NOT NULL,
                title TEXT NOT NULL,
                content_md TEXT NOT NULL,
                sources_json TEXT NOT NULL DEFAULT '[]',
                meta_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                PRIMARY KEY (date, audience, window_days)
            )",
        )
        .execute(&pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(Self { pool })
    }

    pub async fn find(
        &self,
        date: &str,
        audience: &str,
        window_days: i64,
    ) -> Result<Option<DigestRecord>, ApiError> {
        let row = sqlx::query(
            "SELECT date, audience, window_days, title, content_md, sources_json, meta_json, created_at
             FROM digests WHERE date = ?1 AND audience = ?2 AND window_days = ?3",
        )
        .bind(date)
        .bind(audience)
        .bind(window_days)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        row.as_ref().map(row_to_record).transpose()
    }

    /// Inserts or replaces the digest for its key.
    pub async fn save(&self, record: &DigestRecord) -> Result<(), ApiError> {
        let sources = serde_json::to_string(&record.sources).map_err(ApiError::internal)?;
        let meta = serde_json::to_string(&record.meta).map_err(ApiError::internal)?;
        sqlx::query(
            "INSERT INTO digests (date, audience, window_days, title, content_md, sources_json, meta_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(date, audience, window_days) DO UPDATE SET
                title = excluded.title,
                content_md = excluded.content_md,
                sources_json = excluded.sources_json,
                meta_json = excluded.meta_json,
                created_at = excluded.created_at",
        )
        .bind(&record.date)
        .bind(&record.audience)
        .bind(record.window_days)
        .bind(&record.title)
        .bind(&record.content_md)
        .bind(sources)
        .bind(meta)
        .bind(format_timestamp(record.created_at))
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;
        Ok(())
    }
}

fn row_to_record(row: &SqliteRow) -> Result<DigestRecord, ApiError> {
    let sources: String = row.get("sources_json");
    let meta: String = row.get("meta_json");
    let created_at: String = row.get("created_at");
    Ok(DigestRecord {
        date: row.get("date"),
        audience: row.get("audience"),
        window_days: row.get("window_days"),
        title: row.get("title"),
        content_md: row.get("content_md"),
        sources: serde_json::from_str(&sources).map_err(ApiError::internal)?,
        meta: serde_json::from_str(&meta).map_err(ApiError::internal)?,
        created_at: parse_timestamp(&created_at)
            .ok_or_else(|| ApiError::Integrity(format!("bad digest timestamp '{}'", created_at)))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_pool;
    use serde_json::json;

    async fn temp_store() -> DigestStore {
        let db_path =
            std::env::temp_dir().join(format!("dcnews-digests-{}.db", uuid::Uuid::new_v4()));
        let pool = open_pool(&db_path).await.unwrap();
        DigestStore::new(pool).await.unwrap()
    }

    fn record(window_days: i64, content: &str) -> DigestRecord {
        DigestRecord {
            date: "2026-10-10".to_string(),
            audience: "data center real estate".to_string(),
            window_days,
            title: "Digest".to_string(),
            content_md: content.to_string(),
            sources: json!([{ "index": 1, "title": "Ashburn" }]),
            meta: json!({ "window_days": 7, "coverage_thin": true }),
            created_at: DateTime::parse_from_rfc3339("2026-10-10T08:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[tokio::test]
    async fn digests_are_keyed_by_requested_window() {
        let store = temp_store().await;
        store.save(&record(1, "one day")).await.unwrap();
        store.save(&record(3, "three days")).await.unwrap();

        let one = store
            .find("2026-10-10", "data center real estate", 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(one, record(1, "one day"));
        assert!(store
            .find("2026-10-10", "data center real estate", 2)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn save_replaces_the_existing_digest() {
        let store = temp_store().await;
        store.save(&record(1, "first")).await.unwrap();
        store.save(&record(1, "second")).await.unwrap();

        let found = store
            .find("2026-10-10", "data center real estate", 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.content_md, "second");
    }
}
