//! In-process vector index: SQLite rows plus brute-force cosine search.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use super::{VectorHit, VectorIndex, VectorRecord};
use crate::core::errors::ApiError;
use crate::retrieval::vector_math::{cosine_similarity, decode_embedding, encode_embedding};

#[derive(Clone)]
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub async fn new(pool: SqlitePool) -> Result<Self, ApiError> {
        let index = Self { pool };
        index.init_schema().await?;
        Ok(index)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS vectors (
                id TEXT PRIMARY KEY,
                article_id INTEGER,
                metadata TEXT NOT NULL DEFAULT '{}',
                document TEXT,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%SZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_article_id ON vectors(article_id)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(())
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), ApiError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        for record in &records {
            if record.embedding.is_empty() {
                continue;
            }
            let metadata = serde_json::to_string(&record.metadata).map_err(ApiError::internal)?;
            let article_id = record.metadata.get("article_id").and_then(Value::as_i64);

            sqlx::query(
                "INSERT OR REPLACE INTO vectors (id, article_id, metadata, document, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&record.id)
            .bind(article_id)
            .bind(&metadata)
            .bind(&record.document)
            .bind(encode_embedding(&record.embedding))
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        }

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>, ApiError> {
        if vector.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT id, metadata, document, embedding FROM vectors")
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        let mut hits: Vec<VectorHit> = rows
            .iter()
            .filter_map(|row| {
                let bytes: Vec<u8> = row.get("embedding");
                let stored = decode_embedding(&bytes);
                // Vectors from a different embedding model are skipped, not fatal.
                let similarity = cosine_similarity(vector, &stored).ok()?;
                let metadata: String = row.get("metadata");
                Some(VectorHit {
                    id: row.get("id"),
                    metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
                    distance: 1.0 - similarity,
                    document: row.get("document"),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete_for_article(&self, article_id: i64) -> Result<usize, ApiError> {
        let result = sqlx::query("DELETE FROM vectors WHERE article_id = ?1")
            .bind(article_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self) -> Result<usize, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(count.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::chunk_vector_id;
    use crate::store::open_pool;
    use serde_json::json;

    async fn temp_index() -> SqliteVectorIndex {
        let db_path =
            std::env::temp_dir().join(format!("dcnews-vectors-{}.db", uuid::Uuid::new_v4()));
        let pool = open_pool(&db_path).await.unwrap();
        SqliteVectorIndex::new(pool).await.unwrap()
    }

    fn record(article_id: i64, chunk: usize, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: chunk_vector_id(article_id, chunk),
            embedding,
            metadata: json!({ "article_id": article_id, "chunk_index": chunk }),
            document: Some(format!("chunk {chunk} of {article_id}")),
        }
    }

    #[tokio::test]
    async fn empty_index_returns_no_hits() {
        let index = temp_index().await;
        assert!(index.query(&[1.0, 0.0], 5).await.unwrap().is_empty());
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn query_orders_by_distance() {
        let index = temp_index().await;
        index
            .upsert(vec![
                record(1, 0, vec![0.0, 1.0]),
                record(2, 0, vec![1.0, 0.0]),
                record(3, 0, vec![0.7, 0.7]),
            ])
            .await
            .unwrap();

        let hits = index.query(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "article_2_chunk_0");
        assert!(hits[0].distance.abs() < 1e-5);
        assert_eq!(hits[1].id, "article_3_chunk_0");
        assert_eq!(hits[0].metadata["article_id"], 2);
    }

    #[tokio::test]
    async fn upsert_replaces_and_delete_removes_all_chunks() {
        let index = temp_index().await;
        index
            .upsert(vec![record(1, 0, vec![1.0, 0.0]), record(1, 1, vec![0.0, 1.0])])
            .await
            .unwrap();
        index.upsert(vec![record(1, 0, vec![0.5, 0.5])]).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 2);

        assert_eq!(index.delete_for_article(1).await.unwrap(), 2);
        assert_eq!(index.count().await.unwrap(), 0);
    }
}
