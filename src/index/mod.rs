//! Nearest-neighbour index over document chunk embeddings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::ApiError;

pub mod sqlite;

pub use sqlite::SqliteVectorIndex;

/// One vector to store. `metadata` is free-form; readers validate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: Value,
    pub document: Option<String>,
}

/// A query hit. `distance` is cosine distance (0 = identical).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub metadata: Value,
    pub distance: f32,
    pub document: Option<String>,
}

/// Vector id for one chunk of a document.
pub fn chunk_vector_id(article_id: i64, chunk_index: usize) -> String {
    format!("article_{}_chunk_{}", article_id, chunk_index)
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace vectors by id.
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), ApiError>;

    /// Top-`k` nearest vectors. An empty index yields an empty list.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>, ApiError>;

    /// Remove every vector belonging to a document.
    async fn delete_for_article(&self, article_id: i64) -> Result<usize, ApiError>;

    async fn count(&self) -> Result<usize, ApiError>;
}
