//! Background reindex jobs with pollable status.
//!
//! Each job is a value in the `JobRegistry`; the worker task updates its own
//! entry and callers poll by id. Only one reindex runs at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::errors::ApiError;
use crate::index::{chunk_vector_id, VectorIndex, VectorRecord};
use crate::ingest::chunker::{split_into_chunks, ChunkConfig};
use crate::llm::EmbeddingProvider;
use crate::store::{Document, DocumentStore};

pub const DEFAULT_BATCH_SIZE: usize = 16;
const MAX_BATCH_SIZE: usize = 128;
/// Finished jobs kept for polling.
const MAX_FINISHED_JOBS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_finished(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    pub kind: String,
    pub state: JobState,
    pub total: usize,
    pub processed: usize,
    pub embedded: usize,
    pub failed: usize,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobStatus {
    fn new(kind: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            state: JobState::Queued,
            total: 0,
            processed: 0,
            embedded: 0,
            failed: 0,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReindexRequest {
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<String, JobStatus>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Result<Option<JobStatus>, ApiError> {
        let guard = self.jobs.lock().map_err(ApiError::internal)?;
        Ok(guard.get(id).cloned())
    }

    pub fn running(&self, kind: &str) -> Result<Option<JobStatus>, ApiError> {
        let guard = self.jobs.lock().map_err(ApiError::internal)?;
        Ok(guard
            .values()
            .find(|job| job.kind == kind && !job.state.is_finished())
            .cloned())
    }

    fn insert(&self, status: JobStatus) -> Result<(), ApiError> {
        let mut guard = self.jobs.lock().map_err(ApiError::internal)?;
        let mut finished: Vec<(DateTime<Utc>, String)> = guard
            .values()
            .filter(|job| job.state.is_finished())
            .map(|job| (job.created_at, job.id.clone()))
            .collect();
        if finished.len() >= MAX_FINISHED_JOBS {
            finished.sort();
            for (_, id) in finished.iter().take(finished.len() + 1 - MAX_FINISHED_JOBS) {
                guard.remove(id);
            }
        }
        guard.insert(status.id.clone(), status);
        Ok(())
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut JobStatus)) {
        match self.jobs.lock() {
            Ok(mut guard) => {
                if let Some(job) = guard.get_mut(id) {
                    apply(job);
                }
            }
            Err(err) => tracing::error!("Job registry lock poisoned: {}", err),
        }
    }
}

/// Embeds document chunks into the vector index.
#[derive(Clone)]
pub struct Reindexer {
    documents: DocumentStore,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    registry: JobRegistry,
    chunking: ChunkConfig,
    start_lock: Arc<Mutex<()>>,
}

pub const REINDEX_KIND: &str = "reindex";

impl Reindexer {
    pub fn new(
        documents: DocumentStore,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        registry: JobRegistry,
    ) -> Self {
        Self {
            documents,
            index,
            embedder,
            registry,
            chunking: ChunkConfig::default(),
            start_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Queues a reindex on a background task and returns its initial status.
    /// While one is running, the running job is returned instead.
    pub fn start(&self, request: ReindexRequest) -> Result<JobStatus, ApiError> {
        let status = {
            let _guard = self.start_lock.lock().map_err(ApiError::internal)?;
            if let Some(running) = self.registry.running(REINDEX_KIND)? {
                tracing::info!("Reindex {} already running; not starting another", running.id);
                return Ok(running);
            }
            self.admit()?
        };

        let worker = self.clone();
        let job_id = status.id.clone();
        tokio::spawn(async move {
            worker.run(&job_id, request).await;
        });
        Ok(status)
    }

    /// Runs a reindex on the current task and returns the final status.
    pub async fn run_now(&self, request: ReindexRequest) -> Result<JobStatus, ApiError> {
        let status = {
            let _guard = self.start_lock.lock().map_err(ApiError::internal)?;
            if let Some(running) = self.registry.running(REINDEX_KIND)? {
                return Ok(running);
            }
            self.admit()?
        };
        self.run(&status.id, request).await;
        self.registry
            .get(&status.id)?
            .ok_or_else(|| ApiError::NotFound(format!("job {}", status.id)))
    }

    fn admit(&self) -> Result<JobStatus, ApiError> {
        if !self.embedder.is_available() {
            return Err(ApiError::ProviderUnavailable(
                "No embedding endpoint configured".to_string(),
            ));
        }
        let status = JobStatus::new(REINDEX_KIND);
        self.registry.insert(status.clone())?;
        Ok(status)
    }

    async fn run(&self, job_id: &str, request: ReindexRequest) {
        self.registry.update(job_id, |job| job.state = JobState::Running);
        tracing::info!(
            "Reindex {} started (force: {}, limit: {:?})",
            job_id,
            request.force,
            request.limit
        );

        match self.reindex(job_id, &request).await {
            Ok(()) => {
                self.registry.update(job_id, |job| {
                    job.state = JobState::Completed;
                    job.finished_at = Some(Utc::now());
                });
                if let Ok(Some(job)) = self.registry.get(job_id) {
                    tracing::info!(
                        "Reindex {} completed: {} processed, {} embedded, {} failed",
                        job_id,
                        job.processed,
                        job.embedded,
                        job.failed
                    );
                }
            }
            Err(err) => {
                tracing::error!("Reindex {} failed: {}", job_id, err);
                self.registry.update(job_id, |job| {
                    job.state = JobState::Failed;
                    job.error = Some(err.to_string());
                    job.finished_at = Some(Utc::now());
                });
            }
        }
    }

    async fn reindex(&self, job_id: &str, request: &ReindexRequest) -> Result<(), ApiError> {
        let documents = self
            .documents
            .pending_embedding(request.force, request.limit)
            .await?;
        let total = documents.len();
        self.registry.update(job_id, |job| job.total = total);

        let batch_size = request
            .batch_size
            .unwrap_or(DEFAULT_BATCH_SIZE)
            .clamp(1, MAX_BATCH_SIZE);

        for batch in documents.chunks(batch_size) {
            let (embedded, failed) = self.embed_batch(batch, request.force).await;
            self.registry.update(job_id, |job| {
                job.processed += batch.len();
                job.embedded += embedded;
                job.failed += failed;
            });
        }
        Ok(())
    }

    /// Returns (embedded, failed) document counts for one batch.
    async fn embed_batch(&self, batch: &[Document], force: bool) -> (usize, usize) {
        let chunked: Vec<Vec<String>> = batch.iter().map(|doc| self.chunks_for(doc)).collect();
        let texts: Vec<String> = chunked.iter().flatten().cloned().collect();

        let vectors = match self.embedder.embed_batch(&texts).await {
            Ok(vectors) if vectors.len() == texts.len() => vectors,
            Ok(vectors) => {
                tracing::warn!(
                    "Embedding batch returned {} vectors for {} inputs",
                    vectors.len(),
                    texts.len()
                );
                return (0, batch.len());
            }
            Err(err) => {
                tracing::warn!("Embedding batch failed: {}", err);
                return (0, batch.len());
            }
        };

        let mut embedded = 0;
        let mut failed = 0;
        let mut offset = 0;
        for (doc, chunks) in batch.iter().zip(&chunked) {
            let doc_vectors = &vectors[offset..offset + chunks.len()];
            offset += chunks.len();

            let records: Vec<VectorRecord> = chunks
                .iter()
                .zip(doc_vectors)
                .enumerate()
                .filter_map(|(chunk_index, (chunk, vector))| {
                    let vector = vector.as_ref()?;
                    Some(VectorRecord {
                        id: chunk_vector_id(doc.id, chunk_index),
                        embedding: vector.clone(),
                        metadata: json!({
                            "article_id": doc.id,
                            "chunk_index": chunk_index,
                            "title": doc.title,
                            "url": doc.url,
                            "source": doc.source,
                        }),
                        document: Some(chunk.clone()),
                    })
                })
                .collect();

            match self.store_vectors(doc, records, force).await {
                Ok(true) => embedded += 1,
                Ok(false) => failed += 1,
                Err(err) => {
                    tracing::warn!("Failed to store vectors for document {}: {}", doc.id, err);
                    failed += 1;
                }
            }
        }
        (embedded, failed)
    }

    async fn store_vectors(
        &self,
        doc: &Document,
        records: Vec<VectorRecord>,
        force: bool,
    ) -> Result<bool, ApiError> {
        let Some(first_id) = records.first().map(|r| r.id.clone()) else {
            return Ok(false);
        };
        if force {
            self.index.delete_for_article(doc.id).await?;
        }
        if let Err(err) = self.index.upsert(records).await {
            if force {
                self.documents.clear_embedding(doc.id).await?;
            }
            return Err(err);
        }
        self.documents.mark_embedded(doc.id, &first_id).await?;
        Ok(true)
    }

    fn chunks_for(&self, doc: &Document) -> Vec<String> {
        let text = format!("{}\n\n{}", doc.title.trim(), doc.body.trim());
        let chunks = split_into_chunks(&text, &self.chunking);
        if chunks.is_empty() {
            vec![doc.title.trim().to_string()]
        } else {
            chunks
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SqliteVectorIndex;
    use crate::store::{open_pool, NewDocument};
    use async_trait::async_trait;

    struct LengthEmbedder;

    #[async_trait]
    impl EmbeddingProvider for LengthEmbedder {
        fn name(&self) -> &str {
            "length"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
            if text.contains("unembeddable") {
                return Err(ApiError::ProviderUnavailable("rejected".into()));
            }
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    async fn setup() -> (Reindexer, DocumentStore, Arc<SqliteVectorIndex>) {
        let path = std::env::temp_dir().join(format!("dcnews-jobs-{}.db", uuid::Uuid::new_v4()));
        let pool = open_pool(&path).await.unwrap();
        let documents = DocumentStore::new(pool.clone()).await.unwrap();
        let index = Arc::new(SqliteVectorIndex::new(pool).await.unwrap());
        let reindexer = Reindexer::new(
            documents.clone(),
            index.clone(),
            Arc::new(LengthEmbedder),
            JobRegistry::new(),
        );
        (reindexer, documents, index)
    }

    async fn insert(documents: &DocumentStore, id: &str, title: &str, body: &str) -> i64 {
        documents
            .insert(&NewDocument {
                title: title.to_string(),
                body: body.to_string(),
                url: format!("https://ex.com/{id}"),
                canonical_url: format!("https://ex.com/{id}"),
                url_hash: format!("hash-{id}"),
                source: "DCD".to_string(),
                source_type: "rss".to_string(),
                published_at: Some(Utc::now()),
                author: None,
                relevance_score: 6.0,
                tags: Vec::new(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn reindex_embeds_chunks_and_marks_documents() {
        let (reindexer, documents, index) = setup().await;
        let long_body = "Hyperscale campus news. ".repeat(120);
        let a = insert(&documents, "a", "Campus A", &long_body).await;
        insert(&documents, "b", "Campus B", "Short body").await;

        let status = reindexer.run_now(ReindexRequest::default()).await.unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.processed, 2);
        assert_eq!(status.embedded, 2);
        assert_eq!(status.failed, 0);

        let doc = documents.get(a).await.unwrap().unwrap();
        assert!(doc.has_embedding);
        assert_eq!(doc.embedding_id.as_deref(), Some(chunk_vector_id(a, 0).as_str()));
        assert!(index.count().await.unwrap() > 2);

        let again = reindexer.run_now(ReindexRequest::default()).await.unwrap();
        assert_eq!(again.processed, 0);
    }

    #[tokio::test]
    async fn per_document_failures_are_counted() {
        let (reindexer, documents, _) = setup().await;
        insert(&documents, "a", "Good campus", "Body").await;
        insert(&documents, "b", "unembeddable", "unembeddable").await;

        let status = reindexer
            .run_now(ReindexRequest {
                batch_size: Some(1),
                ..ReindexRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(status.embedded, 1);
        assert_eq!(status.failed, 1);
        assert_eq!(status.state, JobState::Completed);
    }

    #[tokio::test]
    async fn force_replaces_existing_vectors() {
        let (reindexer, documents, index) = setup().await;
        insert(&documents, "a", "Campus", "Body").await;
        reindexer.run_now(ReindexRequest::default()).await.unwrap();
        let before = index.count().await.unwrap();

        let status = reindexer
            .run_now(ReindexRequest {
                force: true,
                ..ReindexRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(status.embedded, 1);
        assert_eq!(index.count().await.unwrap(), before);
    }

    #[tokio::test]
    async fn background_job_is_pollable() {
        let (reindexer, documents, _) = setup().await;
        insert(&documents, "a", "Campus", "Body").await;

        let queued = reindexer.start(ReindexRequest::default()).unwrap();
        let mut status = queued.clone();
        for _ in 0..100 {
            status = reindexer.registry().get(&queued.id).unwrap().unwrap();
            if status.state.is_finished() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.embedded, 1);
    }
}
