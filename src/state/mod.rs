use std::sync::Arc;

use crate::chat::{MeteredEmbedder, Orchestrator, UsageBudget};
use crate::core::config::{AppPaths, ConfigService, Settings};
use crate::digest::{DigestService, StoryService};
use crate::index::{SqliteVectorIndex, VectorIndex};
use crate::ingest::{IngestService, RelevanceGate, RelevanceVocabulary};
use crate::jobs::{JobRegistry, Reindexer};
use crate::llm::{EmbeddingProvider, Providers};
use crate::memory::MemoryManager;
use crate::retrieval::{CandidateRetriever, RetrieverConfig};
use crate::store::{
    open_pool, ConversationStore, DigestStore, DocumentStore, StorySummaryStore, UsageStore,
};

pub mod error;

pub use error::InitializationError;

/// Shared application state handed to every route and background task.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub settings: Arc<Settings>,
    pub documents: DocumentStore,
    pub conversations: ConversationStore,
    pub index: Arc<dyn VectorIndex>,
    pub providers: Providers,
    pub budget: UsageBudget,
    pub ingest: IngestService,
    pub memory: MemoryManager,
    pub orchestrator: Orchestrator,
    pub digest: DigestService,
    pub stories: StoryService,
    pub reindexer: Reindexer,
}

impl AppState {
    /// Resolves paths, loads configuration and providers, then wires the services.
    pub async fn initialize() -> Result<Arc<Self>, InitializationError> {
        let paths = Arc::new(AppPaths::new());
        let config = ConfigService::new(paths.clone());
        let settings = config
            .load_settings()
            .map_err(|e| InitializationError::Config(e.into()))?;
        let providers =
            Providers::from_settings(&settings).map_err(|e| InitializationError::Llm(e.into()))?;

        Self::with_parts(paths, settings, providers).await
    }

    /// Builds state from explicit parts; used by `initialize` and by tests
    /// that substitute providers.
    pub async fn with_parts(
        paths: Arc<AppPaths>,
        settings: Settings,
        providers: Providers,
    ) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        let pool = open_pool(&paths.db_path)
            .await
            .map_err(|e| InitializationError::Database(e.into()))?;

        let documents = DocumentStore::new(pool.clone())
            .await
            .map_err(|e| InitializationError::Database(e.into()))?;
        let conversations = ConversationStore::new(pool.clone())
            .await
            .map_err(|e| InitializationError::Database(e.into()))?;
        let usage = UsageStore::new(pool.clone())
            .await
            .map_err(|e| InitializationError::Database(e.into()))?;
        let digests = DigestStore::new(pool.clone())
            .await
            .map_err(|e| InitializationError::Database(e.into()))?;
        let summaries = StorySummaryStore::new(pool.clone())
            .await
            .map_err(|e| InitializationError::Database(e.into()))?;
        let index: Arc<dyn VectorIndex> = Arc::new(
            SqliteVectorIndex::new(pool)
                .await
                .map_err(|e| InitializationError::Index(e.into()))?,
        );

        let vocabulary = RelevanceVocabulary::load(settings.relevance.vocabulary_path.as_deref());
        let gate = Arc::new(RelevanceGate::new(vocabulary));
        let budget = UsageBudget::new(usage, settings.budget.daily_token_limit);
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(MeteredEmbedder::new(
            providers.embedder.clone(),
            budget.clone(),
        ));

        let retriever = CandidateRetriever::new(
            documents.clone(),
            index.clone(),
            embedder.clone(),
            gate.clone(),
            RetrieverConfig::from(&settings.retrieval),
        );
        let ingest = IngestService::new(
            documents.clone(),
            index.clone(),
            gate,
            settings.ingest.clone(),
        );
        let memory = MemoryManager::new(
            conversations.clone(),
            providers.synthesizer.clone(),
            budget.clone(),
            settings.memory.clone(),
        );
        let orchestrator = Orchestrator::new(
            retriever.clone(),
            memory.clone(),
            providers.synthesizer.clone(),
            budget.clone(),
            settings.retrieval.clone(),
            settings.llm.clone(),
        );
        let digest = DigestService::new(
            documents.clone(),
            digests,
            retriever,
            providers.synthesizer.clone(),
            budget.clone(),
            settings.retrieval.snippet_chars,
        );
        let stories = StoryService::new(
            documents.clone(),
            summaries,
            providers.synthesizer.clone(),
            budget.clone(),
            settings.llm.chat_model.clone(),
            settings.retrieval.snippet_chars,
        );
        let reindexer = Reindexer::new(
            documents.clone(),
            index.clone(),
            embedder,
            JobRegistry::new(),
        );

        tracing::info!(
            "State ready (db: {}, embeddings: {}, synthesis: {})",
            paths.db_path.display(),
            providers.embedder.name(),
            providers.synthesizer.name()
        );

        Ok(Arc::new(AppState {
            paths,
            config,
            settings: Arc::new(settings),
            documents,
            conversations,
            index,
            providers,
            budget,
            ingest,
            memory,
            orchestrator,
            digest,
            stories,
            reindexer,
        }))
    }
}
