use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[source] anyhow::Error),

    #[error("Failed to open database: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Failed to initialize vector index: {0}")]
    Index(#[source] anyhow::Error),

    #[error("Failed to initialize LLM providers: {0}")]
    Llm(#[source] anyhow::Error),
}
