use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "embeddings": state.providers.embedder.is_available(),
        "synthesis": state.providers.synthesizer.is_available(),
    }))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let counts = state.documents.counts(Utc::now()).await?;
    let vectors = state.index.count().await?;
    let usage = state.budget.snapshot().await?;
    Ok(Json(json!({
        "total_documents": counts.total_documents,
        "documents_with_embeddings": counts.documents_with_embeddings,
        "recent_24h": counts.recent_24h,
        "by_source_type": counts.by_source_type,
        "vector_count": vectors,
        "usage": usage,
        "embedding_provider": state.providers.embedder.name(),
        "synthesis_provider": state.providers.synthesizer.name(),
    })))
}
