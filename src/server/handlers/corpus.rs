use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::ingest::RawDocument;
use crate::state::AppState;
use crate::store::documents::DocumentFilter;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 200;

/// Accepts either `{"documents": [...]}` or a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IngestPayload {
    Wrapped { documents: Vec<RawDocument> },
    Bare(Vec<RawDocument>),
}

impl IngestPayload {
    fn into_documents(self) -> Vec<RawDocument> {
        match self {
            IngestPayload::Wrapped { documents } => documents,
            IngestPayload::Bare(documents) => documents,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RetentionRequest {
    #[serde(default)]
    pub max_age_days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ArticleQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub source_type: Option<String>,
    pub search: Option<String>,
}

pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<IngestPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let documents = payload.into_documents();
    if documents.is_empty() {
        return Err(ApiError::Validation("No documents supplied".to_string()));
    }
    let report = state.ingest.ingest(documents).await;
    Ok(Json(report))
}

pub async fn retention_sweep(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<RetentionRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = payload.map(|Json(inner)| inner).unwrap_or_default();
    let max_age_days = match request.max_age_days {
        Some(days) if days < 1 => {
            return Err(ApiError::Validation(
                "max_age_days must be at least 1".to_string(),
            ))
        }
        Some(days) => days,
        None => state.ingest.default_retention_days(),
    };
    let report = state.ingest.retention_sweep(max_age_days).await?;
    Ok(Json(report))
}

pub async fn list_articles(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ArticleQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);
    let filter = DocumentFilter {
        source_type: query.source_type,
        search: query.search,
    };
    let articles = state.documents.list(limit, offset, &filter).await?;
    Ok(Json(json!({
        "articles": articles,
        "limit": limit,
        "offset": offset,
    })))
}

pub async fn get_article(
    State(state): State<Arc<AppState>>,
    Path(article_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let article = state
        .documents
        .get(article_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Article not found".to_string()))?;
    Ok(Json(json!({ "article": article })))
}
