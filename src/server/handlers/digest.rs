use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::digest::{DigestRequest, StoryQuery};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SummaryRequest {
    #[serde(default)]
    pub force: bool,
}

pub async fn generate_digest(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<DigestRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = payload.map(|Json(inner)| inner).unwrap_or_default();
    let digest = state.digest.get_or_create(request).await?;
    Ok(Json(digest))
}

pub async fn list_stories(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let stories = state.stories.list(query).await?;
    Ok(Json(json!({ "count": stories.len(), "stories": stories })))
}

pub async fn summarize_story(
    State(state): State<Arc<AppState>>,
    Path(article_id): Path<i64>,
    payload: Option<Json<SummaryRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = payload.map(|Json(inner)| inner).unwrap_or_default();
    let summary = state.stories.summarize(article_id, request.force).await?;
    Ok(Json(summary))
}
