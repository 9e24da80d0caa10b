use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::core::errors::ApiError;
use crate::jobs::ReindexRequest;
use crate::state::AppState;

pub async fn start_reindex(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<ReindexRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = payload.map(|Json(inner)| inner).unwrap_or_default();
    let job = state.reindexer.start(request)?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .reindexer
        .registry()
        .get(&job_id)?
        .ok_or_else(|| ApiError::NotFound("Job not found".to_string()))?;
    Ok(Json(job))
}
