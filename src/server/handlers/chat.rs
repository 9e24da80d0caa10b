use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::chat::ChatRequest;
use crate::core::errors::ApiError;
use crate::state::AppState;

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state.orchestrator.chat(payload).await?;
    Ok(Json(response))
}

pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .conversations
        .get(&conversation_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Conversation not found".to_string()))?;

    let messages = state.conversations.messages(&conversation_id).await?;
    let message_payload: Vec<Value> = messages
        .into_iter()
        .map(|msg| {
            json!({
                "role": msg.role,
                "content": msg.content,
                "created_at": msg.created_at,
            })
        })
        .collect();

    Ok(Json(json!({
        "conversation": conversation,
        "messages": message_payload,
    })))
}
