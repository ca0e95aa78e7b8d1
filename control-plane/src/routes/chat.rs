use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::StreamExt;

use super::{chunk_events, decode_json, ApiError};
use crate::error::ControlError;
use crate::models::openai::{into_completion, OpenAiChatRequest};
use crate::AppState;

/// POST /v1/chat/completions - OpenAI-compatible chat endpoint
async fn chat_completions(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: OpenAiChatRequest = decode_json(&body)?;
    let stream = request.is_stream();

    let mut chunks = state.control.chat_completion(request.into_internal()).await?;

    if stream {
        return Ok(Sse::new(chunk_events(chunks)).into_response());
    }

    // Non-streaming callers get the first response only.
    match chunks.next().await {
        Some(Ok(chunk)) => Ok(Json(into_completion(chunk)).into_response()),
        Some(Err(e)) => Err(ControlError::Internal(e.to_string()).into()),
        None => Err(ControlError::Internal("node returned no response".to_string()).into()),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state)
}
