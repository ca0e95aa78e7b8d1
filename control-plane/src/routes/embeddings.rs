use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use super::{decode_json, ApiError};
use crate::models::openai::{OpenAiEmbeddingsRequest, OpenAiEmbeddingsResponse};
use crate::AppState;

/// POST /v1/embeddings - OpenAI-compatible embeddings endpoint
async fn embeddings(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<OpenAiEmbeddingsResponse>, ApiError> {
    let request: OpenAiEmbeddingsRequest = decode_json(&body)?;
    let response = state.control.embeddings(request.into_internal()).await?;
    Ok(Json(response.into()))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/embeddings", post(embeddings))
        .with_state(state)
}
