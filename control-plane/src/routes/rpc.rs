//! Control RPC as JSON over HTTP.
//!
//! Errors come back as `{"error":{"type","message"}}` with the status code
//! matching the error type.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use fleet_common::{
    Ack, EmbeddingsResponse, GetJobStatusResponse, ListNodesResponse, SubmitJobResponse,
};

use super::{chunk_events, decode_json};
use crate::error::ControlError;
use crate::AppState;

async fn register_node(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Ack>, ControlError> {
    Ok(Json(state.control.register_node(decode_json(&body)?).await?))
}

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Ack>, ControlError> {
    Ok(Json(state.control.heartbeat(decode_json(&body)?).await?))
}

async fn update_node(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Ack>, ControlError> {
    Ok(Json(state.control.update_node(decode_json(&body)?).await?))
}

async fn list_nodes(State(state): State<Arc<AppState>>) -> Json<ListNodesResponse> {
    Json(state.control.list_nodes().await)
}

async fn submit_job(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SubmitJobResponse>, ControlError> {
    Ok(Json(state.control.submit_job(decode_json(&body)?).await?))
}

async fn get_job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<GetJobStatusResponse>, ControlError> {
    Ok(Json(state.control.get_job_status(&job_id).await?))
}

async fn chat_completion(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ControlError> {
    let chunks = state.control.chat_completion(decode_json(&body)?).await?;
    Ok(Sse::new(chunk_events(chunks)).into_response())
}

async fn embeddings(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<EmbeddingsResponse>, ControlError> {
    Ok(Json(state.control.embeddings(decode_json(&body)?).await?))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/rpc/nodes/register", post(register_node))
        .route("/rpc/nodes/heartbeat", post(heartbeat))
        .route("/rpc/nodes/update", post(update_node))
        .route("/rpc/nodes", get(list_nodes))
        .route("/rpc/jobs", post(submit_job))
        .route("/rpc/jobs/:job_id", get(get_job_status))
        .route("/rpc/chat/completions", post(chat_completion))
        .route("/rpc/embeddings", post(embeddings))
        .with_state(state)
}
