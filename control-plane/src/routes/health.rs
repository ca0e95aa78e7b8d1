use std::sync::Arc;

use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Liveness plus a glance at the fleet.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    nodes: usize,
    pending_jobs: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        nodes: state.registry.count().await,
        pending_jobs: state.queue.pending_len().await,
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}
