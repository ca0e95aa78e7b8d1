use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use fleet_common::ListNodesResponse;

use crate::AppState;

/// GET /api/nodes - registered nodes for the dashboard
async fn list_nodes(State(state): State<Arc<AppState>>) -> Json<ListNodesResponse> {
    Json(state.control.list_nodes().await)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/nodes", get(list_nodes))
        .with_state(state)
}
