//! HTTP handlers for the gateway and the control RPC.

pub mod chat;
pub mod embeddings;
pub mod health;
pub mod nodes;
pub mod rpc;

use std::convert::Infallible;

use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;

use fleet_common::STREAM_DONE;

use crate::dispatch::ChunkStream;
use crate::error::ControlError;

/// Decode a JSON body by hand so a bad body reads like any other invalid
/// argument instead of an extractor rejection.
pub(crate) fn decode_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ControlError> {
    serde_json::from_slice(body)
        .map_err(|e| ControlError::InvalidArgument(format!("invalid request body: {}", e)))
}

/// Error as seen by gateway clients: bad input is a 400, everything else a 500.
#[derive(Debug)]
pub struct ApiError(ControlError);

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            ControlError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self.0.to_body())).into_response()
    }
}

/// Server-sent events for a chunk stream: one `data:` frame per chunk, then
/// `[DONE]`. A failure ends the stream with an error frame instead.
pub(crate) fn chunk_events(
    chunks: ChunkStream,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    stream::unfold(Some(chunks), |chunks| async move {
        let Some(mut chunks) = chunks else {
            return None;
        };
        let event = match chunks.next().await {
            Some(Ok(chunk)) => match serde_json::to_string(&chunk) {
                Ok(json) => return Some((Event::default().data(json), Some(chunks))),
                Err(e) => error_event(ControlError::Internal(e.to_string())),
            },
            Some(Err(e)) => {
                tracing::warn!("Stream from node failed: {}", e);
                error_event(ControlError::Internal(e.to_string()))
            }
            None => Event::default().data(STREAM_DONE),
        };
        Some((event, None))
    })
    .map(Ok)
}

fn error_event(err: ControlError) -> Event {
    let json = serde_json::to_string(&err.to_body())
        .unwrap_or_else(|_| r#"{"error":{"type":"internal","message":"stream failed"}}"#.to_string());
    Event::default().data(json)
}
