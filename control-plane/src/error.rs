//! Errors surfaced by the control RPC.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use fleet_common::ErrorBody;

use crate::dispatch::{DispatchError, QueueError, RegistryError, SchedulerError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ControlError {
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::InvalidArgument(_) => "invalid_argument",
            ControlError::NotFound(_) => "not_found",
            ControlError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ControlError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ControlError::NotFound(_) => StatusCode::NOT_FOUND,
            ControlError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody::new(self.code(), self.to_string())
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_body())).into_response()
    }
}

impl From<RegistryError> for ControlError {
    fn from(err: RegistryError) -> Self {
        ControlError::NotFound(err.to_string())
    }
}

impl From<QueueError> for ControlError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::NotFound(_) => ControlError::NotFound(err.to_string()),
            QueueError::AlreadyExists(_) => ControlError::InvalidArgument(err.to_string()),
            QueueError::InvalidTransition { .. } => ControlError::Internal(err.to_string()),
        }
    }
}

impl From<SchedulerError> for ControlError {
    fn from(err: SchedulerError) -> Self {
        ControlError::NotFound(err.to_string())
    }
}

impl From<DispatchError> for ControlError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::InvalidRequest(message) => {
                ControlError::InvalidArgument(message.to_string())
            }
            DispatchError::NoNodeAvailable(err) => err.into(),
            DispatchError::Node { .. } => ControlError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::NodeRpcError;

    #[test]
    fn test_component_errors_map_to_codes() {
        let cases: Vec<(ControlError, &str, StatusCode)> = vec![
            (
                RegistryError::NotFound("n1".into()).into(),
                "not_found",
                StatusCode::NOT_FOUND,
            ),
            (
                QueueError::AlreadyExists("j1".into()).into(),
                "invalid_argument",
                StatusCode::BAD_REQUEST,
            ),
            (
                SchedulerError::NoNodesAvailable {
                    model: "m".into(),
                }
                .into(),
                "not_found",
                StatusCode::NOT_FOUND,
            ),
            (
                DispatchError::Node {
                    node_id: "n1".into(),
                    source: NodeRpcError::Connect("refused".into()),
                }
                .into(),
                "internal",
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                DispatchError::Node {
                    node_id: "n1".into(),
                    source: NodeRpcError::Remote("oom".into()),
                }
                .into(),
                "internal",
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, code, status) in cases {
            assert_eq!(err.code(), code, "{}", err);
            assert_eq!(err.status(), status);
        }
    }

    #[test]
    fn test_no_node_message() {
        let err: ControlError = DispatchError::NoNodeAvailable(SchedulerError::NoNodesAvailable {
            model: "llama3".into(),
        })
        .into();
        assert_eq!(err, ControlError::NotFound("no node available for model llama3".into()));
        assert_eq!(err.to_body().error.code, "not_found");
    }
}
