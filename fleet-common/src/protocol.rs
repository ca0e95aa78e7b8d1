//! Control-plane RPC messages.
//!
//! # Protocol Overview
//!
//! The control plane exposes its RPC surface as JSON over HTTP. Node agents
//! call the node lifecycle endpoints; batch clients call the job endpoints.
//!
//! ## Node lifecycle
//!
//! 1. Node sends `RegisterNodeRequest` with its id, hostname and capabilities
//! 2. Node sends periodic `HeartbeatRequest`s
//! 3. Node sends `UpdateNodeRequest` when its capabilities change
//! 4. A node that stops heartbeating is swept from the registry
//!
//! ## Jobs
//!
//! 1. Client sends `SubmitJobRequest`, receives `SubmitJobResponse` (pending)
//! 2. Client polls `GetJobStatusResponse` until the job is completed or failed
//!
//! ## Node agent endpoints
//!
//! The control plane dispatches to each node agent at the paths below. Chat
//! completions answer with a `text/event-stream` of `data: {chunk}` frames,
//! optionally closed by `data: [DONE]`.

use serde::{Deserialize, Serialize};

use crate::{Capabilities, JobStatus, Node};

/// Node agent path for streamed chat completions.
pub const AGENT_CHAT_PATH: &str = "/v1/node/chat/completions";
/// Node agent path for embeddings.
pub const AGENT_EMBEDDINGS_PATH: &str = "/v1/node/embeddings";
/// Terminal frame of an event stream.
pub const STREAM_DONE: &str = "[DONE]";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterNodeRequest {
    #[serde(default)]
    pub node: Option<Node>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub node_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateNodeRequest {
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub capabilities: Option<Capabilities>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListNodesResponse {
    pub nodes: Vec<Node>,
}

/// Acknowledgement for calls that return nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
}

impl Ack {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(default)]
    pub job_id: String,
    /// `chat_completion` or `embeddings`. Kept as text so an unknown type is
    /// reported as an invalid argument instead of a decode failure.
    #[serde(default)]
    pub job_type: String,
    /// Serialized request matching `job_type`.
    #[serde(default)]
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetJobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub assigned_node: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
}

/// Error body returned by the control plane and the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable category, e.g. `invalid_argument`.
    #[serde(rename = "type")]
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_without_node() {
        let req: RegisterNodeRequest = serde_json::from_str("{}").unwrap();
        assert!(req.node.is_none());
    }

    #[test]
    fn test_submit_job_request_keeps_raw_type() {
        let req: SubmitJobRequest =
            serde_json::from_str(r#"{"job_id":"j1","job_type":"image","payload":"{}"}"#).unwrap();
        assert_eq!(req.job_type, "image");
    }

    #[test]
    fn test_error_body_shape() {
        let body = ErrorBody::new("not_found", "node n1 not found");
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains(r#""type":"not_found""#));
        assert!(json.contains(r#""message":"node n1 not found""#));
    }

    #[test]
    fn test_job_status_response_roundtrip() {
        let resp = GetJobStatusResponse {
            job_id: "job-1".to_string(),
            status: JobStatus::Failed,
            assigned_node: Some("n1".to_string()),
            error_message: Some("node unreachable".to_string()),
            result: None,
        };
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: GetJobStatusResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.status, JobStatus::Failed);
        assert_eq!(parsed.error_message.as_deref(), Some("node unreachable"));
    }
}
