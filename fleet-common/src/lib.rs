//! Fleet Common Types
//!
//! Shared types used by the control plane and the node agents it dispatches to.

pub mod chat;
pub mod embeddings;
pub mod job;
pub mod node;
pub mod protocol;

pub use chat::{ChatCompletionChunk, ChatCompletionRequest, ChatMessage, ChunkChoice, Usage};
pub use embeddings::{Embedding, EmbeddingsRequest, EmbeddingsResponse, EmbeddingsUsage};
pub use job::{Job, JobStatus, JobType};
pub use node::{Accelerator, Capabilities, Node, DEFAULT_AGENT_PORT};
pub use protocol::{
    AGENT_CHAT_PATH, AGENT_EMBEDDINGS_PATH, STREAM_DONE,
    Ack, ErrorBody, ErrorDetail, GetJobStatusResponse, HeartbeatRequest, ListNodesResponse,
    RegisterNodeRequest, SubmitJobRequest, SubmitJobResponse, UpdateNodeRequest,
};
