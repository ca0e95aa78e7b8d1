//! In-process node agents and helpers shared by unit and integration tests.

pub mod mock_agent;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use fleet_common::{
    ChatCompletionChunk, ChatCompletionRequest, Embedding, EmbeddingsRequest, EmbeddingsResponse,
    EmbeddingsUsage, Job,
};

use crate::config::Config;
use crate::dispatch::{ChunkStream, JobQueue, NodeConnector, NodeRpc, NodeRpcError};

/// Config with every section at its default and fast polling.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.processor.poll_interval_ms = 10;
    config
}

/// Scripted node agent.
///
/// Clones share the request log, so a test can keep a handle while the
/// connector owns another.
#[derive(Clone, Default)]
pub struct FakeNode {
    chunks: Vec<String>,
    answer: Option<String>,
    break_stream: bool,
    reject: Option<String>,
    embeddings: Vec<Vec<f32>>,
    chat_requests: Arc<Mutex<Vec<ChatCompletionRequest>>>,
    embeddings_requests: Arc<Mutex<Vec<EmbeddingsRequest>>>,
}

impl FakeNode {
    /// Streams one delta chunk per entry, then ends cleanly.
    pub fn replying(contents: &[&str]) -> Self {
        Self {
            chunks: contents.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Answers in one complete message with token usage, like a node that
    /// does not stream.
    pub fn answering(content: &str) -> Self {
        Self {
            answer: Some(content.to_string()),
            ..Default::default()
        }
    }

    /// Refuses every call with a remote error.
    pub fn rejecting(message: &str) -> Self {
        Self {
            reject: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// After the scripted chunks, fail the stream instead of ending it.
    pub fn breaking_after_chunks(mut self) -> Self {
        self.break_stream = true;
        self
    }

    pub fn with_embeddings(mut self, vectors: Vec<Vec<f32>>) -> Self {
        self.embeddings = vectors;
        self
    }

    pub fn chat_requests(&self) -> Vec<ChatCompletionRequest> {
        self.chat_requests.lock().unwrap().clone()
    }

    pub fn embeddings_requests(&self) -> Vec<EmbeddingsRequest> {
        self.embeddings_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeRpc for FakeNode {
    async fn chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream, NodeRpcError> {
        self.chat_requests.lock().unwrap().push(request.clone());
        if let Some(message) = &self.reject {
            return Err(NodeRpcError::Remote(message.clone()));
        }

        if let Some(answer) = &self.answer {
            let prompt_tokens = request.messages.len() as u32;
            let completion_tokens = answer.split_whitespace().count() as u32;
            let chunk = ChatCompletionChunk::message(&request.model, answer, Some("stop".into()))
                .with_usage(prompt_tokens, completion_tokens);
            return Ok(stream::iter(vec![Ok(chunk)]).boxed());
        }

        let mut items: Vec<Result<ChatCompletionChunk, NodeRpcError>> = self
            .chunks
            .iter()
            .map(|content| Ok(ChatCompletionChunk::delta(&request.model, content)))
            .collect();
        if self.break_stream {
            items.push(Err(NodeRpcError::Stream("connection reset".to_string())));
        }
        Ok(stream::iter(items).boxed())
    }

    async fn embeddings(
        &self,
        request: &EmbeddingsRequest,
    ) -> Result<EmbeddingsResponse, NodeRpcError> {
        self.embeddings_requests.lock().unwrap().push(request.clone());
        if let Some(message) = &self.reject {
            return Err(NodeRpcError::Remote(message.clone()));
        }

        let tokens = request.input.len() as u32;
        Ok(EmbeddingsResponse {
            model: request.model.clone(),
            embeddings: self
                .embeddings
                .iter()
                .enumerate()
                .map(|(index, values)| Embedding {
                    index: index as u32,
                    values: values.clone(),
                })
                .collect(),
            usage: EmbeddingsUsage {
                prompt_tokens: tokens,
                total_tokens: tokens,
            },
        })
    }
}

/// Connector that hands out one [`FakeNode`] and records every dial.
pub struct CountingConnector {
    node: Option<FakeNode>,
    dials: AtomicUsize,
    targets: Mutex<Vec<String>>,
}

impl CountingConnector {
    pub fn new(node: FakeNode) -> Self {
        Self {
            node: Some(node),
            dials: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
        }
    }

    /// Every dial fails as if the agent were unreachable.
    pub fn failing() -> Self {
        Self {
            node: None,
            dials: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
        }
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn targets(&self) -> Vec<String> {
        self.targets.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeConnector for CountingConnector {
    async fn connect(&self, target: &str) -> Result<Arc<dyn NodeRpc>, NodeRpcError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().unwrap().push(target.to_string());
        // Widen the window for concurrent first use.
        tokio::time::sleep(Duration::from_millis(5)).await;

        match &self.node {
            Some(node) => Ok(Arc::new(node.clone())),
            None => Err(NodeRpcError::Connect(format!("{}: connection refused", target))),
        }
    }
}

/// Poll until the job reaches a terminal status; panics after five seconds.
pub async fn wait_for_terminal(queue: &JobQueue, job_id: &str) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(job) = queue.get(job_id).await {
            if job.status.is_terminal() {
                return job;
            }
        }
        if tokio::time::Instant::now() > deadline {
            panic!("job {} did not finish in time", job_id);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
