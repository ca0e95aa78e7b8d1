//! RPC clients for node agents and the per-node client cache.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OnceCell, RwLock};

use fleet_common::{
    ChatCompletionChunk, ChatCompletionRequest, EmbeddingsRequest, EmbeddingsResponse, ErrorBody,
    Node, AGENT_CHAT_PATH, AGENT_EMBEDDINGS_PATH, STREAM_DONE,
};

/// Errors talking to a node agent.
#[derive(Debug, Error)]
pub enum NodeRpcError {
    #[error("failed to connect to node agent: {0}")]
    Connect(String),
    #[error("node agent returned error: {0}")]
    Remote(String),
    #[error("stream from node agent broke: {0}")]
    Stream(String),
    #[error("invalid message from node agent: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Chunks of a streamed chat completion, in arrival order.
pub type ChunkStream =
    Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk, NodeRpcError>> + Send + 'static>>;

/// Calls a node agent can serve.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Start a chat completion; the stream ends when the node finishes.
    async fn chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream, NodeRpcError>;

    async fn embeddings(
        &self,
        request: &EmbeddingsRequest,
    ) -> Result<EmbeddingsResponse, NodeRpcError>;
}

/// Opens clients to node agents.
#[async_trait]
pub trait NodeConnector: Send + Sync {
    async fn connect(&self, target: &str) -> Result<Arc<dyn NodeRpc>, NodeRpcError>;
}

/// Connector producing HTTP clients that share one connection pool.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    http_client: Client,
}

impl HttpConnector {
    pub fn new() -> Result<Self, NodeRpcError> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NodeRpcError::Connect(e.to_string()))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl NodeConnector for HttpConnector {
    async fn connect(&self, target: &str) -> Result<Arc<dyn NodeRpc>, NodeRpcError> {
        let client = HttpNodeClient::new(self.http_client.clone(), target)?;
        Ok(Arc::new(client))
    }
}

/// Client for one node agent's HTTP endpoints.
#[derive(Debug, Clone)]
pub struct HttpNodeClient {
    http_client: Client,
    base_url: String,
}

impl HttpNodeClient {
    /// `target` is `host:port` or a full base URL.
    pub fn new(http_client: Client, target: &str) -> Result<Self, NodeRpcError> {
        let base_url = if target.contains("://") {
            target.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", target)
        };
        reqwest::Url::parse(&base_url).map_err(|e| {
            NodeRpcError::Connect(format!("invalid agent address {}: {}", target, e))
        })?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, NodeRpcError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("Dispatching to node agent at {}", url);

        let mut request = self.http_client.post(&url).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NodeRpcError::Connect(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NodeRpcError::Remote(format!("HTTP {}: {}", status, body)));
        }

        Ok(response)
    }
}

#[async_trait]
impl NodeRpc for HttpNodeClient {
    async fn chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream, NodeRpcError> {
        let response = self.post(AGENT_CHAT_PATH, request, None).await?;
        Ok(sse_chunks(response.bytes_stream().boxed()))
    }

    async fn embeddings(
        &self,
        request: &EmbeddingsRequest,
    ) -> Result<EmbeddingsResponse, NodeRpcError> {
        let response = self
            .post(AGENT_EMBEDDINGS_PATH, request, Some(Duration::from_secs(300)))
            .await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| NodeRpcError::Stream(e.to_string()))?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// What one server-sent event carried.
#[derive(Debug)]
enum Frame {
    Chunk(Result<ChatCompletionChunk, NodeRpcError>),
    Done,
    /// Comments, keep-alives and events without data.
    Skip,
}

fn parse_frame(frame: &str) -> Frame {
    let data: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect();
    if data.is_empty() {
        return Frame::Skip;
    }

    let data = data.join("\n");
    let data = data.trim();
    if data == STREAM_DONE {
        return Frame::Done;
    }
    if let Ok(body) = serde_json::from_str::<ErrorBody>(data) {
        return Frame::Chunk(Err(NodeRpcError::Remote(body.error.message)));
    }
    Frame::Chunk(serde_json::from_str(data).map_err(NodeRpcError::from))
}

struct SseReader {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    buffer: Vec<u8>,
    finished: bool,
}

impl SseReader {
    /// Pop one complete `\n\n`-terminated event off the buffer.
    fn next_frame(&mut self) -> Option<String> {
        let end = self.buffer.windows(2).position(|w| w == b"\n\n")?;
        let frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
        Some(String::from_utf8_lossy(&frame[..end]).into_owned())
    }
}

/// Decode a `text/event-stream` body into chat chunks.
///
/// `[DONE]` or a clean end of body finishes the stream; a transport error
/// mid-body is yielded as [`NodeRpcError::Stream`].
fn sse_chunks(body: BoxStream<'static, reqwest::Result<Bytes>>) -> ChunkStream {
    let reader = SseReader {
        body,
        buffer: Vec::new(),
        finished: false,
    };

    stream::unfold(reader, |mut reader| async move {
        loop {
            if reader.finished {
                return None;
            }

            if let Some(frame) = reader.next_frame() {
                match parse_frame(&frame) {
                    Frame::Chunk(item) => return Some((item, reader)),
                    Frame::Done => {
                        reader.finished = true;
                        return None;
                    }
                    Frame::Skip => continue,
                }
            }

            match reader.body.next().await {
                Some(Ok(bytes)) => reader.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    reader.finished = true;
                    return Some((Err(NodeRpcError::Stream(e.to_string())), reader));
                }
                None => {
                    reader.finished = true;
                    let rest = String::from_utf8_lossy(&reader.buffer).into_owned();
                    reader.buffer.clear();
                    return match parse_frame(&rest) {
                        Frame::Chunk(item) => Some((item, reader)),
                        Frame::Done | Frame::Skip => None,
                    };
                }
            }
        }
    })
    .boxed()
}

type ClientCell = Arc<OnceCell<Arc<dyn NodeRpc>>>;

/// One lazily created client per node, reused across both dispatch paths.
///
/// The map lock is only held to find or insert a node's slot; the slot's own
/// once-guard serializes the dial, so concurrent first use of a node dials
/// once and slow dials don't hold up other nodes.
pub struct NodeClientCache {
    connector: Arc<dyn NodeConnector>,
    clients: RwLock<HashMap<String, ClientCell>>,
}

impl NodeClientCache {
    pub fn new(connector: Arc<dyn NodeConnector>) -> Self {
        Self {
            connector,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Get the client for a node, connecting on first use.
    pub async fn client_for(&self, node: &Node) -> Result<Arc<dyn NodeRpc>, NodeRpcError> {
        let cell = self.cell_for(&node.id).await;
        let client = cell
            .get_or_try_init(|| async {
                let target = node.agent_target();
                tracing::info!(node_id = %node.id, target = %target, "Connecting to node agent");
                self.connector.connect(&target).await
            })
            .await?;
        Ok(client.clone())
    }

    async fn cell_for(&self, node_id: &str) -> ClientCell {
        if let Some(cell) = self.clients.read().await.get(node_id) {
            return cell.clone();
        }

        let mut clients = self.clients.write().await;
        clients
            .entry(node_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Drop a node's cached client so the next use reconnects.
    pub async fn evict(&self, node_id: &str) -> bool {
        self.clients.write().await.remove(node_id).is_some()
    }

    /// Number of nodes with a connected client.
    pub async fn connected(&self) -> usize {
        self.clients
            .read()
            .await
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }
}
