//! Synchronous dispatch: pick a node and relay its answer straight back.

use std::sync::Arc;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use fleet_common::{ChatCompletionRequest, EmbeddingsRequest, EmbeddingsResponse, Node};

use super::{ChunkStream, NodeClientCache, NodeRegistry, NodeRpcError, Scheduler, SchedulerError};

/// Chunks buffered between the node stream and the caller.
const RELAY_BUFFER: usize = 16;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    InvalidRequest(&'static str),
    #[error(transparent)]
    NoNodeAvailable(#[from] SchedulerError),
    #[error("node {node_id}: {source}")]
    Node {
        node_id: String,
        #[source]
        source: NodeRpcError,
    },
}

/// Forwards requests to a scheduled node and hands back the node's reply.
pub struct DispatchService {
    registry: Arc<NodeRegistry>,
    scheduler: Arc<dyn Scheduler>,
    clients: Arc<NodeClientCache>,
}

impl DispatchService {
    pub fn new(
        registry: Arc<NodeRegistry>,
        scheduler: Arc<dyn Scheduler>,
        clients: Arc<NodeClientCache>,
    ) -> Self {
        Self {
            registry,
            scheduler,
            clients,
        }
    }

    /// Start a chat completion on a node and relay its chunks in order.
    ///
    /// A node error mid-stream is passed through as the last item. Dropping
    /// the returned stream stops the relay and closes the node stream.
    pub async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChunkStream, DispatchError> {
        if request.model.is_empty() {
            return Err(DispatchError::InvalidRequest("model is required"));
        }
        if request.messages.is_empty() {
            return Err(DispatchError::InvalidRequest("messages is required"));
        }

        let node = self.select(&request.model).await?;
        let client = self
            .clients
            .client_for(&node)
            .await
            .map_err(|source| node_error(&node, source))?;
        let mut upstream = client
            .chat_completion(&request)
            .await
            .map_err(|source| node_error(&node, source))?;

        let (tx, rx) = mpsc::channel(RELAY_BUFFER);
        let node_id = node.id;
        tokio::spawn(async move {
            while let Some(item) = upstream.next().await {
                let failed = item.is_err();
                if tx.send(item).await.is_err() {
                    tracing::debug!(node_id = %node_id, "Caller went away, stopping relay");
                    return;
                }
                if failed {
                    return;
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    pub async fn embeddings(
        &self,
        request: EmbeddingsRequest,
    ) -> Result<EmbeddingsResponse, DispatchError> {
        if request.model.is_empty() {
            return Err(DispatchError::InvalidRequest("model is required"));
        }
        if request.input.is_empty() {
            return Err(DispatchError::InvalidRequest("input is required"));
        }

        let node = self.select(&request.model).await?;
        let client = self
            .clients
            .client_for(&node)
            .await
            .map_err(|source| node_error(&node, source))?;
        client
            .embeddings(&request)
            .await
            .map_err(|source| node_error(&node, source))
    }

    async fn select(&self, model: &str) -> Result<Node, DispatchError> {
        let node = self.scheduler.select_node(model, &self.registry).await?;
        tracing::debug!(node_id = %node.id, model = %model, "Selected node");
        Ok(node)
    }
}

fn node_error(node: &Node, source: NodeRpcError) -> DispatchError {
    DispatchError::Node {
        node_id: node.id.clone(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::FirstAvailable;
    use crate::test_util::{CountingConnector, FakeNode};
    use fleet_common::ChatMessage;

    async fn service_with(node: Option<FakeNode>) -> (DispatchService, Arc<CountingConnector>) {
        let connector = Arc::new(match node {
            Some(node) => CountingConnector::new(node),
            None => CountingConnector::failing(),
        });
        let registry = Arc::new(NodeRegistry::new());
        registry.register(Node::new("n1", "worker-1")).await;
        let service = DispatchService::new(
            registry,
            Arc::new(FirstAvailable),
            Arc::new(NodeClientCache::new(connector.clone())),
        );
        (service, connector)
    }

    fn chat(model: &str, messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: model.to_string(),
            messages,
            stream: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_chat_validation() {
        let (service, connector) = service_with(Some(FakeNode::replying(&["x"]))).await;

        let err = service.chat_completion(chat("", vec![ChatMessage::new("user", "hi")])).await;
        assert_eq!(err.err().unwrap().to_string(), "model is required");

        let err = service.chat_completion(chat("m", vec![])).await;
        assert_eq!(err.err().unwrap().to_string(), "messages is required");

        assert_eq!(connector.dials(), 0);
    }

    #[tokio::test]
    async fn test_embeddings_validation() {
        let (service, _) = service_with(Some(FakeNode::replying(&[]))).await;

        let err = service
            .embeddings(EmbeddingsRequest {
                model: "embed".to_string(),
                input: vec![],
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "input is required");
    }

    #[tokio::test]
    async fn test_chat_relays_chunks_in_order() {
        let node = FakeNode::replying(&["a", "b", "c"]);
        let (service, _) = service_with(Some(node.clone())).await;

        let stream = service
            .chat_completion(chat("m", vec![ChatMessage::new("user", "hi")]))
            .await
            .unwrap();
        let contents: Vec<String> = stream
            .map(|c| c.unwrap().content().unwrap_or_default().to_string())
            .collect()
            .await;

        assert_eq!(contents, vec!["a", "b", "c"]);
        assert_eq!(node.chat_requests()[0].model, "m");
    }

    #[tokio::test]
    async fn test_chat_stream_error_is_last_item() {
        let node = FakeNode::replying(&["a"]).breaking_after_chunks();
        let (service, _) = service_with(Some(node)).await;

        let items: Vec<_> = service
            .chat_completion(chat("m", vec![ChatMessage::new("user", "hi")]))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(NodeRpcError::Stream(_))));
    }

    #[tokio::test]
    async fn test_no_nodes() {
        let connector = Arc::new(CountingConnector::new(FakeNode::replying(&[])));
        let service = DispatchService::new(
            Arc::new(NodeRegistry::new()),
            Arc::new(FirstAvailable),
            Arc::new(NodeClientCache::new(connector)),
        );

        let err = service
            .chat_completion(chat("llama3", vec![ChatMessage::new("user", "hi")]))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DispatchError::NoNodeAvailable(_)));
    }

    #[tokio::test]
    async fn test_connect_failure_names_node() {
        let (service, _) = service_with(None).await;

        let err = service
            .embeddings(EmbeddingsRequest {
                model: "embed".to_string(),
                input: vec!["hi".to_string()],
            })
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("node n1: failed to connect"));
    }

    #[tokio::test]
    async fn test_embeddings_passthrough() {
        let node = FakeNode::replying(&[]).with_embeddings(vec![vec![1.0], vec![2.0]]);
        let (service, _) = service_with(Some(node)).await;

        let response = service
            .embeddings(EmbeddingsRequest {
                model: "embed".to_string(),
                input: vec!["a".to_string(), "b".to_string()],
            })
            .await
            .unwrap();

        assert_eq!(response.embeddings.len(), 2);
        assert_eq!(response.embeddings[1].index, 1);
    }
}
