//! The control-plane operations behind the RPC surface.
//!
//! [`ControlService`] is transport-agnostic; `routes::rpc` exposes it over
//! HTTP and the gateway reuses it for the node listing.

use std::sync::Arc;

use fleet_common::{
    Ack, ChatCompletionRequest, EmbeddingsRequest, EmbeddingsResponse, GetJobStatusResponse,
    HeartbeatRequest, Job, JobType, ListNodesResponse, RegisterNodeRequest, SubmitJobRequest,
    SubmitJobResponse, UpdateNodeRequest,
};

use crate::dispatch::{ChunkStream, DispatchService, JobQueue, NodeClientCache, NodeRegistry};
use crate::error::ControlError;

pub struct ControlService {
    registry: Arc<NodeRegistry>,
    queue: Arc<JobQueue>,
    clients: Arc<NodeClientCache>,
    dispatch: Arc<DispatchService>,
}

impl ControlService {
    pub fn new(
        registry: Arc<NodeRegistry>,
        queue: Arc<JobQueue>,
        clients: Arc<NodeClientCache>,
        dispatch: Arc<DispatchService>,
    ) -> Self {
        Self {
            registry,
            queue,
            clients,
            dispatch,
        }
    }

    pub async fn register_node(&self, request: RegisterNodeRequest) -> Result<Ack, ControlError> {
        let node = request
            .node
            .ok_or_else(|| ControlError::InvalidArgument("node is required".to_string()))?;
        if node.id.is_empty() {
            return Err(ControlError::InvalidArgument("node id is required".to_string()));
        }

        // A node that comes back somewhere else needs a fresh client.
        if let Some(previous) = self.registry.get(&node.id).await {
            if previous.agent_target() != node.agent_target() {
                self.clients.evict(&node.id).await;
            }
        }

        self.registry.register(node).await;
        Ok(Ack::ok())
    }

    pub async fn heartbeat(&self, request: HeartbeatRequest) -> Result<Ack, ControlError> {
        self.registry.update_heartbeat(&request.node_id).await?;
        tracing::trace!(node_id = %request.node_id, "Heartbeat");
        Ok(Ack::ok())
    }

    pub async fn update_node(&self, request: UpdateNodeRequest) -> Result<Ack, ControlError> {
        let capabilities = request
            .capabilities
            .ok_or_else(|| ControlError::InvalidArgument("capabilities are required".to_string()))?;
        self.registry
            .update_capabilities(&request.node_id, capabilities)
            .await?;
        tracing::info!(node_id = %request.node_id, "Node capabilities updated");
        Ok(Ack::ok())
    }

    pub async fn list_nodes(&self) -> ListNodesResponse {
        ListNodesResponse {
            nodes: self.registry.list().await,
        }
    }

    pub async fn submit_job(
        &self,
        request: SubmitJobRequest,
    ) -> Result<SubmitJobResponse, ControlError> {
        if request.job_id.is_empty() {
            return Err(ControlError::InvalidArgument("job_id is required".to_string()));
        }
        let job_type: JobType = request.job_type.parse().map_err(ControlError::InvalidArgument)?;

        let job = Job::new(request.job_id, job_type, request.payload);
        let response = SubmitJobResponse {
            job_id: job.id.clone(),
            status: job.status,
        };
        self.queue.enqueue(job).await?;
        tracing::info!(job_id = %response.job_id, job_type = %job_type, "Job submitted");

        Ok(response)
    }

    pub async fn get_job_status(&self, job_id: &str) -> Result<GetJobStatusResponse, ControlError> {
        let job = self
            .queue
            .get(job_id)
            .await
            .ok_or_else(|| ControlError::NotFound(format!("job {} not found", job_id)))?;

        Ok(GetJobStatusResponse {
            job_id: job.id,
            status: job.status,
            assigned_node: job.assigned_node,
            error_message: job.error_message,
            result: job.result,
        })
    }

    pub async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChunkStream, ControlError> {
        Ok(self.dispatch.chat_completion(request).await?)
    }

    pub async fn embeddings(
        &self,
        request: EmbeddingsRequest,
    ) -> Result<EmbeddingsResponse, ControlError> {
        Ok(self.dispatch.embeddings(request).await?)
    }
}
