//! Background processor for queued jobs.
//!
//! The processor runs an async loop that drains the job queue and drives each
//! job to a terminal state on a node chosen by the scheduler. Each job runs on
//! its own task; a semaphore caps how many run at once.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use fleet_common::{
    ChatCompletionChunk, ChatCompletionRequest, EmbeddingsRequest, Job, JobStatus, JobType,
};

use super::{
    JobQueue, NodeClientCache, NodeRegistry, NodeRpc, NodeRpcError, QueueError, Scheduler,
    SchedulerError,
};
use crate::config::ProcessorConfig;

/// Why a job failed. The message ends up in the job's `error_message`.
#[derive(Debug, Error)]
enum JobError {
    #[error("invalid {job_type} payload: {source}")]
    InvalidPayload {
        job_type: JobType,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Scheduling(#[from] SchedulerError),
    #[error("dispatch to node {node_id} failed: {source}")]
    Dispatch {
        node_id: String,
        source: NodeRpcError,
    },
    #[error("failed to encode result: {0}")]
    EncodeResult(serde_json::Error),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

enum Payload {
    Chat(ChatCompletionRequest),
    Embeddings(EmbeddingsRequest),
}

impl Payload {
    fn decode(job: &Job) -> Result<Self, JobError> {
        let invalid = |source| JobError::InvalidPayload {
            job_type: job.job_type,
            source,
        };
        match job.job_type {
            JobType::ChatCompletion => serde_json::from_str(&job.payload)
                .map(Payload::Chat)
                .map_err(invalid),
            JobType::Embeddings => serde_json::from_str(&job.payload)
                .map(Payload::Embeddings)
                .map_err(invalid),
        }
    }

    fn model(&self) -> &str {
        match self {
            Payload::Chat(request) => &request.model,
            Payload::Embeddings(request) => &request.model,
        }
    }
}

enum Outcome {
    Completed(String),
    /// Shutdown arrived mid-dispatch; the job keeps its current status.
    Interrupted,
}

/// Drives queued jobs to completion against remote nodes.
pub struct JobProcessor {
    queue: Arc<JobQueue>,
    registry: Arc<NodeRegistry>,
    scheduler: Arc<dyn Scheduler>,
    clients: Arc<NodeClientCache>,
    poll_interval: Duration,
    slots: Arc<Semaphore>,
}

impl JobProcessor {
    pub fn new(
        queue: Arc<JobQueue>,
        registry: Arc<NodeRegistry>,
        scheduler: Arc<dyn Scheduler>,
        clients: Arc<NodeClientCache>,
        config: &ProcessorConfig,
    ) -> Self {
        let permits = match config.max_concurrent_jobs {
            0 => Semaphore::MAX_PERMITS,
            n => n,
        };
        Self {
            queue,
            registry,
            scheduler,
            clients,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            slots: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Run the processing loop until `shutdown` is cancelled.
    ///
    /// The queue is polled with a short timeout so cancellation is noticed
    /// promptly even when no jobs arrive.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Job processor started"
        );

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let job = tokio::select! {
                _ = shutdown.cancelled() => break,
                job = self.queue.dequeue_with_timeout(self.poll_interval) => match job {
                    Some(job) => job,
                    None => continue,
                },
            };

            if let Err(e) = self.queue.update_status(&job.id, JobStatus::Assigned).await {
                tracing::warn!(job_id = %job.id, "Skipping dequeued job: {}", e);
                continue;
            }

            let processor = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                processor.process(job, shutdown).await;
                drop(permit);
            });
        }

        tracing::info!("Job processor stopped");
    }

    /// Run one job and record how it ended.
    async fn process(&self, job: Job, shutdown: CancellationToken) {
        let job_id = job.id.clone();

        let recorded = match self.execute(&job, &shutdown).await {
            Ok(Outcome::Completed(result)) => {
                tracing::info!(job_id = %job_id, "Job completed");
                self.queue.complete_job(&job_id, result).await
            }
            Ok(Outcome::Interrupted) => {
                tracing::info!(job_id = %job_id, "Job interrupted by shutdown");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, "Job failed: {}", e);
                self.queue.fail_job(&job_id, e.to_string()).await
            }
        };

        if let Err(e) = recorded {
            tracing::error!(job_id = %job_id, "Failed to record job outcome: {}", e);
        }
    }

    async fn execute(&self, job: &Job, shutdown: &CancellationToken) -> Result<Outcome, JobError> {
        let payload = Payload::decode(job)?;

        let node = self
            .scheduler
            .select_node(payload.model(), &self.registry)
            .await?;
        self.queue
            .update_status_and_node(&job.id, JobStatus::Running, &node.id)
            .await?;
        tracing::debug!(job_id = %job.id, node_id = %node.id, "Dispatching job");

        let dispatch_failed = |source| JobError::Dispatch {
            node_id: node.id.clone(),
            source,
        };
        let client = self
            .clients
            .client_for(&node)
            .await
            .map_err(dispatch_failed)?;

        match payload {
            Payload::Chat(request) => {
                match consume_chat(client.as_ref(), &request, shutdown)
                    .await
                    .map_err(dispatch_failed)?
                {
                    Some(last) => encode_result(last.as_ref()).map(Outcome::Completed),
                    None => Ok(Outcome::Interrupted),
                }
            }
            Payload::Embeddings(request) => {
                let response = client.embeddings(&request).await.map_err(dispatch_failed)?;
                encode_result(Some(&response)).map(Outcome::Completed)
            }
        }
    }
}

/// Consume a chat stream, keeping only its last chunk.
///
/// Returns `None` when shutdown interrupted the stream, `Some(None)` when the
/// stream ended without producing anything.
async fn consume_chat(
    client: &dyn NodeRpc,
    request: &ChatCompletionRequest,
    shutdown: &CancellationToken,
) -> Result<Option<Option<ChatCompletionChunk>>, NodeRpcError> {
    let mut stream = client.chat_completion(request).await?;
    let mut last = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(None),
            item = stream.next() => match item {
                Some(Ok(chunk)) => last = Some(chunk),
                Some(Err(e)) => return Err(e),
                None => return Ok(Some(last)),
            },
        }
    }
}

/// Serialize a response for storage. No response at all is stored as an
/// empty result; the job still counts as completed.
fn encode_result<T: serde::Serialize>(response: Option<&T>) -> Result<String, JobError> {
    match response {
        Some(response) => serde_json::to_string(response).map_err(JobError::EncodeResult),
        None => Ok(String::new()),
    }
}
