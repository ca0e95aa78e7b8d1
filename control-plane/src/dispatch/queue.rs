//! Job queue for asynchronous work.
//!
//! Two structures live behind one lock: a FIFO of job ids waiting to be
//! dequeued, and an index of every job ever enqueued. Dequeuing only pops the
//! FIFO, so status and results stay readable after a job has been taken.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

use fleet_common::{Job, JobStatus};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {0} already exists")]
    AlreadyExists(String),
    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<String>,
    jobs: HashMap<String, Job>,
}

impl QueueState {
    fn job_mut(&mut self, id: &str, next: JobStatus) -> Result<&mut Job, QueueError> {
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        if !job.status.can_transition_to(next) {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                from: job.status,
                to: next,
            });
        }
        job.status = next;
        job.updated_at = Utc::now();
        Ok(job)
    }
}

/// FIFO job queue with blocking, timed and non-blocking dequeue.
///
/// Jobs are never evicted from the index.
#[derive(Debug, Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    /// Wakes one waiting consumer per enqueue.
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job to the queue as pending.
    pub async fn enqueue(&self, mut job: Job) -> Result<(), QueueError> {
        let now = Utc::now();
        job.status = JobStatus::Pending;
        job.created_at = now;
        job.updated_at = now;

        {
            let mut state = self.state.lock().await;
            if state.jobs.contains_key(&job.id) {
                return Err(QueueError::AlreadyExists(job.id));
            }
            state.pending.push_back(job.id.clone());
            state.jobs.insert(job.id.clone(), job);
        }

        self.notify.notify_one();
        Ok(())
    }

    /// Wait until a job is available and take it.
    pub async fn dequeue(&self) -> Job {
        loop {
            // Register interest before checking so an enqueue between the
            // check and the wait is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.dequeue_non_blocking().await {
                return job;
            }
            notified.await;
        }
    }

    /// Wait at most `timeout` for a job.
    pub async fn dequeue_with_timeout(&self, timeout: Duration) -> Option<Job> {
        tokio::time::timeout(timeout, self.dequeue()).await.ok()
    }

    /// Take the next job if one is waiting.
    pub async fn dequeue_non_blocking(&self) -> Option<Job> {
        let mut state = self.state.lock().await;
        while let Some(id) = state.pending.pop_front() {
            if let Some(job) = state.jobs.get(&id) {
                return Some(job.clone());
            }
        }
        None
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.state.lock().await.jobs.get(id).cloned()
    }

    pub async fn update_status(&self, id: &str, status: JobStatus) -> Result<(), QueueError> {
        self.state.lock().await.job_mut(id, status)?;
        Ok(())
    }

    pub async fn update_status_and_node(
        &self,
        id: &str,
        status: JobStatus,
        node_id: &str,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(id, status)?;
        job.assigned_node = Some(node_id.to_string());
        Ok(())
    }

    /// Mark a job completed with its serialized result.
    pub async fn complete_job(&self, id: &str, result: String) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(id, JobStatus::Completed)?;
        job.result = Some(result);
        job.error_message = None;
        Ok(())
    }

    /// Mark a job failed with a description of what went wrong.
    pub async fn fail_job(&self, id: &str, error: String) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(id, JobStatus::Failed)?;
        job.error_message = Some(error);
        job.result = None;
        Ok(())
    }

    /// Every job in the index, oldest first.
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.state.lock().await.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Number of jobs in the index.
    pub async fn count(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn count_by_status(&self, status: JobStatus) -> usize {
        self.state
            .lock()
            .await
            .jobs
            .values()
            .filter(|j| j.status == status)
            .count()
    }

    /// Number of jobs still waiting to be dequeued.
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use fleet_common::JobType;

    fn chat_job(id: &str) -> Job {
        Job::new(id, JobType::ChatCompletion, r#"{"model":"m","messages":[]}"#)
    }

    #[tokio::test]
    async fn test_enqueue_forces_pending() {
        let queue = JobQueue::new();
        let mut job = chat_job("job-1");
        job.status = JobStatus::Running;

        queue.enqueue(job).await.unwrap();

        assert_eq!(queue.get("job-1").await.unwrap().status, JobStatus::Pending);
        assert_eq!(queue.count().await, 1);
        assert_eq!(queue.pending_len().await, 1);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_duplicate_id() {
        let queue = JobQueue::new();
        queue.enqueue(chat_job("job-1")).await.unwrap();

        assert_eq!(
            queue.enqueue(chat_job("job-1")).await,
            Err(QueueError::AlreadyExists("job-1".to_string()))
        );
        assert_eq!(queue.pending_len().await, 1);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = JobQueue::new();
        for id in ["a", "b", "c"] {
            queue.enqueue(chat_job(id)).await.unwrap();
        }

        assert_eq!(queue.dequeue().await.id, "a");
        assert_eq!(queue.dequeue_non_blocking().await.unwrap().id, "b");
        assert_eq!(
            queue
                .dequeue_with_timeout(Duration::from_millis(10))
                .await
                .unwrap()
                .id,
            "c"
        );
    }

    #[tokio::test]
    async fn test_status_lifecycle() {
        let queue = JobQueue::new();
        queue.enqueue(chat_job("job-1")).await.unwrap();
        queue.enqueue(chat_job("job-2")).await.unwrap();
        assert_eq!(queue.get("job-1").await.unwrap().status, JobStatus::Pending);

        queue
            .update_status_and_node("job-1", JobStatus::Running, "n1")
            .await
            .unwrap();
        let job = queue.get("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.assigned_node.as_deref(), Some("n1"));

        queue.complete_job("job-1", "r".to_string()).await.unwrap();
        let job = queue.get("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_deref(), Some("r"));
        assert!(job.error_message.is_none());

        queue.fail_job("job-2", "e".to_string()).await.unwrap();
        let job = queue.get("job-2").await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("e"));
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_get_survives_dequeue() {
        let queue = JobQueue::new();
        queue.enqueue(chat_job("job-1")).await.unwrap();
        assert!(queue.get("job-1").await.is_some());

        queue.dequeue_non_blocking().await.unwrap();

        assert_eq!(queue.pending_len().await, 0);
        assert_eq!(queue.get("job-1").await.unwrap().id, "job-1");
    }

    #[tokio::test]
    async fn test_status_never_regresses() {
        let queue = JobQueue::new();
        queue.enqueue(chat_job("job-1")).await.unwrap();
        queue
            .update_status("job-1", JobStatus::Running)
            .await
            .unwrap();

        let err = queue
            .update_status("job-1", JobStatus::Assigned)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { .. }));

        queue.complete_job("job-1", "done".to_string()).await.unwrap();
        assert!(queue.fail_job("job-1", "late".to_string()).await.is_err());
        assert_eq!(queue.get("job-1").await.unwrap().result.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_updates_touch_updated_at() {
        let queue = JobQueue::new();
        queue.enqueue(chat_job("job-1")).await.unwrap();
        let before = queue.get("job-1").await.unwrap().updated_at;

        tokio::time::sleep(Duration::from_millis(5)).await;
        queue
            .update_status("job-1", JobStatus::Assigned)
            .await
            .unwrap();

        assert!(queue.get("job-1").await.unwrap().updated_at > before);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let queue = JobQueue::new();
        assert!(queue.get("missing").await.is_none());
        assert_eq!(
            queue.update_status("missing", JobStatus::Running).await,
            Err(QueueError::NotFound("missing".to_string()))
        );
        assert!(queue.complete_job("missing", String::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_dequeue_non_blocking_on_empty() {
        let queue = JobQueue::new();
        assert!(queue.dequeue_non_blocking().await.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_with_timeout_expires() {
        let queue = JobQueue::new();
        let start = std::time::Instant::now();

        let job = queue.dequeue_with_timeout(Duration::from_millis(50)).await;

        assert!(job.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_blocking_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(JobQueue::new());

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(chat_job("late")).await.unwrap();

        let job = tokio::time::timeout(Duration::from_secs(2), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.id, "late");
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let queue = JobQueue::new();
        for id in ["a", "b", "c"] {
            queue.enqueue(chat_job(id)).await.unwrap();
        }
        queue.update_status("a", JobStatus::Assigned).await.unwrap();
        queue.fail_job("b", "boom".to_string()).await.unwrap();

        assert_eq!(queue.count_by_status(JobStatus::Pending).await, 1);
        assert_eq!(queue.count_by_status(JobStatus::Assigned).await, 1);
        assert_eq!(queue.count_by_status(JobStatus::Failed).await, 1);
        assert_eq!(queue.list().await.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_and_consumers() {
        const PRODUCERS: usize = 8;
        const PER_PRODUCER: usize = 50;

        let queue = Arc::new(JobQueue::new());

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for i in 0..PER_PRODUCER {
                        queue.enqueue(chat_job(&format!("p{}-{}", p, i))).await.unwrap();
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    let mut idle_rounds = 0;
                    while idle_rounds < 50 {
                        match queue.dequeue_non_blocking().await {
                            Some(job) => {
                                seen.push(job.id);
                                idle_rounds = 0;
                            }
                            None => {
                                idle_rounds += 1;
                                tokio::task::yield_now().await;
                            }
                        }
                    }
                    seen
                })
            })
            .collect();

        for producer in producers {
            producer.await.unwrap();
        }

        let mut delivered = Vec::new();
        for consumer in consumers {
            delivered.extend(consumer.await.unwrap());
        }
        while let Some(job) = queue.dequeue_non_blocking().await {
            delivered.push(job.id);
        }

        let unique: HashSet<_> = delivered.iter().cloned().collect();
        assert_eq!(delivered.len(), PRODUCERS * PER_PRODUCER);
        assert_eq!(unique.len(), PRODUCERS * PER_PRODUCER);

        let listed: HashSet<_> = queue.list().await.into_iter().map(|j| j.id).collect();
        assert_eq!(listed.len(), PRODUCERS * PER_PRODUCER);
        for id in &unique {
            assert!(queue.get(id).await.is_some());
        }
    }
}
