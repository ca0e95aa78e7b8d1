//! Asynchronous job records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of work a job carries; decides how its payload is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ChatCompletion,
    Embeddings,
}

impl JobType {
    pub const ALL: [JobType; 2] = [JobType::ChatCompletion, JobType::Embeddings];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ChatCompletion => "chat_completion",
            JobType::Embeddings => "embeddings",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown job type: {}", s))
    }
}

/// Lifecycle state of a job.
///
/// Variants are declared in lifecycle order; status only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a job may move from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        !self.is_terminal() && next >= *self
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Assigned => write!(f, "assigned"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A unit of queued work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    /// Serialized request, decoded according to `job_type` at dispatch time.
    pub payload: String,
    pub status: JobStatus,
    #[serde(default)]
    pub assigned_node: Option<String>,
    /// Serialized response; set only once completed.
    #[serde(default)]
    pub result: Option<String>,
    /// Set only once failed.
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: impl Into<String>, job_type: JobType, payload: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            job_type,
            payload: payload.into(),
            status: JobStatus::Pending,
            assigned_node: None,
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}
