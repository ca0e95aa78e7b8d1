//! Worker node descriptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Port a node agent listens on when it registers without an explicit address.
pub const DEFAULT_AGENT_PORT: u16 = 50052;

/// A worker machine known to the control plane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier chosen by the worker.
    pub id: String,
    pub hostname: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Where the node agent accepts dispatches (`host:port` or a URL).
    /// Empty means `hostname:DEFAULT_AGENT_PORT`.
    #[serde(default)]
    pub agent_address: String,
    /// Last registration, heartbeat or capability update.
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Node {
    pub fn new(id: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hostname: hostname.into(),
            ..Default::default()
        }
    }

    pub fn with_agent_address(mut self, address: impl Into<String>) -> Self {
        self.agent_address = address.into();
        self
    }

    /// Address the node agent should be dialed at.
    pub fn agent_target(&self) -> String {
        if self.agent_address.is_empty() {
            format!("{}:{}", self.hostname, DEFAULT_AGENT_PORT)
        } else {
            self.agent_address.clone()
        }
    }
}

/// Hardware and platform description reported by a node.
///
/// The control plane stores and returns this as-is; nothing in dispatch
/// looks inside it yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub cpu_cores: u32,
    #[serde(default)]
    pub cpu_model: String,
    #[serde(default)]
    pub memory_bytes: u64,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub accelerators: Vec<Accelerator>,
    /// Free-form extra facts (driver versions, rack, ...).
    #[serde(default)]
    pub labels: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Accelerator {
    /// Vendor name, e.g. "nvidia" or "amd".
    pub vendor: String,
    pub model: String,
    #[serde(default)]
    pub memory_bytes: u64,
}
