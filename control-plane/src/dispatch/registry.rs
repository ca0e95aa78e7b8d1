//! Node registry for tracking worker nodes and their liveness.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use fleet_common::{Capabilities, Node};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("node {0} not found")]
    NotFound(String),
}

/// Registry of known worker nodes.
///
/// Nodes are keyed by id and listed in id order. Reads hand out clones, so
/// nothing a caller does to a returned node reaches the registry.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<BTreeMap<String, Node>>,
}

impl NodeRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a node, replacing any node with the same id.
    pub async fn register(&self, mut node: Node) {
        if node.last_seen.is_none() {
            node.last_seen = Some(Utc::now());
        }
        tracing::info!(node_id = %node.id, hostname = %node.hostname, "Node registered");
        self.nodes.write().await.insert(node.id.clone(), node);
    }

    /// Replace a node's capabilities.
    pub async fn update_capabilities(
        &self,
        id: &str,
        capabilities: Capabilities,
    ) -> Result<(), RegistryError> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        node.capabilities = capabilities;
        node.last_seen = Some(Utc::now());
        Ok(())
    }

    /// Record that a node is still alive.
    pub async fn update_heartbeat(&self, id: &str) -> Result<(), RegistryError> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        node.last_seen = Some(Utc::now());
        Ok(())
    }

    /// Get a node by ID.
    pub async fn get(&self, id: &str) -> Option<Node> {
        self.nodes.read().await.get(id).cloned()
    }

    /// All nodes, ordered by id.
    pub async fn list(&self) -> Vec<Node> {
        self.nodes.read().await.values().cloned().collect()
    }

    /// Remove a node from the registry.
    pub async fn remove(&self, id: &str) -> Result<Node, RegistryError> {
        self.nodes
            .write()
            .await
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Count registered nodes.
    pub async fn count(&self) -> usize {
        self.nodes.read().await.len()
    }

    /// Ids of nodes not seen for longer than `timeout`.
    ///
    /// The comparison is strict: a node last seen exactly `timeout` ago is
    /// still alive.
    pub async fn check_heartbeats(&self, timeout: Duration) -> Vec<String> {
        self.check_heartbeats_at(Utc::now(), timeout).await
    }

    pub(crate) async fn check_heartbeats_at(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Vec<String> {
        let Some(timeout) = max_age(timeout) else {
            return Vec::new();
        };

        self.nodes
            .read()
            .await
            .values()
            .filter(|node| is_stale(node, now, timeout))
            .map(|node| node.id.clone())
            .collect()
    }

    /// Remove a node only if it is still stale once the write lock is held.
    ///
    /// Returns `None` when the node is gone or has heartbeated since it was
    /// found stale.
    pub async fn remove_if_stale(&self, id: &str, timeout: Duration) -> Option<Node> {
        let timeout = max_age(timeout)?;
        let mut nodes = self.nodes.write().await;
        if !is_stale(nodes.get(id)?, Utc::now(), timeout) {
            return None;
        }
        nodes.remove(id)
    }
}

/// `None` when the timeout is too large to ever be exceeded.
fn max_age(timeout: Duration) -> Option<TimeDelta> {
    TimeDelta::from_std(timeout).ok()
}

fn is_stale(node: &Node, now: DateTime<Utc>, timeout: TimeDelta) -> bool {
    node.last_seen.map_or(true, |seen| now - seen > timeout)
}
