//! Periodic removal of nodes that stopped sending heartbeats.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{NodeClientCache, NodeRegistry};
use crate::config::HeartbeatConfig;

pub struct HeartbeatMonitor {
    registry: Arc<NodeRegistry>,
    clients: Arc<NodeClientCache>,
    timeout: Duration,
    sweep_interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        clients: Arc<NodeClientCache>,
        config: &HeartbeatConfig,
    ) -> Self {
        Self {
            registry,
            clients,
            timeout: Duration::from_secs(config.timeout_secs),
            // `tokio::time::interval` panics on a zero period.
            sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
        }
    }

    /// Remove every stale node and drop its cached client.
    ///
    /// Returns the ids that were removed.
    pub async fn sweep(&self) -> Vec<String> {
        let mut removed = Vec::new();
        for node_id in self.registry.check_heartbeats(self.timeout).await {
            // Staleness is re-checked under the write lock, so a heartbeat
            // that lands after the scan keeps the node.
            if self
                .registry
                .remove_if_stale(&node_id, self.timeout)
                .await
                .is_some()
            {
                self.clients.evict(&node_id).await;
                tracing::warn!(node_id = %node_id, "Node missed heartbeats, removed");
                removed.push(node_id);
            }
        }
        removed
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.sweep().await;
                }
            }
        }
        tracing::debug!("Heartbeat monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{CountingConnector, FakeNode};
    use chrono::Utc;
    use fleet_common::Node;

    #[tokio::test]
    async fn test_sweep_removes_stale_nodes_and_clients() {
        let registry = Arc::new(NodeRegistry::new());
        let connector = Arc::new(CountingConnector::new(FakeNode::replying(&[])));
        let clients = Arc::new(NodeClientCache::new(connector.clone()));

        let mut stale = Node::new("stale", "old-host");
        stale.last_seen = Some(Utc::now() - chrono::Duration::seconds(120));
        registry.register(stale.clone()).await;
        registry.register(Node::new("fresh", "new-host")).await;
        clients.client_for(&stale).await.unwrap();

        let monitor = HeartbeatMonitor::new(
            registry.clone(),
            clients.clone(),
            &HeartbeatConfig {
                timeout_secs: 30,
                sweep_interval_secs: 10,
            },
        );

        assert_eq!(monitor.sweep().await, vec!["stale"]);
        assert!(registry.get("stale").await.is_none());
        assert!(registry.get("fresh").await.is_some());
        assert_eq!(clients.connected().await, 0);

        assert!(monitor.sweep().await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_sweep_interval_keeps_running() {
        let registry = Arc::new(NodeRegistry::new());
        let clients = Arc::new(NodeClientCache::new(Arc::new(CountingConnector::new(
            FakeNode::replying(&[]),
        ))));
        let monitor = HeartbeatMonitor::new(
            registry,
            clients,
            &HeartbeatConfig {
                timeout_secs: 30,
                sweep_interval_secs: 0,
            },
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(monitor.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
