//! Node selection policies.

use async_trait::async_trait;
use thiserror::Error;

use fleet_common::Node;

use super::NodeRegistry;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no node available for model {model}")]
    NoNodesAvailable { model: String },
}

/// Strategy for picking the node that serves a request.
///
/// Both dispatch paths hold an `Arc<dyn Scheduler>`, so the policy can be
/// swapped without touching them.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn select_node(&self, model: &str, registry: &NodeRegistry)
        -> Result<Node, SchedulerError>;
}

/// Picks the first registered node in listing order.
///
/// The model is not consulted yet: every node is assumed able to serve every
/// model.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstAvailable;

#[async_trait]
impl Scheduler for FirstAvailable {
    async fn select_node(
        &self,
        model: &str,
        registry: &NodeRegistry,
    ) -> Result<Node, SchedulerError> {
        registry
            .list()
            .await
            .into_iter()
            .next()
            .ok_or_else(|| SchedulerError::NoNodesAvailable {
                model: model.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry() {
        let registry = NodeRegistry::new();
        let result = FirstAvailable.select_node("any-model", &registry).await;
        assert_eq!(
            result,
            Err(SchedulerError::NoNodesAvailable {
                model: "any-model".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_single_node() {
        let registry = NodeRegistry::new();
        registry.register(Node::new("n1", "worker-1")).await;

        let node = FirstAvailable.select_node("any-model", &registry).await.unwrap();
        assert_eq!(node.id, "n1");
    }

    #[tokio::test]
    async fn test_first_in_listing_order() {
        let registry = NodeRegistry::new();
        for id in ["n2", "n3", "n1"] {
            registry.register(Node::new(id, "host")).await;
        }

        let node = FirstAvailable.select_node("llama3", &registry).await.unwrap();

        assert!(registry.get(&node.id).await.is_some());
        assert_eq!(node.id, registry.list().await[0].id);
        assert_eq!(node.id, "n1");
    }

    #[tokio::test]
    async fn test_model_is_ignored() {
        let registry = NodeRegistry::new();
        registry.register(Node::new("n1", "worker-1")).await;

        let a = FirstAvailable.select_node("model-a", &registry).await.unwrap();
        let b = FirstAvailable.select_node("model-b", &registry).await.unwrap();
        assert_eq!(a.id, b.id);
    }
}
