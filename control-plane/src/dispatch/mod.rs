//! Dispatch layer: node registry, job queue, scheduling and the paths that
//! carry work to node agents.
//!
//! Work reaches nodes two ways. Synchronous requests go through
//! [`DispatchService`], which relays the node's reply straight back. Queued
//! jobs are picked up by [`JobProcessor`], which stores the outcome on the job.
//! Both share one [`NodeClientCache`].

mod heartbeat;
mod node_client;
mod processor;
mod queue;
mod registry;
mod scheduler;
mod service;

pub use heartbeat::HeartbeatMonitor;
pub use node_client::{
    ChunkStream, HttpConnector, HttpNodeClient, NodeClientCache, NodeConnector, NodeRpc,
    NodeRpcError,
};
pub use processor::JobProcessor;
pub use queue::{JobQueue, QueueError};
pub use registry::{NodeRegistry, RegistryError};
pub use scheduler::{FirstAvailable, Scheduler, SchedulerError};
pub use service::{DispatchError, DispatchService};
