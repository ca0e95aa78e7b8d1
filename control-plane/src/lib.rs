pub mod auth;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod models;
pub mod routes;
pub mod test_util;

pub use config::Config;
pub use control::ControlService;
pub use error::ControlError;

use std::sync::Arc;

use axum::{middleware, Router};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::ApiKeyAuth;
use crate::dispatch::{
    DispatchService, FirstAvailable, HeartbeatMonitor, JobProcessor, JobQueue, NodeClientCache,
    NodeConnector, NodeRegistry, Scheduler,
};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub registry: Arc<NodeRegistry>,
    pub queue: Arc<JobQueue>,
    /// One client per node, shared by the processor and the dispatch service.
    pub clients: Arc<NodeClientCache>,
    pub control: Arc<ControlService>,
    pub processor: Arc<JobProcessor>,
    pub auth: ApiKeyAuth,
}

impl AppState {
    /// Wire every component around the given connector.
    pub fn new(config: Config, connector: Arc<dyn NodeConnector>) -> Self {
        let registry = Arc::new(NodeRegistry::new());
        let queue = Arc::new(JobQueue::new());
        let clients = Arc::new(NodeClientCache::new(connector));
        let scheduler: Arc<dyn Scheduler> = Arc::new(FirstAvailable);

        let dispatch = Arc::new(DispatchService::new(
            registry.clone(),
            scheduler.clone(),
            clients.clone(),
        ));
        let control = Arc::new(ControlService::new(
            registry.clone(),
            queue.clone(),
            clients.clone(),
            dispatch,
        ));
        let processor = Arc::new(JobProcessor::new(
            queue.clone(),
            registry.clone(),
            scheduler,
            clients.clone(),
            &config.processor,
        ));
        let auth = ApiKeyAuth::new(config.auth.api_key.clone());

        Self {
            config,
            registry,
            queue,
            clients,
            control,
            processor,
            auth,
        }
    }

    /// Start the job processor and the heartbeat sweep.
    pub fn spawn_background(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let monitor = HeartbeatMonitor::new(
            self.registry.clone(),
            self.clients.clone(),
            &self.config.heartbeat,
        );
        vec![
            tokio::spawn(self.processor.clone().run(shutdown.clone())),
            tokio::spawn(monitor.run(shutdown)),
        ]
    }
}

/// OpenAI-compatible gateway. `/health` stays open; everything else sits
/// behind the API key when one is configured.
pub fn gateway_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .merge(routes::chat::router(state.clone()))
        .merge(routes::embeddings::router(state.clone()))
        .merge(routes::nodes::router(state.clone()))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .merge(routes::health::router(state))
        .merge(protected)
        .layer(middleware::from_fn(logging::request_logger))
        .layer(TraceLayer::new_for_http())
        // Outermost, so preflights are answered before routing or auth.
        .layer(cors_layer())
}

/// Control RPC for node agents and batch clients.
pub fn rpc_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::health::router(state.clone()))
        .merge(routes::rpc::router(state))
        .layer(middleware::from_fn(logging::request_logger))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
