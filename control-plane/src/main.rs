use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use fleet_control_plane::dispatch::HttpConnector;
use fleet_control_plane::{gateway_router, logging, rpc_router, AppState, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    logging::init_tracing(&config.logging.level);

    tracing::info!("Starting fleet control plane");

    let connector = Arc::new(HttpConnector::new()?);
    let state = Arc::new(AppState::new(config.clone(), connector));
    if state.auth.is_enabled() {
        tracing::info!("Gateway API key authentication enabled");
    }

    let shutdown = CancellationToken::new();
    let background = state.spawn_background(shutdown.clone());

    let rpc_listener = TcpListener::bind(config.rpc.addr()).await?;
    let http_listener = TcpListener::bind(config.http.addr()).await?;
    tracing::info!("Control RPC listening on {}", config.rpc.addr());
    tracing::info!("Gateway listening on {}", config.http.addr());

    // Whichever listener stops first takes the other one down with it.
    let rpc_server = async {
        let result = axum::serve(rpc_listener, rpc_router(state.clone()))
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await;
        shutdown.cancel();
        result
    };
    let http_server = async {
        let result = axum::serve(http_listener, gateway_router(state.clone()))
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await;
        shutdown.cancel();
        result
    };

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        }
        signal.cancel();
    });

    let (rpc_result, http_result) = tokio::join!(rpc_server, http_server);
    rpc_result?;
    http_result?;

    for handle in background {
        if let Err(e) = handle.await {
            tracing::warn!("Background task ended abnormally: {}", e);
        }
    }

    tracing::info!("Control plane stopped");
    Ok(())
}
