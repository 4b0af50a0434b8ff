//! zdockerd - single-host container control plane
//!
//! Loads configuration, restores persisted state, reconciles it against the
//! running processes and serves the REST API until SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::http::HeaderName;
use tokio::signal;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use zdockerd::api::{cors_layer, create_router};
use zdockerd::config::AppConfig;
use zdockerd::container::ContainerManager;
use zdockerd::logging::init_logging;
use zdockerd::network::NetworkManager;
use zdockerd::runtime::{ContainerRuntime, ProcessRuntime};
use zdockerd::store::ResourceStore;
use zdockerd::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    let log_dir = config.log_dir();
    init_logging(&config.log_level, Some(log_dir.as_path()))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        "Starting zdockerd"
    );

    if config.metrics.enabled {
        zdockerd::metrics::init_metrics()?;
        info!(path = %config.metrics.path, "Prometheus metrics initialized");
    }

    // Restore state
    let store = Arc::new(match config.state_file() {
        Some(path) => ResourceStore::open(&path)
            .await
            .with_context(|| format!("Failed to open state file {}", path.display()))?,
        None => ResourceStore::in_memory(),
    });

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(
        ProcessRuntime::new(config.containers_dir(), &config.runtime)
            .await
            .context("Failed to initialize container runtime")?,
    );
    info!(isolation = runtime.isolation(), "Container runtime ready");

    let network_manager = Arc::new(NetworkManager::new(store.clone(), &config.network));
    network_manager.rebuild_from_store().await;
    if config.network.create_default {
        network_manager
            .ensure_default(&config.network)
            .await
            .context("Failed to create default network")?;
    }

    let container_manager = Arc::new(ContainerManager::new(
        store.clone(),
        network_manager.clone(),
        runtime,
        config.lifecycle.clone(),
    ));
    container_manager.reconcile().await;
    let _exit_monitor = container_manager.spawn_exit_monitor();

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        container_manager: container_manager.clone(),
        network_manager,
        started_at: Instant::now(),
    });

    // Build the router with all routes and middleware
    let x_request_id = HeaderName::from_static("x-request-id");
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .layer(cors_layer(&config.cors_origins));

    // Bind to address
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "Listening");

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");

    if config.stop_containers_on_shutdown {
        warn!("Stopping all running containers...");
        container_manager.stop_all().await;
    }

    info!("zdockerd stopped");
    Ok(())
}

/// Handle shutdown signals gracefully
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
