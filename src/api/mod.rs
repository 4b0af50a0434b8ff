//! HTTP API for zdockerd
//!
//! Container, network and system routes live under `/api/v1`; health and
//! Prometheus metrics are served at the root.

mod error;
mod handlers;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::AppState;

pub use error::ApiError;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", api_v1_routes());

    if state.config.metrics.enabled {
        router = router.route(&state.config.metrics.path, get(crate::metrics::metrics_handler));
    }

    router.with_state(state)
}

/// API v1 routes
fn api_v1_routes() -> Router<Arc<AppState>> {
    use handlers::{containers, exec, networks, system};

    Router::new()
        // Containers
        .route(
            "/containers",
            get(containers::list_containers).post(containers::create_container),
        )
        .route(
            "/containers/:id",
            get(containers::inspect_container).delete(containers::remove_container),
        )
        .route("/containers/:id/start", post(containers::start_container))
        .route("/containers/:id/restart", post(containers::restart_container))
        .route("/containers/stop/:id", post(containers::stop_container))
        .route("/containers/logs/:id", get(containers::container_logs))
        .route("/containers/:id/exec", post(exec::exec_container))
        .route("/containers/:id/exec/ws", get(exec::exec_websocket))
        // Networks
        .route(
            "/networks",
            get(networks::list_networks).post(networks::create_network),
        )
        .route(
            "/networks/:name",
            get(networks::inspect_network).delete(networks::remove_network),
        )
        // System
        .route("/system/info", get(system::system_info))
        .route("/system/version", get(system::version))
}

/// CORS for the configured origins; `*` allows any
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let layer = CorsLayer::new().allow_methods(methods).allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(parsed)
}
