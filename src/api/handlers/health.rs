//! Health check handler

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::models::HealthResponse;
use crate::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let containers_running = state
        .container_manager
        .list()
        .await
        .iter()
        .filter(|c| c.is_running())
        .count();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        containers_running,
        isolation: state.container_manager.runtime().isolation().to_string(),
    })
}
