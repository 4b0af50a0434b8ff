//! Prometheus metrics export
//!
//! Lifecycle counters are recorded from the managers; gauges are refreshed
//! from the store when `/metrics` is scraped.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::container::ContainerStatus;
use crate::AppState;

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Safe to call more than once.
pub fn init_metrics() -> anyhow::Result<()> {
    METRICS_HANDLE.get_or_try_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("Failed to install metrics recorder: {}", e))
    })?;
    Ok(())
}

pub fn record_container_created() {
    counter!("zdocker_containers_created_total").increment(1);
}

pub fn record_container_started() {
    counter!("zdocker_container_starts_total").increment(1);
}

pub fn record_start_failure(reason: &'static str) {
    counter!("zdocker_container_start_failures_total", "reason" => reason).increment(1);
}

pub fn record_container_stopped(forced: bool) {
    let mode = if forced { "kill" } else { "term" };
    counter!("zdocker_container_stops_total", "mode" => mode).increment(1);
}

pub fn record_container_removed() {
    counter!("zdocker_containers_removed_total").increment(1);
}

pub fn record_container_exit(exit_code: Option<i32>) {
    let outcome = match exit_code {
        Some(0) => "success",
        Some(_) => "failure",
        None => "unknown",
    };
    counter!("zdocker_container_exits_total", "outcome" => outcome).increment(1);
}

pub fn record_exec(mode: &'static str) {
    counter!("zdocker_execs_total", "mode" => mode).increment(1);
}

pub fn record_network_created() {
    counter!("zdocker_networks_created_total").increment(1);
}

/// Prometheus metrics endpoint handler
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(handle) = METRICS_HANDLE.get() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [("Content-Type", "text/plain")],
            "metrics recorder not installed".to_string(),
        );
    };

    let containers = state.store.list().await;
    let running = containers
        .iter()
        .filter(|c| c.status == ContainerStatus::Running)
        .count();
    gauge!("zdocker_containers_running").set(running as f64);
    gauge!("zdocker_networks").set(state.store.list_networks().await.len() as f64);

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        handle.render(),
    )
}
