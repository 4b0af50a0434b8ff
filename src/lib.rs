//! zdockerd library
//!
//! A single-host container control plane: a resource store, container
//! lifecycle management over a pluggable runtime, bridge networks with
//! address pools, and the HTTP API that exposes them.

use std::sync::Arc;
use std::time::Instant;

pub mod api;
pub mod config;
pub mod container;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod network;
pub mod runtime;
pub mod store;
pub mod system;

pub use error::{Error, Result};

/// Application state shared across all handlers
pub struct AppState {
    pub config: config::AppConfig,
    pub store: Arc<store::ResourceStore>,
    pub container_manager: Arc<container::ContainerManager>,
    pub network_manager: Arc<network::NetworkManager>,
    pub started_at: Instant,
}
