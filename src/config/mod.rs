//! Configuration module for zdockerd
//!
//! Supports configuration via:
//! - YAML/TOML/JSON config files
//! - Environment variables (with ZDOCKER__ prefix)
//! - The legacy `PORT` and `ZDOCKER_ROOT` variables of the original web server

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Root directory for container state, logs and the store snapshot
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Persist containers and networks to `<data_dir>/state.json`
    #[serde(default = "default_true")]
    pub persist_state: bool,

    /// Stop running containers when the daemon shuts down
    #[serde(default = "default_true")]
    pub stop_containers_on_shutdown: bool,

    /// Origins allowed by CORS (the web console)
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Lifecycle timing
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Process runtime settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Virtual network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Metrics settings
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Timeouts and polling used by the lifecycle manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Grace period between SIGTERM and SIGKILL on stop
    #[serde(default = "default_stop_grace")]
    pub stop_grace_seconds: u64,

    /// Hard limit for a single runtime call (spawn, kill confirmation)
    #[serde(default = "default_runtime_timeout")]
    pub runtime_timeout_seconds: u64,

    /// Upper bound for a collected (non-streaming) exec
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_seconds: u64,

    /// How often a followed log checks for new output
    #[serde(default = "default_log_poll")]
    pub log_poll_interval_ms: u64,

    /// How often running containers are checked for processes that died
    /// without an exit event (e.g. adopted after a daemon restart)
    #[serde(default = "default_liveness_sweep")]
    pub liveness_sweep_ms: u64,
}

/// Process runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    /// Run containers in fresh pid/mount/uts/ipc namespaces via `unshare`
    #[serde(default)]
    pub isolate: bool,

    /// cgroup v2 directory under which per-container groups are created
    #[serde(default)]
    pub cgroup_root: Option<PathBuf>,
}

/// Network manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Ensure the default network exists at boot
    #[serde(default = "default_true")]
    pub create_default: bool,

    /// Name of the default network
    #[serde(default = "default_network_name")]
    pub default_network: String,

    /// Driver used when a create request omits it
    #[serde(default = "default_driver")]
    pub default_driver: String,

    /// Subnet of the default network
    #[serde(default = "default_subnet")]
    pub default_subnet: String,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/zdocker")
}

fn default_true() -> bool {
    true
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://localhost:3000".to_string(),
    ]
}

fn default_stop_grace() -> u64 {
    10
}

fn default_runtime_timeout() -> u64 {
    30
}

fn default_exec_timeout() -> u64 {
    300
}

fn default_log_poll() -> u64 {
    200
}

fn default_liveness_sweep() -> u64 {
    2000
}

fn default_network_name() -> String {
    "bridge".to_string()
}

fn default_driver() -> String {
    "bridge".to_string()
}

fn default_subnet() -> String {
    "172.17.0.0/16".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_grace_seconds: default_stop_grace(),
            runtime_timeout_seconds: default_runtime_timeout(),
            exec_timeout_seconds: default_exec_timeout(),
            log_poll_interval_ms: default_log_poll(),
            liveness_sweep_ms: default_liveness_sweep(),
        }
    }
}

impl LifecycleConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }

    pub fn runtime_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime_timeout_seconds)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_seconds)
    }

    pub fn log_poll_interval(&self) -> Duration {
        Duration::from_millis(self.log_poll_interval_ms)
    }

    pub fn liveness_sweep(&self) -> Duration {
        Duration::from_millis(self.liveness_sweep_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            create_default: true,
            default_network: default_network_name(),
            default_driver: default_driver(),
            default_subnet: default_subnet(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            persist_state: true,
            stop_containers_on_shutdown: true,
            cors_origins: default_cors_origins(),
            lifecycle: LifecycleConfig::default(),
            runtime: RuntimeConfig::default(),
            network: NetworkConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        // Try to load .env file if present
        let _ = dotenvy::dotenv();

        let port = std::env::var("PORT").ok();
        let root = std::env::var("ZDOCKER_ROOT").ok();

        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config/zdockerd").required(false))
            .add_source(config::File::with_name("/etc/zdockerd/config").required(false))
            // Override with environment variables (ZDOCKER__ prefix)
            .add_source(
                config::Environment::with_prefix("ZDOCKER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("port", port)?
            .set_override_option("data_dir", root)?
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        if self.lifecycle.runtime_timeout_seconds == 0 {
            anyhow::bail!("Runtime timeout cannot be 0");
        }

        if self.lifecycle.exec_timeout_seconds == 0 {
            anyhow::bail!("Exec timeout cannot be 0");
        }

        if self.lifecycle.log_poll_interval_ms == 0 {
            anyhow::bail!("Log poll interval cannot be 0");
        }

        if self.lifecycle.liveness_sweep_ms == 0 {
            anyhow::bail!("Liveness sweep interval cannot be 0");
        }

        crate::network::ipam::Subnet::parse(&self.network.default_subnet)
            .map_err(|e| anyhow::anyhow!("Invalid default subnet: {}", e))?;

        Ok(())
    }

    /// Path of the persisted store snapshot, if persistence is enabled
    pub fn state_file(&self) -> Option<PathBuf> {
        self.persist_state.then(|| self.data_dir.join("state.json"))
    }

    /// Directory holding per-container runtime state
    pub fn containers_dir(&self) -> PathBuf {
        self.data_dir.join("containers")
    }

    /// Directory for the daemon's own log file
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}
