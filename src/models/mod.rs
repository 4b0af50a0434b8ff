//! Data models for zdockerd
//!
//! Request and response types of the HTTP API. Container and network
//! records themselves live in `container` and `network`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// Container Models
// ============================================================================

/// Request to create a container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateContainerRequest {
    /// Image reference (recorded, not pulled)
    pub image: String,

    /// Entrypoint; split on whitespace at start
    pub command: String,

    /// Container name; generated when empty
    #[serde(default, deserialize_with = "empty_as_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub detach: bool,

    #[serde(default)]
    pub tty: bool,

    /// Bind mounts, `host:container[:ro]`. A single string is accepted too.
    #[serde(default, deserialize_with = "one_or_many")]
    pub volume: Vec<String>,

    /// Memory limit such as `512m`
    #[serde(default, deserialize_with = "empty_as_none")]
    pub memory: Option<String>,

    /// Relative CPU shares (2..=262144), as a number or numeric string
    #[serde(default, deserialize_with = "number_or_string")]
    pub cpu_share: Option<u64>,

    /// CPUs the container may run on, e.g. `0-3,5`
    #[serde(default, deserialize_with = "empty_as_none")]
    pub cpu_set: Option<String>,

    /// Network to attach to
    #[serde(default, deserialize_with = "empty_as_none")]
    pub network: Option<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Published ports, `host:container[/tcp|/udp]`
    #[serde(default)]
    pub port_mapping: Vec<String>,
}

/// Request to execute a command in a running container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecRequest {
    pub command: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Return the live output instead of a collected result
    #[serde(default)]
    pub stream: bool,
}

/// Collected output of an exec; a non-zero exit is not an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub output: String,
    pub exit_code: i32,
}

/// Query of `POST /containers/stop/{name}` and `/restart`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StopQuery {
    /// Grace period in seconds before SIGKILL
    pub timeout: Option<u64>,
}

/// Query of `GET /containers/logs/{name}`
#[derive(Debug, Clone, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_follow")]
    pub follow: bool,
}

impl Default for LogsQuery {
    fn default() -> Self {
        Self { follow: true }
    }
}

fn default_follow() -> bool {
    true
}

// ============================================================================
// Network Models
// ============================================================================

/// Request to create a network
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateNetworkRequest {
    pub name: String,

    #[serde(default, deserialize_with = "empty_as_none")]
    pub driver: Option<String>,

    /// CIDR; a free private /16 is chosen when omitted
    #[serde(default, deserialize_with = "empty_as_none")]
    pub subnet: Option<String>,
}

// ============================================================================
// System Models
// ============================================================================

/// Host and daemon summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpus: usize,
    pub memory: String,
    pub zdocker_root: String,
    pub kernel_version: String,
    pub containers: usize,
    pub containers_running: usize,
    pub containers_stopped: usize,
    pub networks: usize,
    pub isolation: String,
}

/// Build metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub api_version: String,
    pub build_date: String,
    pub git_commit: Option<String>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub containers_running: usize,
    pub isolation: String,
}

// ============================================================================
// Envelopes
// ============================================================================

/// Success envelope `{ "data": ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataResponse<T> {
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Error envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

// ============================================================================
// Lenient field decoding
// ============================================================================

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) if s.trim().is_empty() => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

fn number_or_string<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        Text(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(NumberOrString::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid cpu_share {s:?}"))),
    }
}
