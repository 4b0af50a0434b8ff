//! Container runtime adapter
//!
//! The lifecycle manager drives containers through [`ContainerRuntime`]; it
//! never touches processes, cgroups or the filesystem directly.

pub mod cgroup;
#[cfg(test)]
pub mod fake;
pub mod process;

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use nix::sys::signal::Signal;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::container::VolumeBinding;

pub use process::ProcessRuntime;

/// Runtime adapter failures
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid container spec: {0}")]
    InvalidSpec(String),

    #[error("volume source {0} does not exist")]
    MissingVolumeSource(PathBuf),

    #[error("failed to apply resource limits: {0}")]
    Limits(String),

    #[error("failed to spawn process: {0}")]
    Spawn(String),

    #[error("failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    #[error("exec failed: {0}")]
    Exec(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Limits applied to the container's cgroup before it runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub memory_bytes: Option<u64>,
    /// cgroup v2 `cpu.weight`
    pub cpu_weight: Option<u64>,
    pub cpu_set: Option<String>,
}

impl ResourceLimits {
    pub fn is_empty(&self) -> bool {
        self.memory_bytes.is_none() && self.cpu_weight.is_none() && self.cpu_set.is_none()
    }
}

/// Everything the runtime needs to launch one container process
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub container_id: String,
    pub name: String,
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<VolumeBinding>,
    pub limits: ResourceLimits,
    pub network: Option<String>,
    pub ip_address: Option<Ipv4Addr>,
}

/// A command to run inside a running container
#[derive(Debug, Clone)]
pub struct ExecSpec {
    pub container_id: String,
    pub pid: u32,
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Keep stdin open for the caller
    pub interactive: bool,
}

/// Live handle to an exec'd command.
///
/// `output` carries stdout and stderr interleaved in arrival order. Dropping
/// `output` before it is drained kills and reaps the command; the container
/// itself is left alone.
#[derive(Debug)]
pub struct ExecSession {
    pub stdin: Option<mpsc::Sender<Bytes>>,
    pub output: mpsc::Receiver<Bytes>,
    /// Exit status once the command has been reaped; `None` if unknown
    pub exit: oneshot::Receiver<Option<i32>>,
}

/// Broadcast when a container's main process terminates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub container_id: String,
    pub pid: u32,
    /// Exit status, or 128 + signal number for signal deaths
    pub exit_code: Option<i32>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short label reported by health and system info
    fn isolation(&self) -> &'static str;

    /// Launch the container process with limits and mounts in place.
    ///
    /// On error nothing allocated by this call is left behind.
    async fn spawn(&self, spec: &SpawnSpec) -> Result<u32, RuntimeError>;

    async fn signal(&self, pid: u32, signal: Signal) -> Result<(), RuntimeError>;

    async fn kill(&self, pid: u32) -> Result<(), RuntimeError>;

    async fn is_alive(&self, pid: u32) -> bool;

    async fn exec(&self, spec: &ExecSpec) -> Result<ExecSession, RuntimeError>;

    /// Free OS resources (cgroup, mount records) held for a container.
    /// Only the first call for a given container does any work.
    async fn release(&self, container_id: &str) -> Result<(), RuntimeError>;

    /// Delete the container's on-disk state; implies `release`
    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError>;

    fn log_path(&self, container_id: &str) -> PathBuf;

    fn subscribe_exits(&self) -> broadcast::Receiver<ProcessExit>;
}

/// Translate a wait status into the exit code convention used everywhere
pub(crate) fn exit_code_of(status: std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.code().or_else(|| status.signal().map(|sig| 128 + sig))
}
