//! Container record and lifecycle state machine

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Lifecycle status of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Stopped,
    Removing,
    Removed,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::Removing => "removing",
            ContainerStatus::Removed => "removed",
        }
    }

    /// Legal edges of the lifecycle graph
    pub fn can_transition_to(self, next: ContainerStatus) -> bool {
        use ContainerStatus::*;
        matches!(
            (self, next),
            (Created, Running)
                | (Created, Removing)
                | (Running, Stopped)
                | (Stopped, Running)
                | (Stopped, Removing)
                | (Removing, Removed)
        )
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A long-running operation that owns the container until it commits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Starting,
    Stopping,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Starting => f.write_str("starting"),
            Transition::Stopping => f.write_str("stopping"),
        }
    }
}

/// Outcome of checking whether an operation may begin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The operation should run
    Proceed,
    /// The container is already where the operation would leave it
    AlreadyInState,
}

/// Container record owned by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub image: String,
    pub command: String,
    pub status: ContainerStatus,
    #[serde(default)]
    pub transition: Option<Transition>,
    pub created_time: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub volume: Vec<VolumeBinding>,
    #[serde(default)]
    pub port_mapping: Vec<PortBinding>,
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub cpu_share: Option<u64>,
    #[serde(default)]
    pub cpu_set: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub ip_address: Option<Ipv4Addr>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub detach: bool,
    #[serde(default)]
    pub tty: bool,
}

impl Container {
    /// Build a fresh record in `Created` with a newly generated id
    pub fn new(name: String, image: String, command: String) -> Self {
        Self {
            id: generate_id(),
            name,
            image,
            command,
            status: ContainerStatus::Created,
            transition: None,
            created_time: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
            pid: None,
            volume: Vec::new(),
            port_mapping: Vec::new(),
            memory: None,
            cpu_share: None,
            cpu_set: None,
            network: None,
            ip_address: None,
            environment: BTreeMap::new(),
            detach: false,
            tty: false,
        }
    }

    /// Move to `next`, rejecting edges outside the lifecycle graph.
    ///
    /// Keeps `pid` consistent with the status: it is cleared whenever the
    /// container leaves `Running`.
    pub fn set_status(&mut self, next: ContainerStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::conflict(format!(
                "container {} cannot go from {} to {}",
                self.name, self.status, next
            )));
        }
        self.status = next;
        if next != ContainerStatus::Running {
            self.pid = None;
        }
        Ok(())
    }

    fn check_idle(&self) -> Result<()> {
        match self.transition {
            Some(t) => Err(Error::conflict(format!(
                "container {} is {}",
                self.name, t
            ))),
            None => Ok(()),
        }
    }

    pub fn admit_start(&self) -> Result<Admission> {
        self.check_idle()?;
        match self.status {
            ContainerStatus::Created | ContainerStatus::Stopped => Ok(Admission::Proceed),
            ContainerStatus::Running => Ok(Admission::AlreadyInState),
            other => Err(Error::conflict(format!(
                "container {} is {}",
                self.name, other
            ))),
        }
    }

    pub fn admit_stop(&self) -> Result<Admission> {
        self.check_idle()?;
        match self.status {
            ContainerStatus::Running => Ok(Admission::Proceed),
            ContainerStatus::Stopped => Ok(Admission::AlreadyInState),
            ContainerStatus::Created => Err(Error::conflict(format!(
                "container {} is not running",
                self.name
            ))),
            other => Err(Error::conflict(format!(
                "container {} is {}",
                self.name, other
            ))),
        }
    }

    pub fn admit_remove(&self) -> Result<Admission> {
        if self.status == ContainerStatus::Running {
            return Err(Error::ContainerRunning(self.name.clone()));
        }
        self.check_idle()?;
        match self.status {
            ContainerStatus::Created | ContainerStatus::Stopped => Ok(Admission::Proceed),
            other => Err(Error::conflict(format!(
                "container {} is {}",
                self.name, other
            ))),
        }
    }

    /// Command split into argv the way a shell splits on whitespace
    pub fn argv(&self) -> Vec<String> {
        self.command.split_whitespace().map(str::to_string).collect()
    }

    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }

    pub fn short_id(&self) -> &str {
        &self.id[..12.min(self.id.len())]
    }
}

/// 64 hex characters, SHA-256 over a random UUID
pub fn generate_id() -> String {
    let digest = Sha256::digest(Uuid::new_v4().as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Bind mount `host:container[:ro]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    pub read_only: bool,
}

impl FromStr for VolumeBinding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let (host, container, read_only) = match parts.as_slice() {
            [host, container] => (*host, *container, false),
            [host, container, "ro"] => (*host, *container, true),
            [host, container, "rw"] => (*host, *container, false),
            _ => {
                return Err(Error::validation(format!(
                    "invalid volume {:?}: expected host:container[:ro]",
                    s
                )))
            }
        };

        if !host.starts_with('/') || !container.starts_with('/') {
            return Err(Error::validation(format!(
                "invalid volume {:?}: paths must be absolute",
                s
            )));
        }
        if container == "/" {
            return Err(Error::validation(format!(
                "invalid volume {:?}: cannot bind over the container root",
                s
            )));
        }

        Ok(Self {
            host_path: PathBuf::from(host),
            container_path: PathBuf::from(container),
            read_only,
        })
    }
}

impl fmt::Display for VolumeBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.host_path.display(),
            self.container_path.display()
        )?;
        if self.read_only {
            f.write_str(":ro")?;
        }
        Ok(())
    }
}

/// Transport protocol of a published port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Port publication `host:container[/proto]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
}

impl FromStr for PortBinding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            Error::validation(format!(
                "invalid port mapping {:?}: expected host:container[/tcp|/udp]",
                s
            ))
        };

        let (ports, protocol) = match s.split_once('/') {
            Some((ports, "tcp")) => (ports, Protocol::Tcp),
            Some((ports, "udp")) => (ports, Protocol::Udp),
            Some(_) => return Err(invalid()),
            None => (s, Protocol::Tcp),
        };
        let (host, container) = ports.split_once(':').ok_or_else(invalid)?;
        let host_port: u16 = host.parse().map_err(|_| invalid())?;
        let container_port: u16 = container.parse().map_err(|_| invalid())?;
        if host_port == 0 || container_port == 0 {
            return Err(invalid());
        }

        Ok(Self {
            host_port,
            container_port,
            protocol,
        })
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_port, self.container_port)?;
        if self.protocol == Protocol::Udp {
            f.write_str("/udp")?;
        }
        Ok(())
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(VolumeBinding);
string_serde!(PortBinding);

/// Parse `<n>[b|k|m|g]` into bytes
pub fn parse_memory(value: &str) -> Result<u64> {
    let invalid = || {
        Error::validation(format!(
            "invalid memory limit {:?}: expected <number>[b|k|m|g]",
            value
        ))
    };

    let lower = value.trim().to_ascii_lowercase();
    let (digits, unit) = match lower.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => lower.split_at(idx),
        None => (lower.as_str(), ""),
    };
    let n: u64 = digits.parse().map_err(|_| invalid())?;
    let multiplier: u64 = match unit {
        "" | "b" => 1,
        "k" | "kb" => 1 << 10,
        "m" | "mb" => 1 << 20,
        "g" | "gb" => 1 << 30,
        _ => return Err(invalid()),
    };
    let bytes = n.checked_mul(multiplier).ok_or_else(invalid)?;
    if bytes == 0 {
        return Err(invalid());
    }
    Ok(bytes)
}

pub const MIN_CPU_SHARES: u64 = 2;
pub const MAX_CPU_SHARES: u64 = 262_144;

pub fn validate_cpu_share(shares: u64) -> Result<u64> {
    if !(MIN_CPU_SHARES..=MAX_CPU_SHARES).contains(&shares) {
        return Err(Error::validation(format!(
            "cpu_share {} out of range {}..={}",
            shares, MIN_CPU_SHARES, MAX_CPU_SHARES
        )));
    }
    Ok(shares)
}

/// Map cgroup v1 shares onto the v2 `cpu.weight` range 1..=10000
pub fn shares_to_weight(shares: u64) -> u64 {
    let shares = shares.clamp(MIN_CPU_SHARES, MAX_CPU_SHARES);
    1 + ((shares - 2) * 9999) / 262_142
}

/// Validate a cpuset list such as `0-3,5`
pub fn parse_cpu_set(value: &str) -> Result<Vec<u32>> {
    let invalid = || {
        Error::validation(format!(
            "invalid cpu_set {:?}: expected a list like 0-3,5",
            value
        ))
    };

    let mut cpus = Vec::new();
    for part in value.split(',') {
        let part = part.trim();
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: u32 = lo.parse().map_err(|_| invalid())?;
                let hi: u32 = hi.parse().map_err(|_| invalid())?;
                if lo > hi {
                    return Err(invalid());
                }
                cpus.extend(lo..=hi);
            }
            None => cpus.push(part.parse().map_err(|_| invalid())?),
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}
