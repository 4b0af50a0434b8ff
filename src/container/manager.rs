//! Container lifecycle management
//!
//! Every state change is split into three steps: a short store update that
//! admits the operation and marks the container as transitioning, the slow
//! runtime work done without holding any lock, and a second short update that
//! commits the outcome. The transition marker keeps any other operation on
//! the same container out while the slow part runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use nix::sys::signal::Signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::LifecycleConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{CreateContainerRequest, ExecRequest};
use crate::network::NetworkManager;
use crate::runtime::{
    ContainerRuntime, ExecSession, ExecSpec, ProcessExit, ResourceLimits, SpawnSpec,
};
use crate::store::ResourceStore;

use super::logs::{self, LogStream};
use super::names::{generate_name, validate_container_name};
use super::state::{
    parse_cpu_set, parse_memory, shares_to_weight, validate_cpu_share, Admission, Container,
    ContainerStatus, PortBinding, Transition, VolumeBinding,
};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const EXIT_EVENT_WAIT: Duration = Duration::from_millis(250);
const NAME_ATTEMPTS: usize = 16;
const MAX_PENDING_EXITS: usize = 1024;

/// Orchestrates containers across the store, networks and runtime
pub struct ContainerManager {
    store: Arc<ResourceStore>,
    networks: Arc<NetworkManager>,
    runtime: Arc<dyn ContainerRuntime>,
    config: LifecycleConfig,
    /// Exits that arrived while their container was mid-transition, by pid
    pending_exits: StdMutex<HashMap<u32, Option<i32>>>,
}

impl ContainerManager {
    pub fn new(
        store: Arc<ResourceStore>,
        networks: Arc<NetworkManager>,
        runtime: Arc<dyn ContainerRuntime>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            networks,
            runtime,
            config,
            pending_exits: StdMutex::new(HashMap::new()),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Validate a request and register the container in `Created`
    pub async fn create(&self, request: CreateContainerRequest) -> Result<Container> {
        let mut container = build_container(request)?;

        if let Some(name) = &container.name_hint {
            validate_container_name(name)?;
        }

        let network = container.record.network.clone();
        if let Some(network) = &network {
            let addr = self.networks.attach(&container.record.id, network).await?;
            container.record.ip_address = Some(addr);
        }

        let result = self.register(&mut container).await;
        if result.is_err() {
            if let Some(network) = &network {
                self.networks.detach(&container.record.id, network).await;
            }
        }
        result?;

        let record = container.record;
        metrics::record_container_created();
        info!(
            container_id = %record.id,
            name = %record.name,
            image = %record.image,
            network = ?record.network,
            "Container created"
        );
        Ok(record)
    }

    /// Put the record, generating names until one is free when none was given
    async fn register(&self, container: &mut Draft) -> Result<()> {
        if let Some(name) = &container.name_hint {
            container.record.name = name.clone();
            return self.store.put(container.record.clone()).await;
        }

        for _ in 0..NAME_ATTEMPTS {
            container.record.name = generate_name();
            match self.store.put(container.record.clone()).await {
                Err(Error::NameConflict(_)) => continue,
                other => return other,
            }
        }

        container.record.name = format!("{}_{}", generate_name(), container.record.short_id());
        self.store.put(container.record.clone()).await
    }

    pub async fn inspect(&self, key: &str) -> Result<Container> {
        self.store.get(key).await
    }

    pub async fn list(&self) -> Vec<Container> {
        self.store.list().await
    }

    /// Start a `Created` or `Stopped` container; a running one is returned as is
    pub async fn start(&self, key: &str) -> Result<Container> {
        let (container, admission) = self
            .store
            .update(key, |c| {
                let admission = c.admit_start()?;
                if admission == Admission::Proceed {
                    c.transition = Some(Transition::Starting);
                }
                Ok((c.clone(), admission))
            })
            .await?;

        if admission == Admission::AlreadyInState {
            debug!(container_id = %container.id, "Container already running");
            return Ok(container);
        }

        let id = container.id.clone();
        info!(container_id = %id, name = %container.name, "Starting container");

        let spec = spawn_spec(&container);
        let mut exits = self.runtime.subscribe_exits();
        let spawned = timeout(self.config.runtime_timeout(), self.runtime.spawn(&spec)).await;

        let pid = match spawned {
            Ok(Ok(pid)) => pid,
            Ok(Err(e)) => {
                self.clear_transition(&id).await;
                metrics::record_start_failure("spawn");
                error!(container_id = %id, error = %e, "Container failed to start");
                return Err(Error::StartFailed(e.to_string()));
            }
            Err(_) => {
                // The spawn future was dropped mid-flight; free whatever it got to.
                if let Err(e) = self.runtime.release(&id).await {
                    warn!(container_id = %id, error = %e, "Cleanup after spawn timeout failed");
                }
                self.clear_transition(&id).await;
                metrics::record_start_failure("timeout");
                return Err(Error::RuntimeTimeout(format!(
                    "spawn of {} did not finish within {}s",
                    container.name, self.config.runtime_timeout_seconds
                )));
            }
        };

        let committed = self
            .store
            .update(&id, |c| {
                c.transition = None;
                c.set_status(ContainerStatus::Running)?;
                c.pid = Some(pid);
                c.started_at = Some(Utc::now());
                c.finished_at = None;
                c.exit_code = None;
                Ok(c.clone())
            })
            .await;

        let container = match committed {
            Ok(container) => container,
            Err(e) => {
                error!(container_id = %id, pid, error = %e, "Could not record started container, killing it");
                let _ = self.runtime.kill(pid).await;
                let _ = self.runtime.release(&id).await;
                return Err(e);
            }
        };

        metrics::record_container_started();
        info!(container_id = %id, pid, "Container started");

        // The process may already be gone; the exit monitor skipped its
        // event while the transition was still in flight.
        if !self.runtime.is_alive(pid).await {
            let exit_code = self.exit_code_of(&mut exits, pid).await;
            self.apply_exit(&ProcessExit {
                container_id: id.clone(),
                pid,
                exit_code,
            })
            .await;
            return self.store.get(&id).await;
        }

        Ok(container)
    }

    /// Stop a running container, escalating to SIGKILL after the grace period
    pub async fn stop(&self, key: &str, grace: Option<Duration>) -> Result<Container> {
        let (container, admission) = self
            .store
            .update(key, |c| {
                let admission = c.admit_stop()?;
                if admission == Admission::Proceed {
                    c.transition = Some(Transition::Stopping);
                }
                Ok((c.clone(), admission))
            })
            .await?;

        if admission == Admission::AlreadyInState {
            debug!(container_id = %container.id, "Container already stopped");
            return Ok(container);
        }

        let id = container.id.clone();
        let grace = grace.unwrap_or_else(|| self.config.stop_grace());
        info!(container_id = %id, name = %container.name, grace_secs = grace.as_secs(), "Stopping container");

        let mut exits = self.runtime.subscribe_exits();
        let forced = match container.pid {
            Some(pid) => match self.terminate(pid, grace).await {
                Ok(forced) => forced,
                Err(e) => {
                    self.clear_transition(&id).await;
                    warn!(container_id = %id, pid, error = %e, "Container did not die, leaving it running");
                    return Err(e);
                }
            },
            None => false,
        };

        let exit_code = match container.pid {
            Some(pid) => self.exit_code_of(&mut exits, pid).await,
            None => None,
        };
        let stopped = self
            .store
            .update(&id, |c| {
                c.transition = None;
                c.set_status(ContainerStatus::Stopped)?;
                c.finished_at = Some(Utc::now());
                if exit_code.is_some() {
                    c.exit_code = exit_code;
                }
                Ok(c.clone())
            })
            .await?;

        if let Err(e) = self.runtime.release(&id).await {
            warn!(container_id = %id, error = %e, "Failed to release runtime resources");
        }

        metrics::record_container_stopped(forced);
        info!(container_id = %id, forced, "Container stopped");
        Ok(stopped)
    }

    /// Stop when running, then start again
    pub async fn restart(&self, key: &str, grace: Option<Duration>) -> Result<Container> {
        let container = self.store.get(key).await?;
        if container.is_running() {
            self.stop(&container.id, grace).await?;
        }
        self.start(&container.id).await
    }

    /// Remove a container that is not running
    pub async fn remove(&self, key: &str) -> Result<()> {
        let container = self
            .store
            .update(key, |c| {
                c.admit_remove()?;
                c.set_status(ContainerStatus::Removing)?;
                Ok(c.clone())
            })
            .await?;

        self.finish_removal(&container).await?;
        metrics::record_container_removed();
        info!(container_id = %container.id, name = %container.name, "Container removed");
        Ok(())
    }

    async fn finish_removal(&self, container: &Container) -> Result<()> {
        let id = &container.id;
        match timeout(self.config.runtime_timeout(), self.runtime.remove(id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(container_id = %id, error = %e, "Failed to remove container files"),
            Err(_) => warn!(container_id = %id, "Timed out removing container files"),
        }

        if let Some(network) = &container.network {
            self.networks.detach(id, network).await;
        }

        self.store
            .update(id, |c| {
                c.ip_address = None;
                c.set_status(ContainerStatus::Removed)
            })
            .await?;
        self.store.delete(id).await?;
        Ok(())
    }

    /// Live log output of a container
    pub async fn logs(&self, key: &str, follow: bool) -> Result<LogStream> {
        let container = self.store.get(key).await?;
        let path = self.runtime.log_path(&container.id);
        Ok(logs::follow(
            self.store.clone(),
            container.id,
            path,
            follow,
            self.config.log_poll_interval(),
        ))
    }

    /// Launch a command inside a running container
    pub async fn exec(&self, key: &str, request: &ExecRequest, interactive: bool) -> Result<ExecSession> {
        if request.command.is_empty() || request.command[0].trim().is_empty() {
            return Err(Error::validation("exec command must not be empty"));
        }

        let container = self.store.get(key).await?;
        let pid = match (container.status, container.pid) {
            (ContainerStatus::Running, Some(pid)) => pid,
            _ => {
                return Err(Error::conflict(format!(
                    "container {} is not running",
                    container.name
                )))
            }
        };

        let mut env = container.environment.clone();
        env.extend(request.env.clone());
        let spec = ExecSpec {
            container_id: container.id.clone(),
            pid,
            argv: request.command.clone(),
            env,
            interactive,
        };

        let session = match timeout(self.config.runtime_timeout(), self.runtime.exec(&spec)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return Err(Error::Internal(e.to_string())),
            Err(_) => {
                return Err(Error::RuntimeTimeout(format!(
                    "exec in {} did not launch",
                    container.name
                )))
            }
        };

        metrics::record_exec(if interactive {
            "interactive"
        } else if request.stream {
            "stream"
        } else {
            "collect"
        });
        debug!(container_id = %container.id, command = ?request.command, "Exec started");
        Ok(session)
    }

    /// Bring stored state in line with reality after a daemon restart
    pub async fn reconcile(&self) {
        for container in self.store.list().await {
            let id = container.id.clone();

            if container.transition.is_some() {
                warn!(container_id = %id, transition = ?container.transition, "Clearing interrupted transition");
                self.clear_transition(&id).await;
            }

            match container.status {
                ContainerStatus::Running => {
                    let alive = match container.pid {
                        Some(pid) => self.runtime.is_alive(pid).await,
                        None => false,
                    };
                    if alive {
                        continue;
                    }
                    let updated = self
                        .store
                        .update(&id, |c| {
                            c.set_status(ContainerStatus::Stopped)?;
                            if c.finished_at.is_none() {
                                c.finished_at = Some(Utc::now());
                            }
                            Ok(())
                        })
                        .await;
                    match updated {
                        Ok(()) => {
                            info!(container_id = %id, "Marked dead container as stopped");
                            let _ = self.runtime.release(&id).await;
                        }
                        Err(e) => warn!(container_id = %id, error = %e, "Failed to reconcile container"),
                    }
                }
                ContainerStatus::Removing => {
                    info!(container_id = %id, "Finishing interrupted removal");
                    if let Err(e) = self.finish_removal(&container).await {
                        warn!(container_id = %id, error = %e, "Failed to finish removal");
                    }
                }
                _ => {}
            }
        }
    }

    /// Follow runtime exit events for the life of the daemon.
    ///
    /// Processes the runtime did not spawn itself (kept by `reconcile`) never
    /// produce an event, so running containers are also swept on a timer.
    pub fn spawn_exit_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut exits = self.runtime.subscribe_exits();
        let period = self.config.liveness_sweep();

        tokio::spawn(async move {
            let mut liveness = interval(period);
            liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut suspects = HashSet::new();
            loop {
                tokio::select! {
                    biased;
                    received = exits.recv() => match received {
                        Ok(exit) => manager.handle_exit(exit).await,
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "Exit monitor lagged, sweeping running containers");
                            manager.sweep().await;
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = liveness.tick() => suspects = manager.sweep_confirmed(&suspects).await,
                }
            }
            debug!("Exit monitor finished");
        })
    }

    async fn handle_exit(&self, exit: ProcessExit) {
        metrics::record_container_exit(exit.exit_code);
        if !self.apply_exit(&exit).await {
            let mut pending = self
                .pending_exits
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if pending.len() >= MAX_PENDING_EXITS {
                pending.clear();
            }
            pending.insert(exit.pid, exit.exit_code);
        }
    }

    /// Record a crash. Returns false when the exit belongs to an operation
    /// still in flight (or to nothing we know).
    async fn apply_exit(&self, exit: &ProcessExit) -> bool {
        let applied = self
            .store
            .update(&exit.container_id, |c| {
                if c.pid != Some(exit.pid) || c.transition.is_some() || !c.is_running() {
                    return Ok(false);
                }
                c.set_status(ContainerStatus::Stopped)?;
                c.exit_code = exit.exit_code;
                c.finished_at = Some(Utc::now());
                Ok(true)
            })
            .await
            .unwrap_or(false);

        if applied {
            info!(
                container_id = %exit.container_id,
                pid = exit.pid,
                exit_code = ?exit.exit_code,
                "Container exited"
            );
            if let Err(e) = self.runtime.release(&exit.container_id).await {
                warn!(container_id = %exit.container_id, error = %e, "Failed to release runtime resources");
            }
        }
        applied
    }

    /// Running containers whose process is gone
    async fn dead_processes(&self) -> Vec<(String, u32)> {
        let mut dead = Vec::new();
        for container in self.store.list().await {
            let (true, Some(pid)) = (container.is_running(), container.pid) else {
                continue;
            };
            if !self.runtime.is_alive(pid).await {
                dead.push((container.id, pid));
            }
        }
        dead
    }

    async fn sweep(&self) {
        for (container_id, pid) in self.dead_processes().await {
            self.apply_exit(&ProcessExit {
                container_id,
                pid,
                exit_code: None,
            })
            .await;
        }
    }

    /// Record only deaths already seen on the previous tick, so the runtime's
    /// own exit event (which carries the code) wins when there is one.
    /// Returns the pids seen dead for the first time.
    async fn sweep_confirmed(&self, suspects: &HashSet<u32>) -> HashSet<u32> {
        let mut unconfirmed = HashSet::new();
        for (container_id, pid) in self.dead_processes().await {
            if !suspects.contains(&pid) {
                unconfirmed.insert(pid);
                continue;
            }
            debug!(container_id = %container_id, pid, "Process gone without an exit event");
            self.apply_exit(&ProcessExit {
                container_id,
                pid,
                exit_code: None,
            })
            .await;
        }
        unconfirmed
    }

    /// Stop every running container, used at shutdown
    pub async fn stop_all(&self) {
        let running: Vec<Container> = self
            .store
            .list()
            .await
            .into_iter()
            .filter(Container::is_running)
            .collect();
        if running.is_empty() {
            return;
        }

        info!(count = running.len(), "Stopping running containers");
        let results = join_all(running.iter().map(|c| self.stop(&c.id, None))).await;
        for (container, result) in running.iter().zip(results) {
            if let Err(e) = result {
                error!(container_id = %container.id, error = %e, "Failed to stop container at shutdown");
            }
        }
    }

    /// SIGTERM, wait, SIGKILL, wait. Ok(true) means the kill was needed.
    async fn terminate(&self, pid: u32, grace: Duration) -> Result<bool> {
        let limit = self.config.runtime_timeout();

        match timeout(limit, self.runtime.signal(pid, Signal::SIGTERM)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(pid, error = %e, "SIGTERM failed"),
            Err(_) => warn!(pid, "SIGTERM delivery timed out"),
        }
        if self.wait_for_exit(pid, grace).await {
            return Ok(false);
        }

        warn!(pid, "Grace period elapsed, sending SIGKILL");
        match timeout(limit, self.runtime.kill(pid)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(pid, error = %e, "SIGKILL failed"),
            Err(_) => warn!(pid, "SIGKILL delivery timed out"),
        }
        if self.wait_for_exit(pid, limit).await {
            return Ok(true);
        }

        Err(Error::RuntimeTimeout(format!(
            "process {} still alive {}s after SIGKILL",
            pid, self.config.runtime_timeout_seconds
        )))
    }

    async fn wait_for_exit(&self, pid: u32, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        loop {
            if !self.runtime.is_alive(pid).await {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn clear_transition(&self, id: &str) {
        let cleared = self
            .store
            .update(id, |c| {
                c.transition = None;
                Ok(())
            })
            .await;
        if let Err(e) = cleared {
            warn!(container_id = %id, error = %e, "Failed to clear transition marker");
        }
    }

    fn take_pending_exit(&self, pid: u32) -> Option<i32> {
        self.pending_exits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&pid)
            .flatten()
    }

    /// Exit status of a process already known to be dead. The runtime marks
    /// a process dead slightly before it publishes the exit event.
    async fn exit_code_of(
        &self,
        exits: &mut broadcast::Receiver<ProcessExit>,
        pid: u32,
    ) -> Option<i32> {
        let observed = timeout(EXIT_EVENT_WAIT, async {
            loop {
                match exits.recv().await {
                    Ok(exit) if exit.pid == pid => return exit.exit_code,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .await
        .ok()
        .flatten();

        let parked = self.take_pending_exit(pid);
        observed.or(parked)
    }
}

/// A container being built from a request, before a name is settled
struct Draft {
    record: Container,
    name_hint: Option<String>,
}

fn build_container(request: CreateContainerRequest) -> Result<Draft> {
    let image = request.image.trim().to_string();
    if image.is_empty() {
        return Err(Error::validation("image must not be empty"));
    }
    let command = request.command.trim().to_string();
    if command.is_empty() {
        return Err(Error::validation("command must not be empty"));
    }

    let volume = request
        .volume
        .iter()
        .map(|v| v.parse::<VolumeBinding>())
        .collect::<Result<Vec<_>>>()?;

    let port_mapping = request
        .port_mapping
        .iter()
        .map(|p| p.parse::<PortBinding>())
        .collect::<Result<Vec<_>>>()?;
    let mut seen = HashSet::new();
    for port in &port_mapping {
        if !seen.insert((port.host_port, port.protocol)) {
            return Err(Error::validation(format!(
                "host port {} is published twice",
                port.host_port
            )));
        }
    }

    if let Some(memory) = &request.memory {
        parse_memory(memory)?;
    }
    if let Some(shares) = request.cpu_share {
        validate_cpu_share(shares)?;
    }
    if let Some(cpus) = &request.cpu_set {
        parse_cpu_set(cpus)?;
    }
    validate_environment(&request.environment)?;

    let mut record = Container::new(String::new(), image, command);
    record.volume = volume;
    record.port_mapping = port_mapping;
    record.memory = request.memory.map(|m| m.trim().to_string());
    record.cpu_share = request.cpu_share;
    record.cpu_set = request.cpu_set.map(|c| c.trim().to_string());
    record.network = request.network.map(|n| n.trim().to_string());
    record.environment = request.environment;
    record.detach = request.detach;
    record.tty = request.tty;

    Ok(Draft {
        record,
        name_hint: request.name.map(|n| n.trim().to_string()),
    })
}

fn validate_environment(env: &BTreeMap<String, String>) -> Result<()> {
    for key in env.keys() {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            return Err(Error::validation(format!(
                "invalid environment variable name {:?}",
                key
            )));
        }
    }
    Ok(())
}

fn spawn_spec(container: &Container) -> SpawnSpec {
    // Limits were validated at create; anything unparsable here is skipped.
    let limits = ResourceLimits {
        memory_bytes: container.memory.as_deref().and_then(|m| parse_memory(m).ok()),
        cpu_weight: container.cpu_share.map(shares_to_weight),
        cpu_set: container.cpu_set.clone(),
    };

    SpawnSpec {
        container_id: container.id.clone(),
        name: container.name.clone(),
        argv: container.argv(),
        env: container.environment.clone(),
        volumes: container.volume.clone(),
        limits,
        network: container.network.clone(),
        ip_address: container.ip_address,
    }
}
