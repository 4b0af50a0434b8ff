//! Host process runtime
//!
//! Each container is a process group started from
//! `<root>/<id>/rootfs` with stdout and stderr appended to
//! `<root>/<id>/container.log`. Optional isolation comes from `unshare`,
//! optional limits from a cgroup v2 directory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::cgroup::Cgroup;
use super::{
    exit_code_of, ContainerRuntime, ExecSession, ExecSpec, ProcessExit, RuntimeError, SpawnSpec,
};
use crate::config::RuntimeConfig;

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const LOG_FILE: &str = "container.log";
const MOUNTS_FILE: &str = "mounts.json";

/// Bind recorded in `mounts.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MountRecord {
    host_path: PathBuf,
    container_path: PathBuf,
    link: PathBuf,
    read_only: bool,
}

/// OS resources held for one container until `release`.
///
/// Recorded in the runtime as each piece is created, so a spawn that is
/// abandoned half way still leaves everything reachable from `release`.
#[derive(Debug, Default)]
struct Allocation {
    cgroup: Option<Cgroup>,
    links: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
struct ChildState {
    container_id: String,
    exited: bool,
}

/// Runs containers as host process groups
pub struct ProcessRuntime {
    root: PathBuf,
    unshare: Option<PathBuf>,
    nsenter: Option<PathBuf>,
    cgroup_root: Option<PathBuf>,
    allocations: Mutex<HashMap<String, Allocation>>,
    children: Arc<Mutex<HashMap<u32, ChildState>>>,
    exits: broadcast::Sender<ProcessExit>,
}

impl ProcessRuntime {
    /// Build the runtime rooted at `root` (normally `<data_dir>/containers`)
    pub async fn new(root: PathBuf, config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        tokio::fs::create_dir_all(&root).await?;

        let (unshare, nsenter) = if config.isolate {
            let unshare = which::which("unshare").ok();
            let nsenter = which::which("nsenter").ok();
            if unshare.is_none() {
                warn!("unshare not found, containers will run without namespace isolation");
            }
            (unshare, nsenter)
        } else {
            (None, None)
        };

        if let Some(cgroup_root) = &config.cgroup_root {
            tokio::fs::create_dir_all(cgroup_root).await?;
        }

        let (exits, _) = broadcast::channel(256);

        info!(
            root = %root.display(),
            isolated = unshare.is_some(),
            cgroups = config.cgroup_root.is_some(),
            "Process runtime initialized"
        );

        Ok(Self {
            root,
            unshare,
            nsenter,
            cgroup_root: config.cgroup_root.clone(),
            allocations: Mutex::new(HashMap::new()),
            children: Arc::new(Mutex::new(HashMap::new())),
            exits,
        })
    }

    fn track(&self, container_id: &str, record: impl FnOnce(&mut Allocation)) {
        let mut allocations = lock(&self.allocations);
        record(allocations.entry(container_id.to_string()).or_default());
    }

    fn take_allocation(&self, container_id: &str) -> Option<Allocation> {
        lock(&self.allocations).remove(container_id)
    }

    fn container_dir(&self, container_id: &str) -> PathBuf {
        self.root.join(container_id)
    }

    fn rootfs(&self, container_id: &str) -> PathBuf {
        self.container_dir(container_id).join("rootfs")
    }

    /// Link every volume into the rootfs and record them in `mounts.json`
    async fn bind_volumes(&self, spec: &SpawnSpec) -> Result<(), RuntimeError> {
        let rootfs = self.rootfs(&spec.container_id);
        let mut records = Vec::with_capacity(spec.volumes.len());

        for volume in &spec.volumes {
            if !tokio::fs::try_exists(&volume.host_path).await? {
                return Err(RuntimeError::MissingVolumeSource(volume.host_path.clone()));
            }

            let relative = volume
                .container_path
                .strip_prefix("/")
                .unwrap_or(volume.container_path.as_path());
            let link = rootfs.join(relative);
            if let Some(parent) = link.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if tokio::fs::symlink_metadata(&link).await.is_ok() {
                tokio::fs::remove_file(&link).await?;
            }
            tokio::fs::symlink(&volume.host_path, &link).await?;
            self.track(&spec.container_id, |a| a.links.push(link.clone()));

            debug!(
                container_id = %spec.container_id,
                host = %volume.host_path.display(),
                target = %volume.container_path.display(),
                "Volume bound"
            );
            records.push(MountRecord {
                host_path: volume.host_path.clone(),
                container_path: volume.container_path.clone(),
                link,
                read_only: volume.read_only,
            });
        }

        let json = serde_json::to_string_pretty(&records)
            .map_err(|e| RuntimeError::InvalidSpec(e.to_string()))?;
        tokio::fs::write(self.container_dir(&spec.container_id).join(MOUNTS_FILE), json).await?;
        Ok(())
    }

    fn build_command(
        &self,
        spec: &SpawnSpec,
        cgroup: Option<&Cgroup>,
    ) -> Result<Command, RuntimeError> {
        let mut argv: Vec<String> = Vec::new();
        if let Some(unshare) = &self.unshare {
            argv.push(unshare.display().to_string());
            argv.extend(
                ["--fork", "--pid", "--mount-proc", "--uts", "--ipc", "--kill-child=SIGTERM"]
                    .map(String::from),
            );
        }
        argv.extend(spec.argv.iter().cloned());

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(self.rootfs(&spec.container_id))
            .env_clear()
            .env("PATH", DEFAULT_PATH)
            .env("HOSTNAME", &spec.name)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .process_group(0)
            .kill_on_drop(false);
        if let Some(addr) = spec.ip_address {
            cmd.env("ZDOCKER_IP", addr.to_string());
        }
        if let Some(network) = &spec.network {
            cmd.env("ZDOCKER_NETWORK", network);
        }
        if let Some(cgroup) = cgroup {
            let join = cgroup.join_hook()?;
            // SAFETY: the hook only issues open/write/close on a path prepared
            // before the fork.
            unsafe {
                cmd.pre_exec(join);
            }
        }
        Ok(cmd)
    }

    async fn try_spawn(&self, spec: &SpawnSpec) -> Result<u32, RuntimeError> {
        let dir = self.container_dir(&spec.container_id);
        tokio::fs::create_dir_all(self.rootfs(&spec.container_id)).await?;

        self.bind_volumes(spec).await?;

        let mut cgroup = None;
        if let Some(root) = &self.cgroup_root {
            let created = Cgroup::create(root, &spec.container_id).await?;
            self.track(&spec.container_id, |a| a.cgroup = Some(created.clone()));
            created.apply(&spec.limits).await?;
            cgroup = Some(created);
        } else if !spec.limits.is_empty() {
            warn!(
                container_id = %spec.container_id,
                "Resource limits requested but no cgroup root configured"
            );
        }

        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LOG_FILE))?;
        let log_err = log.try_clone()?;

        let mut cmd = self.build_command(spec, cgroup.as_ref())?;
        cmd.stdout(Stdio::from(log)).stderr(Stdio::from(log_err));

        // No await from here on: once the child exists it is registered and
        // watched before control can leave this function.
        let child = cmd
            .spawn()
            .map_err(|e| RuntimeError::Spawn(format!("{}: {}", spec.argv[0], e)))?;
        let pid = child
            .id()
            .ok_or_else(|| RuntimeError::Spawn("process exited before reporting a pid".into()))?;

        lock(&*self.children).insert(
            pid,
            ChildState {
                container_id: spec.container_id.clone(),
                exited: false,
            },
        );
        self.watch(spec.container_id.clone(), pid, child);
        Ok(pid)
    }

    /// Reap the child in the background and broadcast its exit
    fn watch(&self, container_id: String, pid: u32, mut child: Child) {
        let children = self.children.clone();
        let exits = self.exits.clone();
        tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => exit_code_of(status),
                Err(e) => {
                    error!(container_id = %container_id, pid, error = %e, "Failed to wait for container process");
                    None
                }
            };
            if let Some(state) = lock(&*children).get_mut(&pid) {
                state.exited = true;
            }
            info!(container_id = %container_id, pid, exit_code = ?exit_code, "Container process exited");
            let _ = exits.send(ProcessExit {
                container_id,
                pid,
                exit_code,
            });
        });
    }

    /// Remove volume links, the mount record and the cgroup
    async fn free(&self, container_id: &str, allocation: Allocation) {
        for link in &allocation.links {
            let _ = tokio::fs::remove_file(link).await;
        }
        let _ = tokio::fs::remove_file(self.container_dir(container_id).join(MOUNTS_FILE)).await;
        if let Some(cgroup) = &allocation.cgroup {
            cgroup.destroy().await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn send_group_signal(pid: u32, sig: Signal) -> Result<(), RuntimeError> {
    let pgid = i32::try_from(pid).map_err(|_| RuntimeError::Signal {
        pid,
        reason: "pid out of range".into(),
    })?;
    match signal::killpg(Pid::from_raw(pgid), sig) {
        // Already gone; the waiter reports the exit.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(RuntimeError::Signal {
            pid,
            reason: e.to_string(),
        }),
    }
}

#[async_trait]
impl ContainerRuntime for ProcessRuntime {
    fn isolation(&self) -> &'static str {
        match (self.unshare.is_some(), self.cgroup_root.is_some()) {
            (true, true) => "namespaces+cgroups",
            (true, false) => "namespaces",
            (false, true) => "cgroups",
            (false, false) => "process",
        }
    }

    async fn spawn(&self, spec: &SpawnSpec) -> Result<u32, RuntimeError> {
        if spec.argv.is_empty() {
            return Err(RuntimeError::InvalidSpec("empty command".into()));
        }

        match self.try_spawn(spec).await {
            Ok(pid) => {
                info!(container_id = %spec.container_id, pid, "Container process spawned");
                Ok(pid)
            }
            Err(e) => {
                warn!(container_id = %spec.container_id, error = %e, "Spawn failed, rolling back");
                let allocation = self.take_allocation(&spec.container_id).unwrap_or_default();
                self.free(&spec.container_id, allocation).await;
                Err(e)
            }
        }
    }

    async fn signal(&self, pid: u32, signal: Signal) -> Result<(), RuntimeError> {
        debug!(pid, signal = ?signal, "Signalling container");
        send_group_signal(pid, signal)
    }

    async fn kill(&self, pid: u32) -> Result<(), RuntimeError> {
        debug!(pid, "Killing container");
        send_group_signal(pid, Signal::SIGKILL)
    }

    async fn is_alive(&self, pid: u32) -> bool {
        if lock(&*self.children).get(&pid).is_some_and(|state| state.exited) {
            return false;
        }
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        // EPERM means the pid exists but belongs to someone else.
        matches!(
            signal::kill(Pid::from_raw(raw), None::<Signal>),
            Ok(()) | Err(Errno::EPERM)
        )
    }

    async fn exec(&self, spec: &ExecSpec) -> Result<ExecSession, RuntimeError> {
        if spec.argv.is_empty() {
            return Err(RuntimeError::InvalidSpec("empty exec command".into()));
        }

        let mut argv: Vec<String> = Vec::new();
        if let (Some(_), Some(nsenter)) = (&self.unshare, &self.nsenter) {
            argv.push(nsenter.display().to_string());
            argv.extend([
                "--target".to_string(),
                spec.pid.to_string(),
                "--mount".to_string(),
                "--uts".to_string(),
                "--ipc".to_string(),
                "--".to_string(),
            ]);
        }
        argv.extend(spec.argv.iter().cloned());

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(self.rootfs(&spec.container_id))
            .env_clear()
            .env("PATH", DEFAULT_PATH)
            .envs(&spec.env)
            .stdin(if spec.interactive {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| RuntimeError::Exec(format!("{}: {}", spec.argv[0], e)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Exec("stdout not captured".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| RuntimeError::Exec("stderr not captured".into()))?;

        let stdin = match child.stdin.take() {
            Some(mut pipe) => {
                let (tx, mut rx) = mpsc::channel::<Bytes>(16);
                tokio::spawn(async move {
                    while let Some(chunk) = rx.recv().await {
                        if pipe.write_all(&chunk).await.is_err() {
                            break;
                        }
                    }
                    // pipe dropped here: the command sees EOF
                });
                Some(tx)
            }
            None => None,
        };

        let (out_tx, out_rx) = mpsc::channel::<Bytes>(64);
        let (exit_tx, exit_rx) = oneshot::channel();
        let container_id = spec.container_id.clone();

        tokio::spawn(async move {
            let mut out_buf = vec![0u8; 8192];
            let mut err_buf = vec![0u8; 8192];
            let mut out_open = true;
            let mut err_open = true;

            let cancelled = loop {
                if !out_open && !err_open {
                    break false;
                }
                tokio::select! {
                    _ = out_tx.closed() => break true,
                    read = stdout.read(&mut out_buf), if out_open => match read {
                        Ok(0) | Err(_) => out_open = false,
                        Ok(n) => {
                            if out_tx.send(Bytes::copy_from_slice(&out_buf[..n])).await.is_err() {
                                break true;
                            }
                        }
                    },
                    read = stderr.read(&mut err_buf), if err_open => match read {
                        Ok(0) | Err(_) => err_open = false,
                        Ok(n) => {
                            if out_tx.send(Bytes::copy_from_slice(&err_buf[..n])).await.is_err() {
                                break true;
                            }
                        }
                    },
                }
            };

            if cancelled {
                debug!(container_id = %container_id, "Exec consumer went away, killing command");
                let _ = child.start_kill();
            }
            let exit_code = child.wait().await.ok().and_then(exit_code_of);
            let _ = exit_tx.send(exit_code);
        });

        Ok(ExecSession {
            stdin,
            output: out_rx,
            exit: exit_rx,
        })
    }

    async fn release(&self, container_id: &str) -> Result<(), RuntimeError> {
        let Some(allocation) = self.take_allocation(container_id) else {
            return Ok(());
        };
        self.free(container_id, allocation).await;
        lock(&*self.children)
            .retain(|_, state| state.container_id != container_id || !state.exited);
        debug!(container_id = %container_id, "Runtime resources released");
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.release(container_id).await?;
        let dir = self.container_dir(container_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn log_path(&self, container_id: &str) -> PathBuf {
        self.container_dir(container_id).join(LOG_FILE)
    }

    fn subscribe_exits(&self) -> broadcast::Receiver<ProcessExit> {
        self.exits.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::time::Duration;

    use crate::container::VolumeBinding;

    async fn runtime(dir: &Path) -> ProcessRuntime {
        ProcessRuntime::new(dir.join("containers"), &RuntimeConfig::default())
            .await
            .unwrap()
    }

    async fn read_mounts(container_dir: &Path) -> Vec<PathBuf> {
        let content = tokio::fs::read_to_string(container_dir.join(MOUNTS_FILE))
            .await
            .unwrap();
        let records: Vec<MountRecord> = serde_json::from_str(&content).unwrap();
        records.into_iter().map(|r| r.container_path).collect()
    }

    fn spec(id: &str, argv: &[&str]) -> SpawnSpec {
        SpawnSpec {
            container_id: id.to_string(),
            name: id.to_string(),
            argv: argv.iter().map(|s| s.to_string()).collect(),
            env: BTreeMap::from([("GREETING".to_string(), "hi".to_string())]),
            volumes: Vec::new(),
            limits: Default::default(),
            network: None,
            ip_address: None,
        }
    }

    #[tokio::test]
    async fn test_spawn_logs_and_reports_exit() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path()).await;
        let mut exits = rt.subscribe_exits();

        let pid = rt
            .spawn(&spec("c1", &["sh", "-c", "echo $GREETING; exit 3"]))
            .await
            .unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(10), exits.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit.pid, pid);
        assert_eq!(exit.exit_code, Some(3));
        assert!(!rt.is_alive(pid).await);

        let log = tokio::fs::read_to_string(rt.log_path("c1")).await.unwrap();
        assert_eq!(log, "hi\n");
    }

    #[tokio::test]
    async fn test_kill_reports_signal_exit() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path()).await;
        let mut exits = rt.subscribe_exits();

        let pid = rt.spawn(&spec("c2", &["sleep", "30"])).await.unwrap();
        assert!(rt.is_alive(pid).await);
        rt.kill(pid).await.unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(10), exits.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit.exit_code, Some(128 + 9));
        rt.release("c2").await.unwrap();
        rt.release("c2").await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_volume_source_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path()).await;

        let good = dir.path().join("data");
        std::fs::create_dir(&good).unwrap();
        let mut s = spec("c3", &["true"]);
        s.volumes = vec![
            VolumeBinding {
                host_path: good,
                container_path: "/data".into(),
                read_only: false,
            },
            VolumeBinding {
                host_path: dir.path().join("missing"),
                container_path: "/other".into(),
                read_only: false,
            },
        ];

        let err = rt.spawn(&s).await.unwrap_err();
        assert!(matches!(err, RuntimeError::MissingVolumeSource(_)));
        let rootfs = dir.path().join("containers/c3/rootfs");
        assert!(std::fs::symlink_metadata(rootfs.join("data")).is_err());
        assert!(!dir.path().join("containers/c3/mounts.json").exists());
    }

    async fn cgroup_runtime(dir: &Path) -> ProcessRuntime {
        let config = RuntimeConfig {
            cgroup_root: Some(dir.join("cgroup")),
            ..RuntimeConfig::default()
        };
        ProcessRuntime::new(dir.join("containers"), &config)
            .await
            .unwrap()
    }

    fn with_volume(mut s: SpawnSpec, host: PathBuf) -> SpawnSpec {
        s.volumes = vec![VolumeBinding {
            host_path: host,
            container_path: "/data".into(),
            read_only: false,
        }];
        s.limits.memory_bytes = Some(64 << 20);
        s
    }

    #[tokio::test]
    async fn test_failed_cgroup_join_aborts_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let rt = cgroup_runtime(dir.path()).await;
        let host = dir.path().join("data");
        std::fs::create_dir(&host).unwrap();

        // A directory where the kernel file would be makes the join fail.
        std::fs::create_dir_all(dir.path().join("cgroup/c7/cgroup.procs")).unwrap();
        let mut exits = rt.subscribe_exits();

        let err = rt
            .spawn(&with_volume(spec("c7", &["sleep", "30"]), host))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn(_)), "{err}");
        assert!(!dir.path().join("cgroup/c7").exists());
        assert!(std::fs::symlink_metadata(dir.path().join("containers/c7/rootfs/data")).is_err());
        assert!(!dir.path().join("containers/c7/mounts.json").exists());
        assert!(exits.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_release_after_abandoned_spawn_frees_resources() {
        let dir = tempfile::tempdir().unwrap();
        let rt = cgroup_runtime(dir.path()).await;
        let host = dir.path().join("data");
        std::fs::create_dir(&host).unwrap();

        // Writing the memory limit into a FIFO with no reader blocks.
        let group = dir.path().join("cgroup/c8");
        std::fs::create_dir_all(&group).unwrap();
        let fifo = group.join("memory.max");
        let c_fifo = std::ffi::CString::new(fifo.to_str().unwrap()).unwrap();
        assert_eq!(unsafe { libc::mkfifo(c_fifo.as_ptr(), 0o644) }, 0);

        let s = with_volume(spec("c8", &["sleep", "30"]), host);
        let attempt = tokio::time::timeout(Duration::from_millis(200), rt.spawn(&s)).await;
        assert!(attempt.is_err());
        assert!(dir.path().join("containers/c8/mounts.json").exists());

        // Unblock the stuck writer so the blocking pool can wind down.
        let _reader = {
            use std::os::unix::fs::OpenOptionsExt;
            std::fs::OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&fifo)
                .unwrap()
        };

        rt.release("c8").await.unwrap();
        assert!(std::fs::symlink_metadata(dir.path().join("containers/c8/rootfs/data")).is_err());
        assert!(!dir.path().join("containers/c8/mounts.json").exists());
        assert!(!group.exists());
    }

    #[tokio::test]
    async fn test_volumes_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path()).await;
        let host = dir.path().join("data");
        std::fs::create_dir(&host).unwrap();

        let mut s = spec("c4", &["true"]);
        s.volumes = vec![VolumeBinding {
            host_path: host,
            container_path: "/srv/data".into(),
            read_only: true,
        }];
        rt.spawn(&s).await.unwrap();

        let mounts = read_mounts(&dir.path().join("containers/c4")).await;
        assert_eq!(mounts, vec![PathBuf::from("/srv/data")]);

        rt.remove("c4").await.unwrap();
        assert!(!dir.path().join("containers/c4").exists());
    }

    #[tokio::test]
    async fn test_exec_collects_output_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path()).await;
        let pid = rt.spawn(&spec("c5", &["sleep", "30"])).await.unwrap();

        let mut session = rt
            .exec(&ExecSpec {
                container_id: "c5".into(),
                pid,
                argv: vec!["sh".into(), "-c".into(), "echo out; exit 4".into()],
                env: BTreeMap::new(),
                interactive: false,
            })
            .await
            .unwrap();

        let mut output = Vec::new();
        while let Some(chunk) = session.output.recv().await {
            output.extend_from_slice(&chunk);
        }
        assert_eq!(output, b"out\n");
        assert_eq!(session.exit.await.unwrap(), Some(4));

        rt.kill(pid).await.unwrap();
    }

    #[tokio::test]
    async fn test_interactive_exec_reads_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path()).await;
        let pid = rt.spawn(&spec("c6", &["sleep", "30"])).await.unwrap();

        let mut session = rt
            .exec(&ExecSpec {
                container_id: "c6".into(),
                pid,
                argv: vec!["cat".into()],
                env: BTreeMap::new(),
                interactive: true,
            })
            .await
            .unwrap();

        let stdin = session.stdin.take().unwrap();
        stdin.send(Bytes::from_static(b"ping\n")).await.unwrap();
        drop(stdin);

        let chunk = session.output.recv().await.unwrap();
        assert_eq!(&chunk[..], b"ping\n");
        assert_eq!(session.exit.await.unwrap(), Some(0));

        rt.kill(pid).await.unwrap();
    }
}
