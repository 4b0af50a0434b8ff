//! In-memory runtime for lifecycle tests

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use nix::sys::signal::Signal;
use tokio::sync::{broadcast, mpsc, oneshot};

use super::{ContainerRuntime, ExecSession, ExecSpec, ProcessExit, RuntimeError, SpawnSpec};

pub struct FakeRuntime {
    next_pid: AtomicU32,
    pub spawns: AtomicUsize,
    pub spawn_delay: Mutex<Duration>,
    pub fail_spawn: AtomicBool,
    /// SIGTERM is ignored; only SIGKILL stops the process
    pub ignore_term: AtomicBool,
    /// Nothing stops the process
    pub unkillable: AtomicBool,
    /// Set when a streaming exec noticed its consumer left
    pub exec_cancelled: Arc<AtomicBool>,
    alive: Mutex<HashMap<u32, String>>,
    pub released: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    exits: broadcast::Sender<ProcessExit>,
    logs: tempfile::TempDir,
}

impl FakeRuntime {
    pub fn new() -> Self {
        let (exits, _) = broadcast::channel(64);
        Self {
            next_pid: AtomicU32::new(1000),
            spawns: AtomicUsize::new(0),
            spawn_delay: Mutex::new(Duration::ZERO),
            fail_spawn: AtomicBool::new(false),
            ignore_term: AtomicBool::new(false),
            unkillable: AtomicBool::new(false),
            exec_cancelled: Arc::new(AtomicBool::new(false)),
            alive: Mutex::new(HashMap::new()),
            released: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            exits,
            logs: tempfile::tempdir().unwrap(),
        }
    }

    pub fn with_spawn_delay(self, delay: Duration) -> Self {
        *self.spawn_delay.lock().unwrap() = delay;
        self
    }

    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }

    pub fn append_log(&self, container_id: &str, text: &str) {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(container_id))
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    /// Simulate the process dying on its own
    pub fn crash(&self, pid: u32, exit_code: i32) {
        self.terminate(pid, Some(exit_code));
    }

    /// Pretend a process from an earlier daemon is still running
    pub fn adopt(&self, pid: u32, container_id: &str) {
        self.alive
            .lock()
            .unwrap()
            .insert(pid, container_id.to_string());
    }

    /// The process disappears without an exit event
    pub fn vanish(&self, pid: u32) {
        self.alive.lock().unwrap().remove(&pid);
    }

    fn terminate(&self, pid: u32, exit_code: Option<i32>) {
        if let Some(container_id) = self.alive.lock().unwrap().remove(&pid) {
            let _ = self.exits.send(ProcessExit {
                container_id,
                pid,
                exit_code,
            });
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn isolation(&self) -> &'static str {
        "fake"
    }

    async fn spawn(&self, spec: &SpawnSpec) -> Result<u32, RuntimeError> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        let delay = *self.spawn_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(RuntimeError::Spawn("injected failure".into()));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.alive
            .lock()
            .unwrap()
            .insert(pid, spec.container_id.clone());
        self.append_log(&spec.container_id, &format!("started {}\n", spec.name));
        Ok(pid)
    }

    async fn signal(&self, pid: u32, signal: Signal) -> Result<(), RuntimeError> {
        let ignores = self.unkillable.load(Ordering::SeqCst)
            || (signal == Signal::SIGTERM && self.ignore_term.load(Ordering::SeqCst));
        if !ignores {
            self.terminate(pid, Some(128 + signal as i32));
        }
        Ok(())
    }

    async fn kill(&self, pid: u32) -> Result<(), RuntimeError> {
        if !self.unkillable.load(Ordering::SeqCst) {
            self.terminate(pid, Some(137));
        }
        Ok(())
    }

    async fn is_alive(&self, pid: u32) -> bool {
        self.alive.lock().unwrap().contains_key(&pid)
    }

    async fn exec(&self, spec: &ExecSpec) -> Result<ExecSession, RuntimeError> {
        let (out_tx, out_rx) = mpsc::channel(8);
        let (exit_tx, exit_rx) = oneshot::channel();

        match spec.argv.first().map(String::as_str) {
            Some("yes") => {
                let cancelled = self.exec_cancelled.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = out_tx.closed() => break,
                            _ = tokio::time::sleep(Duration::from_millis(5)) => {
                                if out_tx.send(Bytes::from_static(b"y\n")).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    cancelled.store(true, Ordering::SeqCst);
                    let _ = exit_tx.send(None);
                });
            }
            Some(program) => {
                let exit_code = if program == "false" { 1 } else { 0 };
                let line = format!("{}\n", spec.argv.join(" "));
                tokio::spawn(async move {
                    let _ = out_tx.send(Bytes::from(line)).await;
                    let _ = exit_tx.send(Some(exit_code));
                });
            }
            None => return Err(RuntimeError::InvalidSpec("empty exec command".into())),
        }

        Ok(ExecSession {
            stdin: None,
            output: out_rx,
            exit: exit_rx,
        })
    }

    async fn release(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.released.lock().unwrap().push(container_id.to_string());
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.removed.lock().unwrap().push(container_id.to_string());
        Ok(())
    }

    fn log_path(&self, container_id: &str) -> PathBuf {
        self.logs.path().join(format!("{container_id}.log"))
    }

    fn subscribe_exits(&self) -> broadcast::Receiver<ProcessExit> {
        self.exits.subscribe()
    }
}
