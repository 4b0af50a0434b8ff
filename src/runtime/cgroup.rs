//! cgroup v2 resource limits
//!
//! One directory per container under the configured root. Limits are written
//! before the container process is moved into the group, and the move happens
//! in the forked child before `exec` so a failed join fails the spawn.

use std::ffi::{CStr, CString};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{ResourceLimits, RuntimeError};

/// Handle to a container's cgroup directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cgroup {
    path: PathBuf,
}

impl Cgroup {
    /// Create `<root>/<container_id>`
    pub async fn create(root: &Path, container_id: &str) -> Result<Self, RuntimeError> {
        let path = root.join(container_id);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| RuntimeError::Limits(format!("create {}: {}", path.display(), e)))?;
        info!(path = %path.display(), "cgroup created");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn apply(&self, limits: &ResourceLimits) -> Result<(), RuntimeError> {
        if let Some(bytes) = limits.memory_bytes {
            self.write("memory.max", bytes.to_string()).await?;
        }
        if let Some(weight) = limits.cpu_weight {
            self.write("cpu.weight", weight.to_string()).await?;
        }
        if let Some(cpus) = &limits.cpu_set {
            self.write("cpuset.cpus", cpus.clone()).await?;
        }
        Ok(())
    }

    async fn write(&self, file: &str, value: String) -> Result<(), RuntimeError> {
        let target = self.path.join(file);
        tokio::fs::write(&target, &value)
            .await
            .map_err(|e| RuntimeError::Limits(format!("write {}: {}", target.display(), e)))?;
        debug!(file = %target.display(), value = %value, "cgroup limit set");
        Ok(())
    }

    /// Hook for `Command::pre_exec` that moves the forked child into the group.
    ///
    /// The path is converted up front; after fork only raw syscalls run.
    pub fn join_hook(
        &self,
    ) -> Result<impl FnMut() -> io::Result<()> + Send + Sync + 'static, RuntimeError> {
        let procs = self.path.join("cgroup.procs");
        let procs = CString::new(procs.as_os_str().as_bytes())
            .map_err(|e| RuntimeError::Limits(format!("cgroup path {}: {}", procs.display(), e)))?;
        Ok(move || join_self(&procs))
    }

    /// Remove the group. The kernel only allows this once it has no members.
    pub async fn destroy(&self) {
        match tokio::fs::remove_dir(&self.path).await {
            Ok(()) => info!(path = %self.path.display(), "cgroup destroyed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                // Plain directories (tests, no cgroupfs) still hold the limit files.
                if tokio::fs::remove_dir_all(&self.path).await.is_err() {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove cgroup");
                }
            }
        }
    }
}

/// Write "0" (the calling process) to `cgroup.procs`
fn join_self(procs: &CStr) -> io::Result<()> {
    // SAFETY: `procs` is NUL terminated and outlives the calls; the buffer
    // passed to write is a static byte.
    unsafe {
        let fd = libc::open(
            procs.as_ptr(),
            libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC | libc::O_CLOEXEC,
            0o644,
        );
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let written = libc::write(fd, b"0".as_ptr().cast(), 1);
        let err = io::Error::last_os_error();
        libc::close(fd);
        if written != 1 {
            return Err(err);
        }
    }
    Ok(())
}
