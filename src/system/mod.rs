//! Host and build information

use std::path::Path;

use crate::container::ContainerStatus;
use crate::models::{SystemInfo, VersionInfo};
use crate::store::ResourceStore;

pub const API_VERSION: &str = "1.0";

/// Collect the host summary together with resource counts from the store
pub async fn system_info(store: &ResourceStore, root: &Path, isolation: &str) -> SystemInfo {
    let containers = store.list().await;
    let running = containers
        .iter()
        .filter(|c| c.status == ContainerStatus::Running)
        .count();
    let stopped = containers
        .iter()
        .filter(|c| c.status == ContainerStatus::Stopped)
        .count();
    let networks = store.list_networks().await.len();

    let meminfo = tokio::fs::read_to_string("/proc/meminfo").await.ok();
    let kernel = tokio::fs::read_to_string("/proc/sys/kernel/osrelease")
        .await
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "Unknown".to_string());

    SystemInfo {
        os: std::env::consts::OS.to_string(),
        architecture: std::env::consts::ARCH.to_string(),
        cpus: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        memory: meminfo
            .as_deref()
            .and_then(total_memory)
            .unwrap_or_else(|| "Unknown".to_string()),
        zdocker_root: root.display().to_string(),
        kernel_version: kernel,
        containers: containers.len(),
        containers_running: running,
        containers_stopped: stopped,
        networks,
        isolation: isolation.to_string(),
    }
}

/// `MemTotal` from /proc/meminfo as `"<n> kB"`
fn total_memory(meminfo: &str) -> Option<String> {
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix("MemTotal:")?;
        let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
        Some(format!("{} kB", kb))
    })
}

pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        api_version: API_VERSION.to_string(),
        build_date: option_env!("ZDOCKER_BUILD_DATE")
            .unwrap_or("unknown")
            .to_string(),
        git_commit: option_env!("ZDOCKER_GIT_COMMIT").map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;

    #[test]
    fn test_total_memory() {
        let sample = "MemTotal:       16318480 kB\nMemFree:         1234 kB\n";
        assert_eq!(total_memory(sample).as_deref(), Some("16318480 kB"));
        assert_eq!(total_memory("garbage"), None);
    }

    #[tokio::test]
    async fn test_system_info_counts() {
        let store = ResourceStore::in_memory();
        let mut running = Container::new("a".into(), "img".into(), "sleep 1".into());
        running.set_status(ContainerStatus::Running).unwrap();
        store.put(running).await.unwrap();
        store
            .put(Container::new("b".into(), "img".into(), "sleep 1".into()))
            .await
            .unwrap();

        let info = system_info(&store, Path::new("/var/lib/zdocker"), "process").await;
        assert_eq!(info.containers, 2);
        assert_eq!(info.containers_running, 1);
        assert_eq!(info.containers_stopped, 0);
        assert_eq!(info.zdocker_root, "/var/lib/zdocker");
        assert_eq!(info.isolation, "process");
        assert!(info.cpus >= 1);
    }

    #[test]
    fn test_version_info() {
        let v = version_info();
        assert_eq!(v.api_version, "1.0");
        assert_eq!(v.version, env!("CARGO_PKG_VERSION"));
    }
}
