//! Resource store
//!
//! Single owner of container and network records. Each container lives
//! behind its own lock so writers on different containers never contend;
//! the table lock is only held to look up or index a record.
//!
//! Optionally mirrors every mutation to a JSON snapshot on disk.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::container::{Container, ContainerStatus};
use crate::error::{Error, Result};
use crate::network::Network;

/// Shortest id prefix accepted as a container key
pub const MIN_PREFIX_LEN: usize = 4;

type ContainerHandle = Arc<Mutex<Container>>;

#[derive(Default)]
struct ContainerTable {
    by_id: HashMap<String, ContainerHandle>,
    /// name -> id
    names: HashMap<String, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    containers: Vec<Container>,
    #[serde(default)]
    networks: Vec<Network>,
}

/// Thread-safe registry of containers and networks
pub struct ResourceStore {
    containers: RwLock<ContainerTable>,
    networks: RwLock<BTreeMap<String, Network>>,
    /// Snapshot target; the mutex orders concurrent writers
    persist_path: Option<Mutex<PathBuf>>,
}

impl ResourceStore {
    /// Store without persistence
    pub fn in_memory() -> Self {
        Self {
            containers: RwLock::new(ContainerTable::default()),
            networks: RwLock::new(BTreeMap::new()),
            persist_path: None,
        }
    }

    /// Store backed by a JSON snapshot, loading it when present
    pub async fn open(path: &Path) -> Result<Self> {
        let snapshot = if tokio::fs::try_exists(path).await? {
            let content = tokio::fs::read_to_string(path).await?;
            serde_json::from_str::<Snapshot>(&content).map_err(|e| {
                Error::Internal(format!("failed to parse {}: {}", path.display(), e))
            })?
        } else {
            Snapshot::default()
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut table = ContainerTable::default();
        for container in snapshot.containers {
            if container.status == ContainerStatus::Removed {
                continue;
            }
            table.names.insert(container.name.clone(), container.id.clone());
            table
                .by_id
                .insert(container.id.clone(), Arc::new(Mutex::new(container)));
        }
        let networks: BTreeMap<String, Network> = snapshot
            .networks
            .into_iter()
            .map(|n| (n.name.clone(), n))
            .collect();

        info!(
            path = %path.display(),
            containers = table.by_id.len(),
            networks = networks.len(),
            "Resource store loaded"
        );

        Ok(Self {
            containers: RwLock::new(table),
            networks: RwLock::new(networks),
            persist_path: Some(Mutex::new(path.to_path_buf())),
        })
    }

    /// Insert a new container.
    ///
    /// Fails with `NameConflict` when another non-removed container holds the
    /// name.
    pub async fn put(&self, container: Container) -> Result<()> {
        {
            let mut table = self.containers.write().await;

            if let Some(existing_id) = table.names.get(&container.name).cloned() {
                let removed = match table.by_id.get(&existing_id) {
                    Some(handle) => handle.lock().await.status == ContainerStatus::Removed,
                    None => true,
                };
                if !removed {
                    return Err(Error::NameConflict(container.name));
                }
                table.by_id.remove(&existing_id);
            }
            if table.by_id.contains_key(&container.id) {
                return Err(Error::conflict(format!(
                    "container id {} already exists",
                    container.id
                )));
            }

            debug!(container_id = %container.id, name = %container.name, "Container stored");
            table
                .names
                .insert(container.name.clone(), container.id.clone());
            table
                .by_id
                .insert(container.id.clone(), Arc::new(Mutex::new(container)));
        }

        self.persist().await;
        Ok(())
    }

    /// Resolve `key` as exact id, exact name, then unique id prefix
    async fn resolve(&self, key: &str) -> Result<ContainerHandle> {
        let table = self.containers.read().await;

        if let Some(handle) = table.by_id.get(key) {
            return Ok(handle.clone());
        }
        if let Some(id) = table.names.get(key) {
            if let Some(handle) = table.by_id.get(id) {
                return Ok(handle.clone());
            }
        }
        if key.len() >= MIN_PREFIX_LEN {
            let mut matches = table.by_id.iter().filter(|(id, _)| id.starts_with(key));
            if let Some((_, handle)) = matches.next() {
                if matches.next().is_some() {
                    return Err(Error::validation(format!(
                        "container id prefix {:?} is ambiguous",
                        key
                    )));
                }
                return Ok(handle.clone());
            }
        }

        Err(Error::not_found(format!("container {}", key)))
    }

    /// Snapshot of one container
    pub async fn get(&self, key: &str) -> Result<Container> {
        let handle = self.resolve(key).await?;
        let container = handle.lock().await.clone();
        if container.status == ContainerStatus::Removed {
            return Err(Error::not_found(format!("container {}", key)));
        }
        Ok(container)
    }

    /// All non-removed containers, oldest first
    pub async fn list(&self) -> Vec<Container> {
        let handles: Vec<ContainerHandle> =
            self.containers.read().await.by_id.values().cloned().collect();

        let mut containers = Vec::with_capacity(handles.len());
        for handle in handles {
            let container = handle.lock().await.clone();
            if container.status != ContainerStatus::Removed {
                containers.push(container);
            }
        }
        containers.sort_by(|a, b| {
            a.created_time
                .cmp(&b.created_time)
                .then_with(|| a.name.cmp(&b.name))
        });
        containers
    }

    /// Atomically mutate one container.
    ///
    /// The closure runs on a copy under the container's own lock; the copy
    /// replaces the record only when the closure succeeds, so a failed
    /// update leaves nothing behind.
    pub async fn update<T, F>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Container) -> Result<T>,
    {
        let handle = self.resolve(key).await?;
        let out = {
            let mut guard = handle.lock().await;
            if guard.status == ContainerStatus::Removed {
                return Err(Error::not_found(format!("container {}", key)));
            }
            let mut draft = guard.clone();
            let out = f(&mut draft)?;
            *guard = draft;
            out
        };

        self.persist().await;
        Ok(out)
    }

    /// Drop a container record; only legal once it reached `Removed`
    pub async fn delete(&self, id: &str) -> Result<Container> {
        let container = {
            let mut table = self.containers.write().await;
            let handle = table
                .by_id
                .get(id)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("container {}", id)))?;
            let container = handle.lock().await.clone();
            if container.status != ContainerStatus::Removed {
                return Err(Error::conflict(format!(
                    "container {} is {}, not removed",
                    container.name, container.status
                )));
            }
            table.by_id.remove(id);
            if table.names.get(&container.name).map(String::as_str) == Some(id) {
                table.names.remove(&container.name);
            }
            container
        };

        self.persist().await;
        Ok(container)
    }

    /// Names of non-removed containers attached to `network`
    pub async fn containers_on_network(&self, network: &str) -> Vec<String> {
        self.list()
            .await
            .into_iter()
            .filter(|c| c.network.as_deref() == Some(network))
            .map(|c| c.name)
            .collect()
    }

    pub async fn put_network(&self, network: Network) -> Result<()> {
        {
            let mut networks = self.networks.write().await;
            if networks.contains_key(&network.name) {
                return Err(Error::NameConflict(network.name));
            }
            networks.insert(network.name.clone(), network);
        }
        self.persist().await;
        Ok(())
    }

    pub async fn get_network(&self, name: &str) -> Result<Network> {
        self.networks
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("network {}", name)))
    }

    pub async fn list_networks(&self) -> Vec<Network> {
        self.networks.read().await.values().cloned().collect()
    }

    pub async fn delete_network(&self, name: &str) -> Result<Network> {
        let network = self
            .networks
            .write()
            .await
            .remove(name)
            .ok_or_else(|| Error::not_found(format!("network {}", name)))?;
        self.persist().await;
        Ok(network)
    }

    /// Write the snapshot; failures are logged, memory stays authoritative
    async fn persist(&self) {
        let Some(path_lock) = &self.persist_path else {
            return;
        };
        let path = path_lock.lock().await;

        let snapshot = Snapshot {
            containers: self.list().await,
            networks: self.list_networks().await,
        };
        let json = match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize store snapshot");
                return;
            }
        };

        let tmp = path.with_extension("json.tmp");
        let result = async {
            tokio::fs::write(&tmp, json).await?;
            tokio::fs::rename(&tmp, &*path).await
        }
        .await;

        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to persist store snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ipam::Subnet;
    use pretty_assertions::assert_eq;

    fn container(name: &str) -> Container {
        Container::new(name.into(), "alpine".into(), "sleep 60".into())
    }

    fn network(name: &str, subnet: &str) -> Network {
        Network::new(name.into(), "bridge".into(), Subnet::parse(subnet).unwrap())
    }

    async fn mark_removed(store: &ResourceStore, key: &str) {
        store
            .update(key, |c| {
                c.set_status(ContainerStatus::Removing)?;
                c.set_status(ContainerStatus::Removed)
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_put_and_get_by_id_name_and_prefix() {
        let store = ResourceStore::in_memory();
        let c = container("web");
        let id = c.id.clone();
        store.put(c.clone()).await.unwrap();

        assert_eq!(store.get(&id).await.unwrap(), c);
        assert_eq!(store.get("web").await.unwrap().id, id);
        assert_eq!(store.get(&id[..8]).await.unwrap().id, id);
        assert!(matches!(store.get(&id[..3]).await, Err(Error::NotFound(_))));
        assert!(matches!(store.get("nope").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_name_conflict_until_removed() {
        let store = ResourceStore::in_memory();
        store.put(container("web")).await.unwrap();
        assert!(matches!(
            store.put(container("web")).await,
            Err(Error::NameConflict(_))
        ));

        mark_removed(&store, "web").await;
        assert!(matches!(store.get("web").await, Err(Error::NotFound(_))));
        store.put(container("web")).await.unwrap();
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_update_leaves_record_untouched() {
        let store = ResourceStore::in_memory();
        store.put(container("web")).await.unwrap();

        let result: Result<()> = store
            .update("web", |c| {
                c.pid = Some(7);
                Err(Error::conflict("nope"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.get("web").await.unwrap().pid, None);
    }

    #[tokio::test]
    async fn test_delete_requires_removed() {
        let store = ResourceStore::in_memory();
        let c = container("web");
        let id = c.id.clone();
        store.put(c).await.unwrap();

        assert!(matches!(store.delete(&id).await, Err(Error::Conflict(_))));
        mark_removed(&store, &id).await;
        store.delete(&id).await.unwrap();
        assert!(store.list().await.is_empty());
        assert!(matches!(store.delete(&id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_networks() {
        let store = ResourceStore::in_memory();
        store.put_network(network("br0", "10.0.0.0/24")).await.unwrap();
        assert!(matches!(
            store.put_network(network("br0", "10.1.0.0/24")).await,
            Err(Error::NameConflict(_))
        ));

        let mut c = container("web");
        c.network = Some("br0".into());
        store.put(c).await.unwrap();
        assert_eq!(store.containers_on_network("br0").await, vec!["web".to_string()]);

        store.delete_network("br0").await.unwrap();
        assert!(matches!(store.get_network("br0").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let store = ResourceStore::open(&path).await.unwrap();
            store.put(container("web")).await.unwrap();
            store.put_network(network("br0", "10.0.0.0/24")).await.unwrap();
        }

        let store = ResourceStore::open(&path).await.unwrap();
        assert_eq!(store.get("web").await.unwrap().image, "alpine");
        assert_eq!(store.list_networks().await.len(), 1);
    }
}
