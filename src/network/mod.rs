//! Virtual network management
//!
//! Networks are records in the resource store; this manager owns their
//! address pools. Each pool has its own lock so allocation is serialized per
//! network while different networks allocate in parallel.

pub mod ipam;

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::container::names::validate_name;
use crate::error::{Error, Result};
use crate::store::ResourceStore;

use ipam::{AddressPool, Subnet};

/// The only driver this daemon implements
pub const BRIDGE_DRIVER: &str = "bridge";

/// Network record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub driver: String,
    pub subnet: Subnet,
    pub created_time: DateTime<Utc>,
}

impl Network {
    pub fn new(name: String, driver: String, subnet: Subnet) -> Self {
        Self {
            name,
            driver,
            subnet,
            created_time: Utc::now(),
        }
    }
}

/// Network plus the names of containers attached to it
#[derive(Debug, Clone, Serialize)]
pub struct NetworkDetails {
    #[serde(flatten)]
    pub network: Network,
    pub containers: Vec<String>,
}

/// `None` once the network has been removed
type PoolSlot = Arc<Mutex<Option<AddressPool>>>;

pub struct NetworkManager {
    store: Arc<ResourceStore>,
    pools: RwLock<HashMap<String, PoolSlot>>,
    /// Serializes create/remove so overlap checks see a stable set
    registry_lock: Mutex<()>,
    default_driver: String,
}

impl NetworkManager {
    pub fn new(store: Arc<ResourceStore>, config: &NetworkConfig) -> Self {
        Self {
            store,
            pools: RwLock::new(HashMap::new()),
            registry_lock: Mutex::new(()),
            default_driver: config.default_driver.clone(),
        }
    }

    /// Create a network; without a subnet the first free private /16 is used
    pub async fn create_network(
        &self,
        name: &str,
        driver: Option<&str>,
        subnet: Option<&str>,
    ) -> Result<Network> {
        validate_name(name)?;
        let driver = driver.unwrap_or(self.default_driver.as_str());
        if driver != BRIDGE_DRIVER {
            return Err(Error::validation(format!(
                "unsupported network driver {:?}, only {:?} is available",
                driver, BRIDGE_DRIVER
            )));
        }
        let requested = subnet
            .filter(|s| !s.trim().is_empty())
            .map(Subnet::parse)
            .transpose()?;

        let _guard = self.registry_lock.lock().await;

        let existing = self.store.list_networks().await;
        if existing.iter().any(|n| n.name == name) {
            return Err(Error::NameConflict(name.to_string()));
        }

        let subnet = match requested {
            Some(subnet) => {
                if let Some(clash) = existing.iter().find(|n| n.subnet.overlaps(&subnet)) {
                    return Err(Error::InvalidSubnet(format!(
                        "{} overlaps network {} ({})",
                        subnet, clash.name, clash.subnet
                    )));
                }
                subnet
            }
            None => pick_free_subnet(&existing)?,
        };

        let network = Network::new(name.to_string(), driver.to_string(), subnet);
        self.store.put_network(network.clone()).await?;
        self.pools.write().await.insert(
            network.name.clone(),
            Arc::new(Mutex::new(Some(AddressPool::new(&network.name, subnet)))),
        );

        crate::metrics::record_network_created();
        info!(network = %network.name, subnet = %subnet, driver = %driver, "Network created");
        Ok(network)
    }

    /// Remove a network nobody is attached to
    pub async fn remove_network(&self, name: &str) -> Result<Network> {
        let _guard = self.registry_lock.lock().await;

        self.store.get_network(name).await?;
        let slot = self.pools.read().await.get(name).cloned();

        // Holding the pool lock keeps attach from racing the removal.
        let mut pool_guard = match &slot {
            Some(slot) => Some(slot.lock().await),
            None => None,
        };

        let mut users = self.store.containers_on_network(name).await;
        if let Some(Some(pool)) = pool_guard.as_deref() {
            for holder in pool.holders() {
                let label = self
                    .store
                    .get(&holder)
                    .await
                    .map(|c| c.name)
                    .unwrap_or(holder);
                if !users.contains(&label) {
                    users.push(label);
                }
            }
        }
        if !users.is_empty() {
            users.sort();
            return Err(Error::NetworkInUse {
                network: name.to_string(),
                containers: users,
            });
        }

        let network = self.store.delete_network(name).await?;
        if let Some(guard) = pool_guard.as_deref_mut() {
            *guard = None;
        }
        drop(pool_guard);
        self.pools.write().await.remove(name);

        info!(network = %name, "Network removed");
        Ok(network)
    }

    /// Allocate an address for `container_id` on `network`
    pub async fn attach(&self, container_id: &str, network: &str) -> Result<Ipv4Addr> {
        let slot = self
            .pools
            .read()
            .await
            .get(network)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("network {}", network)))?;

        let mut guard = slot.lock().await;
        let pool = guard
            .as_mut()
            .ok_or_else(|| Error::not_found(format!("network {}", network)))?;
        let addr = pool.allocate(container_id)?;

        debug!(container_id = %container_id, network = %network, ip = %addr, "Address allocated");
        Ok(addr)
    }

    /// Return the container's address to the pool; unknown networks are ignored
    pub async fn detach(&self, container_id: &str, network: &str) {
        let Some(slot) = self.pools.read().await.get(network).cloned() else {
            return;
        };
        let mut guard = slot.lock().await;
        if let Some(addr) = guard.as_mut().and_then(|pool| pool.release(container_id)) {
            debug!(container_id = %container_id, network = %network, ip = %addr, "Address released");
        }
    }

    pub async fn list(&self) -> Vec<NetworkDetails> {
        let mut details = Vec::new();
        for network in self.store.list_networks().await {
            let containers = self.store.containers_on_network(&network.name).await;
            details.push(NetworkDetails {
                network,
                containers,
            });
        }
        details
    }

    pub async fn inspect(&self, name: &str) -> Result<NetworkDetails> {
        let network = self.store.get_network(name).await?;
        let containers = self.store.containers_on_network(name).await;
        Ok(NetworkDetails {
            network,
            containers,
        })
    }

    /// Create the default network unless it already exists
    pub async fn ensure_default(&self, config: &NetworkConfig) -> Result<()> {
        if self.store.get_network(&config.default_network).await.is_ok() {
            return Ok(());
        }
        match self
            .create_network(
                &config.default_network,
                Some(config.default_driver.as_str()),
                Some(config.default_subnet.as_str()),
            )
            .await
        {
            Ok(_) | Err(Error::NameConflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Recreate pools for stored networks and re-reserve stored addresses
    pub async fn rebuild_from_store(&self) {
        let mut pools: HashMap<String, AddressPool> = self
            .store
            .list_networks()
            .await
            .into_iter()
            .map(|n| (n.name.clone(), AddressPool::new(&n.name, n.subnet)))
            .collect();

        for container in self.store.list().await {
            let (Some(network), Some(addr)) = (&container.network, container.ip_address) else {
                continue;
            };
            match pools.get_mut(network) {
                Some(pool) => {
                    if let Err(e) = pool.reserve(addr, &container.id) {
                        warn!(container_id = %container.id, error = %e, "Could not restore address");
                    }
                }
                None => {
                    warn!(container_id = %container.id, network = %network, "Container references a missing network");
                }
            }
        }

        let restored = pools.len();
        *self.pools.write().await = pools
            .into_iter()
            .map(|(name, pool)| (name, Arc::new(Mutex::new(Some(pool)))))
            .collect();
        info!(networks = restored, "Address pools rebuilt");
    }
}

/// First private /16 not overlapping any existing network
fn pick_free_subnet(existing: &[Network]) -> Result<Subnet> {
    let candidates = (18..=31u8)
        .map(|b| Ipv4Addr::new(172, b, 0, 0))
        .chain((0..=255u8).map(|b| Ipv4Addr::new(10, b, 0, 0)));

    for base in candidates {
        let subnet = Subnet::parse(&format!("{}/16", base))?;
        if !existing.iter().any(|n| n.subnet.overlaps(&subnet)) {
            return Ok(subnet);
        }
    }
    Err(Error::InvalidSubnet(
        "no free private subnet left, pass one explicitly".to_string(),
    ))
}
