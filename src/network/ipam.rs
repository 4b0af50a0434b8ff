//! Subnet parsing and per-network address pools

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

pub const MIN_PREFIX: u8 = 8;
pub const MAX_PREFIX: u8 = 30;

/// IPv4 CIDR block with host bits zeroed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    base: Ipv4Addr,
    prefix: u8,
}

impl Subnet {
    pub fn parse(cidr: &str) -> Result<Self> {
        let (addr, prefix) = cidr
            .trim()
            .split_once('/')
            .ok_or_else(|| Error::InvalidSubnet(format!("{cidr:?}: expected a.b.c.d/n")))?;
        let base: Ipv4Addr = addr
            .parse()
            .map_err(|e| Error::InvalidSubnet(format!("{cidr:?}: {e}")))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|e| Error::InvalidSubnet(format!("{cidr:?}: invalid prefix length: {e}")))?;

        if !(MIN_PREFIX..=MAX_PREFIX).contains(&prefix) {
            return Err(Error::InvalidSubnet(format!(
                "{cidr:?}: prefix length {prefix} out of range {MIN_PREFIX}-{MAX_PREFIX}"
            )));
        }

        let subnet = Self { base, prefix };
        if u32::from(base) & !subnet.mask() != 0 {
            return Err(Error::InvalidSubnet(format!(
                "{cidr:?}: host bits set, did you mean {}/{prefix}?",
                Ipv4Addr::from(u32::from(base) & subnet.mask())
            )));
        }
        Ok(subnet)
    }

    fn mask(&self) -> u32 {
        // prefix is 8..=30, so the shift never overflows
        u32::MAX << (32 - u32::from(self.prefix))
    }

    fn network(&self) -> u32 {
        u32::from(self.base)
    }

    fn broadcast(&self) -> u32 {
        self.network() | !self.mask()
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask() == self.network()
    }

    pub fn overlaps(&self, other: &Subnet) -> bool {
        self.network() <= other.broadcast() && other.network() <= self.broadcast()
    }

    /// Usable host addresses (network and broadcast excluded)
    pub fn host_count(&self) -> u32 {
        self.broadcast() - self.network() - 1
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.prefix)
    }
}

impl FromStr for Subnet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Subnet::parse(s)
    }
}

impl Serialize for Subnet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Subnet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Subnet::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Address allocations of one network, keyed by container id
#[derive(Debug)]
pub struct AddressPool {
    network: String,
    subnet: Subnet,
    allocated: HashMap<u32, String>,
}

impl AddressPool {
    pub fn new(network: impl Into<String>, subnet: Subnet) -> Self {
        Self {
            network: network.into(),
            subnet,
            allocated: HashMap::new(),
        }
    }

    /// Lowest free host address; a container that already holds one gets it back
    pub fn allocate(&mut self, container_id: &str) -> Result<Ipv4Addr> {
        if let Some(existing) = self.address_of(container_id) {
            return Ok(existing);
        }

        let first = self.subnet.network() + 1;
        let last = self.subnet.broadcast() - 1;
        for candidate in first..=last {
            if !self.allocated.contains_key(&candidate) {
                self.allocated.insert(candidate, container_id.to_string());
                return Ok(Ipv4Addr::from(candidate));
            }
        }
        Err(Error::AddressPoolExhausted(self.network.clone()))
    }

    /// Record an address restored from persisted state
    pub fn reserve(&mut self, addr: Ipv4Addr, container_id: &str) -> Result<()> {
        let raw = u32::from(addr);
        if !self.subnet.contains(addr)
            || raw == self.subnet.network()
            || raw == self.subnet.broadcast()
        {
            return Err(Error::validation(format!(
                "address {} is not a host address of {}",
                addr, self.subnet
            )));
        }
        match self.allocated.get(&raw) {
            Some(owner) if owner != container_id => Err(Error::conflict(format!(
                "address {} already assigned to {}",
                addr, owner
            ))),
            _ => {
                self.allocated.insert(raw, container_id.to_string());
                Ok(())
            }
        }
    }

    pub fn release(&mut self, container_id: &str) -> Option<Ipv4Addr> {
        let raw = self
            .allocated
            .iter()
            .find(|(_, owner)| owner.as_str() == container_id)
            .map(|(addr, _)| *addr)?;
        self.allocated.remove(&raw);
        Some(Ipv4Addr::from(raw))
    }

    pub fn address_of(&self, container_id: &str) -> Option<Ipv4Addr> {
        self.allocated
            .iter()
            .find(|(_, owner)| owner.as_str() == container_id)
            .map(|(addr, _)| Ipv4Addr::from(*addr))
    }

    /// Container ids currently holding an address
    pub fn holders(&self) -> Vec<String> {
        let mut holders: Vec<String> = self.allocated.values().cloned().collect();
        holders.sort();
        holders
    }
}
