//! Named networks and container endpoints.
//!
//! Each network is stored as one JSON file named after it under the
//! network directory. [`NetworkManager`] loads them all, allocates
//! addresses through [`Ipam`], and delegates device work to the
//! [`NetworkDriver`] registered under the network's driver name.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use corral_common::config::RuntimeConfig;
use corral_common::error::{CorralError, Result};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::bridge::BridgeDriver;
use crate::ipam::Ipam;

/// A named network; `ip_range` carries the gateway address and prefix,
/// e.g. `192.168.0.1/24`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Network name, also used as the bridge device name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Gateway address with the subnet prefix.
    #[serde(rename = "IPRange")]
    pub ip_range: Ipv4Network,
    /// Name of the driver that owns the network.
    #[serde(rename = "Driver")]
    pub driver: String,
}

impl Network {
    /// The gateway address, which is also the bridge's address.
    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        self.ip_range.ip()
    }

    /// The subnet with host bits cleared.
    #[must_use]
    pub fn subnet(&self) -> Ipv4Network {
        Ipv4Network::new(self.ip_range.network(), self.ip_range.prefix()).unwrap_or(self.ip_range)
    }
}

/// One container's attachment to a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint<'a> {
    /// `<container id>-<network name>`.
    pub id: String,
    /// Host side of the veth pair, enslaved to the bridge.
    pub host_device: String,
    /// Container side of the veth pair.
    pub peer_device: String,
    /// Address allocated to the container.
    pub ip: Ipv4Addr,
    /// Hardware address derived from `ip`.
    pub mac: String,
    /// Raw `host:container` port mappings.
    pub port_mapping: Vec<String>,
    /// Network the endpoint belongs to.
    pub network: &'a Network,
}

impl<'a> Endpoint<'a> {
    /// Builds the endpoint of `container_id` on `network`.
    ///
    /// Device names use the first five characters of the endpoint id, the
    /// container side prefixed with `cif-`.
    #[must_use]
    pub fn new(
        container_id: &str,
        network: &'a Network,
        ip: Ipv4Addr,
        port_mapping: Vec<String>,
    ) -> Self {
        let id = format!("{container_id}-{}", network.name);
        let short: String = id.chars().take(5).collect();
        Self {
            host_device: short.clone(),
            peer_device: format!("cif-{short}"),
            mac: mac_for(ip),
            ip,
            port_mapping,
            network,
            id,
        }
    }

    /// The container's address with the network prefix.
    #[must_use]
    pub fn address(&self) -> Ipv4Network {
        Ipv4Network::new(self.ip, self.network.ip_range.prefix()).unwrap_or(self.network.ip_range)
    }
}

/// Locally administered MAC embedding the IPv4 address: `02:42:a:b:c:d`.
#[must_use]
pub fn mac_for(ip: Ipv4Addr) -> String {
    let [a, b, c, d] = ip.octets();
    format!("02:42:{a:02x}:{b:02x}:{c:02x}:{d:02x}")
}

/// Device-level operations of one kind of network.
pub trait NetworkDriver: Send + Sync + fmt::Debug {
    /// Driver name stored in each network's `Driver` field.
    fn name(&self) -> &'static str;

    /// Sets up the devices of a new network. `ip_range` carries the
    /// gateway address.
    ///
    /// # Errors
    ///
    /// Returns an error if device setup fails.
    fn create(&self, ip_range: Ipv4Network, name: &str) -> Result<Network>;

    /// Removes the devices of `network`.
    ///
    /// # Errors
    ///
    /// Returns an error if device removal fails.
    fn delete(&self, network: &Network) -> Result<()>;

    /// Wires `endpoint` into the network namespace of `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if any device or address step fails.
    fn connect(&self, network: &Network, endpoint: &Endpoint<'_>, pid: i32) -> Result<()>;

    /// Undoes host-side state of `endpoint` after its container is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if cleanup fails.
    fn disconnect(&self, network: &Network, endpoint: &Endpoint<'_>) -> Result<()>;
}

/// Loaded networks plus the drivers and allocator that act on them.
#[derive(Debug)]
pub struct NetworkManager {
    network_dir: PathBuf,
    ipam: Ipam,
    drivers: BTreeMap<&'static str, Box<dyn NetworkDriver>>,
    networks: BTreeMap<String, Network>,
}

impl NetworkManager {
    /// Loads the host's networks with the bridge driver registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the network directory cannot be read.
    pub fn host(config: &RuntimeConfig) -> Result<Self> {
        Self::load(config, vec![Box::new(BridgeDriver)])
    }

    /// Loads every network file under the configured directory.
    ///
    /// Files that fail to parse are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be listed.
    pub fn load(config: &RuntimeConfig, drivers: Vec<Box<dyn NetworkDriver>>) -> Result<Self> {
        let network_dir = config.network_dir.clone();
        let mut networks = BTreeMap::new();
        match std::fs::read_dir(&network_dir) {
            Ok(entries) => {
                for entry in entries {
                    let path = entry.map_err(|e| CorralError::io(&network_dir, e))?.path();
                    if !path.is_file() {
                        continue;
                    }
                    match read_network(&path) {
                        Ok(network) => {
                            let _ = networks.insert(network.name.clone(), network);
                        }
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "skipping network file");
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CorralError::io(&network_dir, e)),
        }
        tracing::debug!(count = networks.len(), "networks loaded");
        Ok(Self {
            network_dir,
            ipam: Ipam::new(&config.ipam_file),
            drivers: drivers.into_iter().map(|d| (d.name(), d)).collect(),
            networks,
        })
    }

    /// All loaded networks, ordered by name.
    pub fn list(&self) -> impl Iterator<Item = &Network> {
        self.networks.values()
    }

    /// Looks up a network by name.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] for unknown names.
    pub fn get(&self, name: &str) -> Result<&Network> {
        self.networks.get(name).ok_or_else(|| CorralError::NotFound {
            kind: "network",
            id: name.to_string(),
        })
    }

    fn driver(&self, name: &str) -> Result<&dyn NetworkDriver> {
        self.drivers
            .get(name)
            .map(AsRef::as_ref)
            .ok_or_else(|| CorralError::config(format!("unknown network driver: {name}")))
    }

    /// Creates network `name` on `subnet` with `driver`.
    ///
    /// The subnet's first address becomes the gateway. The gateway is
    /// returned to the pool if the driver fails.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicate names, unknown drivers, malformed
    /// subnets, allocation or driver failures.
    pub fn create_network(&mut self, driver: &str, subnet: &str, name: &str) -> Result<&Network> {
        if name.is_empty() || name.contains('/') {
            return Err(CorralError::config(format!("invalid network name: {name:?}")));
        }
        if self.networks.contains_key(name) || self.network_file(name).exists() {
            return Err(CorralError::config(format!("network {name} already exists")));
        }
        let net_driver = self.driver(driver)?;
        let subnet: Ipv4Network = subnet
            .parse()
            .map_err(|e| CorralError::config(format!("invalid subnet {subnet}: {e}")))?;

        let gateway = self.ipam.allocate(&subnet)?;
        let ip_range = Ipv4Network::new(gateway, subnet.prefix())
            .map_err(|e| CorralError::config(format!("invalid subnet {subnet}: {e}")))?;
        let network = match net_driver.create(ip_range, name) {
            Ok(network) => network,
            Err(e) => {
                self.release_quietly(&subnet, gateway);
                return Err(e);
            }
        };
        self.dump(&network)?;
        tracing::info!(name, ip_range = %network.ip_range, driver, "network created");

        let _ = self.networks.insert(name.to_string(), network);
        self.get(name)
    }

    /// Deletes network `name`: gateway released, devices removed, file
    /// deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the network is unknown or a step fails.
    pub fn delete_network(&mut self, name: &str) -> Result<()> {
        let network = self.get(name)?.clone();
        self.ipam.release(&network.subnet(), network.gateway())?;
        self.driver(&network.driver)?.delete(&network)?;
        let path = self.network_file(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CorralError::io(path, e)),
        }
        let _ = self.networks.remove(name);
        tracing::info!(name, "network removed");
        Ok(())
    }

    /// Attaches container `container_id` (init process `pid`) to network
    /// `name` and returns its address.
    ///
    /// The address is released again if the driver fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the network is unknown, allocation fails, or
    /// the driver cannot wire the endpoint.
    pub fn connect(
        &self,
        name: &str,
        container_id: &str,
        pid: i32,
        port_mapping: &[String],
    ) -> Result<Ipv4Addr> {
        let network = self.get(name)?;
        let ip = self.ipam.allocate(&network.subnet())?;
        let endpoint = Endpoint::new(container_id, network, ip, port_mapping.to_vec());
        if let Err(e) = self.driver(&network.driver)?.connect(network, &endpoint, pid) {
            self.release_quietly(&network.subnet(), ip);
            return Err(e);
        }
        tracing::info!(
            network = name,
            container = container_id,
            ip = %ip,
            device = %endpoint.peer_device,
            "endpoint connected"
        );
        Ok(ip)
    }

    /// Detaches a container: driver cleanup first, then its address is
    /// released.
    ///
    /// # Errors
    ///
    /// Returns an error if the network is unknown or the address cannot
    /// be released. Driver cleanup failures are only logged.
    pub fn disconnect(
        &self,
        name: &str,
        container_id: &str,
        ip: Ipv4Addr,
        port_mapping: &[String],
    ) -> Result<()> {
        let network = self.get(name)?;
        let endpoint = Endpoint::new(container_id, network, ip, port_mapping.to_vec());
        if let Err(e) = self
            .driver(&network.driver)
            .and_then(|d| d.disconnect(network, &endpoint))
        {
            tracing::warn!(network = name, container = container_id, error = %e, "endpoint cleanup failed");
        }
        self.ipam.release(&network.subnet(), ip)
    }

    fn release_quietly(&self, subnet: &Ipv4Network, ip: Ipv4Addr) {
        if let Err(e) = self.ipam.release(subnet, ip) {
            tracing::warn!(subnet = %subnet, ip = %ip, error = %e, "address not released");
        }
    }

    fn network_file(&self, name: &str) -> PathBuf {
        self.network_dir.join(name)
    }

    fn dump(&self, network: &Network) -> Result<()> {
        std::fs::create_dir_all(&self.network_dir)
            .map_err(|e| CorralError::io(&self.network_dir, e))?;
        let path = self.network_file(&network.name);
        let json = serde_json::to_vec(network)?;
        std::fs::write(&path, json).map_err(|e| CorralError::io(path, e))
    }
}

fn read_network(path: &Path) -> Result<Network> {
    let content = std::fs::read_to_string(path).map_err(|e| CorralError::io(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> Network {
        Network {
            name: "testnet".into(),
            ip_range: "192.168.10.1/24".parse().unwrap(),
            driver: "bridge".into(),
        }
    }

    #[test]
    fn descriptor_uses_capitalised_keys() {
        let json = serde_json::to_value(network()).unwrap();
        assert_eq!(json["Name"], "testnet");
        assert_eq!(json["IPRange"], "192.168.10.1/24");
        assert_eq!(json["Driver"], "bridge");
    }

    #[test]
    fn gateway_and_subnet_split_ip_range() {
        let nw = network();
        assert_eq!(nw.gateway(), Ipv4Addr::new(192, 168, 10, 1));
        assert_eq!(nw.subnet().to_string(), "192.168.10.0/24");
    }

    #[test]
    fn endpoint_names_devices_from_id() {
        let nw = network();
        let ep = Endpoint::new("k3j9x0aa1b", &nw, Ipv4Addr::new(192, 168, 10, 2), vec![]);
        assert_eq!(ep.id, "k3j9x0aa1b-testnet");
        assert_eq!(ep.host_device, "k3j9x");
        assert_eq!(ep.peer_device, "cif-k3j9x");
        assert_eq!(ep.mac, "02:42:c0:a8:0a:02");
        assert_eq!(ep.address().to_string(), "192.168.10.2/24");
    }

    #[test]
    fn unreadable_network_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::with_dirs(dir.path().join("run"), dir.path().join("root"));
        std::fs::create_dir_all(&config.network_dir).unwrap();
        std::fs::write(config.network_dir.join("broken"), "{not json").unwrap();
        std::fs::write(
            config.network_dir.join("testnet"),
            serde_json::to_vec(&network()).unwrap(),
        )
        .unwrap();

        let manager = NetworkManager::load(&config, vec![]).unwrap();
        let names: Vec<_> = manager.list().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["testnet"]);
    }

    #[test]
    fn missing_network_dir_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::with_dirs(dir.path().join("run"), dir.path().join("root"));
        let manager = NetworkManager::load(&config, vec![]).unwrap();
        assert_eq!(manager.list().count(), 0);
        assert!(matches!(manager.get("x"), Err(CorralError::NotFound { .. })));
    }
}
