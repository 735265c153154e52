//! Linux bridge driver.
//!
//! A network is a bridge device named after the network, holding the
//! gateway address, with a masquerade rule for its subnet. Each endpoint is
//! a veth pair: the host end joins the bridge, the other end is moved into
//! the container and configured from inside its network namespace.

use corral_common::constants::BRIDGE_DRIVER;
use corral_common::error::{CorralError, Result};
use corral_core::namespace::NamespaceKind;
use corral_core::namespace::join::NamespaceGuard;
use ipnetwork::Ipv4Network;

use crate::iptables::{self, RuleAction};
use crate::link;
use crate::network::{Endpoint, Network, NetworkDriver};

/// Driver for `bridge` networks.
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeDriver;

impl BridgeDriver {
    /// Creates the bridge unless it exists; a same-named device of another
    /// kind is an error.
    fn ensure_bridge(name: &str) -> Result<bool> {
        match link::link_kind(name)? {
            None => {
                link::add_bridge(name)?;
                Ok(true)
            }
            Some(kind) if kind == "bridge" => Ok(false),
            Some(kind) => Err(CorralError::config(format!(
                "device {name} exists and is not a bridge (kind {kind:?})"
            ))),
        }
    }

    fn configure_inside(endpoint: &Endpoint<'_>, pid: i32) -> Result<()> {
        let _netns = NamespaceGuard::enter(pid, NamespaceKind::Net)?;
        link::add_address(&endpoint.peer_device, endpoint.address())?;
        link::set_mac(&endpoint.peer_device, &endpoint.mac)?;
        link::set_up(&endpoint.peer_device)?;
        link::set_up("lo")?;
        link::add_default_route(endpoint.network.gateway(), &endpoint.peer_device)
    }
}

impl NetworkDriver for BridgeDriver {
    fn name(&self) -> &'static str {
        BRIDGE_DRIVER
    }

    fn create(&self, ip_range: Ipv4Network, name: &str) -> Result<Network> {
        let network = Network {
            name: name.to_string(),
            ip_range,
            driver: BRIDGE_DRIVER.to_string(),
        };
        if Self::ensure_bridge(name)? {
            link::add_address(name, ip_range)?;
        }
        link::set_up(name)?;
        iptables::masquerade(RuleAction::Append, network.subnet(), name)?;
        tracing::info!(bridge = name, gateway = %ip_range, "bridge ready");
        Ok(network)
    }

    fn delete(&self, network: &Network) -> Result<()> {
        if let Err(e) = iptables::masquerade(RuleAction::Delete, network.subnet(), &network.name) {
            tracing::warn!(bridge = %network.name, error = %e, "masquerade rule not removed");
        }
        link::delete_link(&network.name)
    }

    fn connect(&self, network: &Network, endpoint: &Endpoint<'_>, pid: i32) -> Result<()> {
        link::add_veth(&endpoint.host_device, &endpoint.peer_device)?;
        link::set_master(&endpoint.host_device, &network.name)?;
        link::set_up(&endpoint.host_device)?;
        link::set_netns(&endpoint.peer_device, pid)?;
        Self::configure_inside(endpoint, pid)?;
        iptables::port_forward(RuleAction::Append, &endpoint.port_mapping, endpoint.ip);
        Ok(())
    }

    fn disconnect(&self, _network: &Network, endpoint: &Endpoint<'_>) -> Result<()> {
        iptables::port_forward(RuleAction::Delete, &endpoint.port_mapping, endpoint.ip);
        // The pair vanishes with the container's namespace; only a host end
        // left behind by a failed connect remains.
        if link::link_kind(&endpoint.host_device)?.is_some() {
            link::delete_link(&endpoint.host_device)?;
        }
        Ok(())
    }
}
