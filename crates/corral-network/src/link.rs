//! Link, address, and route configuration through `ip(8)`.

use std::net::Ipv4Addr;

use corral_common::error::{CorralError, Result};
use ipnetwork::Ipv4Network;

use crate::command::run;

const IP: &str = "ip";

/// Returns the kind reported for device `name` (`bridge`, `veth`, ...),
/// `Some("")` for plain devices, or `None` when no such device exists.
///
/// # Errors
///
/// Returns an error only if `ip` itself cannot be started.
pub fn link_kind(name: &str) -> Result<Option<String>> {
    match run(IP, &["-o", "-d", "link", "show", "dev", name]) {
        Ok(out) => Ok(Some(parse_kind(&out))),
        Err(CorralError::Command { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Picks the link kind out of one line of `ip -o -d link show`.
///
/// The kind is the first known device type named after the
/// `promiscuity` field, e.g. `... promiscuity 0 minmtu 68 bridge ...`.
fn parse_kind(output: &str) -> String {
    const KINDS: [&str; 6] = ["bridge", "veth", "vxlan", "macvlan", "tun", "dummy"];
    output
        .split_whitespace()
        .skip_while(|w| *w != "promiscuity")
        .find(|w| KINDS.contains(w))
        .unwrap_or_default()
        .to_string()
}

/// Creates a bridge device.
///
/// # Errors
///
/// Returns an error if `ip link add` fails.
pub fn add_bridge(name: &str) -> Result<()> {
    run(IP, &["link", "add", name, "type", "bridge"]).map(drop)
}

/// Deletes a device of any kind.
///
/// # Errors
///
/// Returns an error if `ip link del` fails.
pub fn delete_link(name: &str) -> Result<()> {
    run(IP, &["link", "del", name]).map(drop)
}

/// Assigns `address` (with its prefix) to `dev`.
///
/// # Errors
///
/// Returns an error if `ip addr add` fails.
pub fn add_address(dev: &str, address: Ipv4Network) -> Result<()> {
    run(IP, &["addr", "add", &address.to_string(), "dev", dev]).map(drop)
}

/// Brings `dev` administratively up.
///
/// # Errors
///
/// Returns an error if `ip link set up` fails.
pub fn set_up(dev: &str) -> Result<()> {
    run(IP, &["link", "set", dev, "up"]).map(drop)
}

/// Creates a veth pair `host` <-> `peer`.
///
/// # Errors
///
/// Returns an error if `ip link add` fails.
pub fn add_veth(host: &str, peer: &str) -> Result<()> {
    run(IP, &["link", "add", host, "type", "veth", "peer", "name", peer]).map(drop)
}

/// Enslaves `dev` to `bridge`.
///
/// # Errors
///
/// Returns an error if `ip link set master` fails.
pub fn set_master(dev: &str, bridge: &str) -> Result<()> {
    run(IP, &["link", "set", dev, "master", bridge]).map(drop)
}

/// Moves `dev` into the network namespace of `pid`.
///
/// # Errors
///
/// Returns an error if `ip link set netns` fails.
pub fn set_netns(dev: &str, pid: i32) -> Result<()> {
    run(IP, &["link", "set", dev, "netns", &pid.to_string()]).map(drop)
}

/// Sets the hardware address of `dev`.
///
/// # Errors
///
/// Returns an error if `ip link set address` fails.
pub fn set_mac(dev: &str, mac: &str) -> Result<()> {
    run(IP, &["link", "set", "dev", dev, "address", mac]).map(drop)
}

/// Routes all traffic via `gateway` out of `dev`.
///
/// # Errors
///
/// Returns an error if `ip route add` fails.
pub fn add_default_route(gateway: Ipv4Addr, dev: &str) -> Result<()> {
    run(IP, &["route", "add", "default", "via", &gateway.to_string(), "dev", dev]).map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_kind_is_found() {
        let line = "5: br0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc noqueue state UP \
                    mode DEFAULT group default qlen 1000\\    link/ether aa:bb:cc:dd:ee:ff brd \
                    ff:ff:ff:ff:ff:ff promiscuity 0 minmtu 68 maxmtu 65535 bridge forward_delay 1500";
        assert_eq!(parse_kind(line), "bridge");
    }

    #[test]
    fn plain_device_has_empty_kind() {
        let line = "2: eth0: <BROADCAST,MULTICAST,UP> mtu 1500 qdisc fq state UP\\    \
                    link/ether 00:11:22:33:44:55 brd ff:ff:ff:ff:ff:ff promiscuity 0 minmtu 68 \
                    maxmtu 9000 numtxqueues 8 gso_max_size 65536";
        assert_eq!(parse_kind(line), "");
    }
}
