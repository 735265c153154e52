//! NAT rules for bridge networks.
//!
//! Outbound traffic from a subnet is masqueraded unless it leaves through
//! its own bridge; inbound TCP on a host port is rewritten to a container
//! address with DNAT.

use std::net::Ipv4Addr;

use corral_common::error::Result;
use corral_common::types::PortMapping;
use ipnetwork::Ipv4Network;

use crate::command::run;

const IPTABLES: &str = "iptables";

/// Whether a rule is appended or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    /// `-A`
    Append,
    /// `-D`
    Delete,
}

impl RuleAction {
    const fn flag(self) -> &'static str {
        match self {
            Self::Append => "-A",
            Self::Delete => "-D",
        }
    }
}

/// Arguments of the masquerade rule for `subnet` behind `bridge`.
#[must_use]
pub fn masquerade_args(action: RuleAction, subnet: Ipv4Network, bridge: &str) -> Vec<String> {
    let subnet = Ipv4Network::new(subnet.network(), subnet.prefix()).unwrap_or(subnet);
    [
        "-t",
        "nat",
        action.flag(),
        "POSTROUTING",
        "-s",
        &subnet.to_string(),
        "!",
        "-o",
        bridge,
        "-j",
        "MASQUERADE",
    ]
    .map(str::to_string)
    .to_vec()
}

/// Arguments of the DNAT rule forwarding `mapping.host` to `ip:mapping.container`.
#[must_use]
pub fn dnat_args(action: RuleAction, mapping: PortMapping, ip: Ipv4Addr) -> Vec<String> {
    [
        "-t",
        "nat",
        action.flag(),
        "PREROUTING",
        "-p",
        "tcp",
        "-m",
        "tcp",
        "--dport",
        &mapping.host.to_string(),
        "-j",
        "DNAT",
        "--to-destination",
        &format!("{ip}:{}", mapping.container),
    ]
    .map(str::to_string)
    .to_vec()
}

/// Parses `host:container` entries, skipping malformed ones with a warning.
#[must_use]
pub fn parse_port_mappings(entries: &[String]) -> Vec<PortMapping> {
    entries
        .iter()
        .filter_map(|entry| match entry.parse::<PortMapping>() {
            Ok(mapping) => Some(mapping),
            Err(e) => {
                tracing::warn!(entry = %entry, error = %e, "skipping port mapping");
                None
            }
        })
        .collect()
}

/// Installs or removes the masquerade rule of a bridge network.
///
/// # Errors
///
/// Returns an error if `iptables` fails.
pub fn masquerade(action: RuleAction, subnet: Ipv4Network, bridge: &str) -> Result<()> {
    run(IPTABLES, &masquerade_args(action, subnet, bridge)).map(drop)
}

/// Installs or removes DNAT rules for every well-formed entry of
/// `port_mapping`. A rule that `iptables` refuses is logged and skipped.
pub fn port_forward(action: RuleAction, port_mapping: &[String], ip: Ipv4Addr) {
    for mapping in parse_port_mappings(port_mapping) {
        if let Err(e) = run(IPTABLES, &dnat_args(action, mapping, ip)) {
            tracing::warn!(mapping = %mapping, ip = %ip, error = %e, "port forwarding rule failed");
        }
    }
}
