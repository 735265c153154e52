//! Table formatting for CLI listings.

use std::fmt::Write;

use corral_network::network::Network;
use corral_runtime::registry::ContainerRecord;

/// Renders containers as a fixed-width table; the header is always present.
#[must_use]
pub fn container_table(records: &[ContainerRecord]) -> String {
    let mut out = format!(
        "{:<12} {:<16} {:<8} {:<10} {:<24} {:<20}\n",
        "ID", "NAME", "PID", "STATUS", "COMMAND", "CREATED"
    );
    for r in records {
        let pid = if r.pid.is_empty() { "-" } else { r.pid.as_str() };
        let _ = writeln!(
            out,
            "{:<12} {:<16} {:<8} {:<10} {:<24} {:<20}",
            r.id, r.name, pid, r.status, r.command, r.create_time
        );
    }
    out
}

/// Renders networks as a fixed-width table.
#[must_use]
pub fn network_table(networks: &[Network]) -> String {
    let mut out = format!("{:<16} {:<20} {:<10}\n", "NAME", "IPRange", "Driver");
    for n in networks {
        let _ = writeln!(
            out,
            "{:<16} {:<20} {:<10}",
            n.name,
            n.ip_range.to_string(),
            n.driver
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use corral_common::types::ContainerStatus;

    use super::*;

    #[test]
    fn empty_listing_still_has_a_header() {
        let table = container_table(&[]);
        assert_eq!(table.lines().count(), 1);
        assert!(table.starts_with("ID"));
        assert!(table.contains("STATUS"));
    }

    #[test]
    fn stopped_container_shows_a_dash_for_pid() {
        let mut record =
            ContainerRecord::running("1234567890", "web", 42, &["top".to_string()]);
        record.status = ContainerStatus::Stopped;
        record.pid = String::new();

        let table = container_table(&[record]);
        let row = table.lines().nth(1).unwrap();
        let fields: Vec<_> = row.split_whitespace().collect();
        assert_eq!(&fields[..5], ["1234567890", "web", "-", "stopped", "top"]);
    }

    #[test]
    fn networks_are_listed_with_range_and_driver() {
        let network = Network {
            name: "corral0".to_string(),
            ip_range: "192.168.10.1/24".parse().unwrap(),
            driver: "bridge".to_string(),
        };
        let table = network_table(&[network]);
        assert!(table.starts_with("NAME"));
        let row = table.lines().nth(1).unwrap();
        assert_eq!(
            row.split_whitespace().collect::<Vec<_>>(),
            ["corral0", "192.168.10.1/24", "bridge"]
        );
    }
}
