//! IP address management.
//!
//! Allocations live in one JSON file mapping each subnet (in network CIDR
//! form, `10.0.0.0/24`) to a string of `'0'`/`'1'` characters, one per
//! address of the subnet. Bit `i` maps to address `base + i + 1`, so the
//! first allocation of a fresh subnet yields `base + 1`, which becomes the
//! gateway. The last bit would map past the broadcast address and is never
//! handed out.
//!
//! Every call reloads, mutates, and rewrites the whole table while holding
//! an exclusive lock on `<file>.lock`, so concurrent `corral` processes
//! cannot lose each other's updates.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};
use ipnetwork::Ipv4Network;
use nix::fcntl::{Flock, FlockArg};

/// Smallest prefix accepted; keeps bitmaps at 64 KiB or less.
pub const MIN_PREFIX: u8 = 16;

type Table = BTreeMap<String, String>;

/// Allocator backed by a single table file.
#[derive(Debug, Clone)]
pub struct Ipam {
    path: PathBuf,
}

impl Ipam {
    /// Uses `path` as the allocation table.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the allocation table.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Allocates the lowest free address of `subnet`.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::AddressExhausted`] when no address is left,
    /// [`CorralError::Config`] for prefixes shorter than [`MIN_PREFIX`],
    /// or an I/O error from the table file.
    pub fn allocate(&self, subnet: &Ipv4Network) -> Result<Ipv4Addr> {
        let subnet = normalize(subnet)?;
        let key = subnet.to_string();
        self.with_table(|table| {
            let bits = table
                .entry(key.clone())
                .or_insert_with(|| "0".repeat(bitmap_len(subnet)));
            let allocatable = bits.len().saturating_sub(1);
            let Some(index) = bits.as_bytes()[..allocatable].iter().position(|b| *b == b'0') else {
                return Err(CorralError::AddressExhausted { subnet: key.clone() });
            };
            bits.replace_range(index..=index, "1");
            let ip = address_at(subnet, index);
            tracing::debug!(subnet = %key, index, ip = %ip, "address allocated");
            Ok(ip)
        })
    }

    /// Returns `ip` to the free pool of `subnet`.
    ///
    /// Releasing an address that was never allocated is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Config`] if `ip` cannot belong to `subnet`,
    /// or an I/O error from the table file.
    pub fn release(&self, subnet: &Ipv4Network, ip: Ipv4Addr) -> Result<()> {
        let subnet = normalize(subnet)?;
        let key = subnet.to_string();
        let index = index_of(subnet, ip).ok_or_else(|| {
            CorralError::config(format!("address {ip} is not allocatable in {key}"))
        })?;
        self.with_table(|table| {
            if let Some(bits) = table.get_mut(&key).filter(|b| index < b.len()) {
                bits.replace_range(index..=index, "0");
            }
            tracing::debug!(subnet = %key, index, ip = %ip, "address released");
            Ok(())
        })
    }

    /// Runs `f` on the freshly loaded table under the lock and persists the
    /// table afterwards, even when `f` fails.
    fn with_table<T>(&self, f: impl FnOnce(&mut Table) -> Result<T>) -> Result<T> {
        let _lock = self.lock()?;
        let mut table = self.load()?;
        let result = f(&mut table);
        self.dump(&table)?;
        result
    }

    fn lock(&self) -> Result<Flock<File>> {
        let lock_path = self.path.with_extension("json.lock");
        create_parent(&lock_path)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| CorralError::io(&lock_path, e))?;
        Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
            CorralError::io(&lock_path, std::io::Error::from(errno))
        })
    }

    fn load(&self) -> Result<Table> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Table::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Table::new()),
            Err(e) => Err(CorralError::io(&self.path, e)),
        }
    }

    fn dump(&self, table: &Table) -> Result<()> {
        create_parent(&self.path)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(table)?).map_err(|e| CorralError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| CorralError::io(&self.path, e))
    }
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) => std::fs::create_dir_all(parent).map_err(|e| CorralError::io(parent, e)),
        None => Ok(()),
    }
}

/// Masks host bits off and checks the prefix.
fn normalize(subnet: &Ipv4Network) -> Result<Ipv4Network> {
    if subnet.prefix() < MIN_PREFIX {
        return Err(CorralError::config(format!(
            "subnet {subnet} is larger than /{MIN_PREFIX}"
        )));
    }
    Ipv4Network::new(subnet.network(), subnet.prefix())
        .map_err(|e| CorralError::config(format!("invalid subnet {subnet}: {e}")))
}

fn bitmap_len(subnet: Ipv4Network) -> usize {
    1usize << (32 - u32::from(subnet.prefix()))
}

fn address_at(subnet: Ipv4Network, index: usize) -> Ipv4Addr {
    let offset = u32::try_from(index).unwrap_or(u32::MAX);
    Ipv4Addr::from(u32::from(subnet.network()).wrapping_add(offset).wrapping_add(1))
}

fn index_of(subnet: Ipv4Network, ip: Ipv4Addr) -> Option<usize> {
    let offset = u32::from(ip)
        .checked_sub(1)?
        .checked_sub(u32::from(subnet.network()))?;
    let index = usize::try_from(offset).ok()?;
    (index + 1 < bitmap_len(subnet)).then_some(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    #[test]
    fn index_and_address_are_inverse() {
        let subnet = net("192.168.0.0/24");
        for index in [0, 1, 100, 253] {
            assert_eq!(index_of(subnet, address_at(subnet, index)), Some(index));
        }
        assert_eq!(address_at(subnet, 0), Ipv4Addr::new(192, 168, 0, 1));
    }

    #[test]
    fn index_of_rejects_outside_addresses() {
        let subnet = net("10.0.0.0/30");
        assert_eq!(index_of(subnet, Ipv4Addr::new(10, 0, 0, 0)), None);
        assert_eq!(index_of(subnet, Ipv4Addr::new(10, 0, 0, 3)), Some(2));
        assert_eq!(index_of(subnet, Ipv4Addr::new(10, 0, 0, 4)), None);
        assert_eq!(index_of(subnet, Ipv4Addr::new(9, 0, 0, 1)), None);
    }

    #[test]
    fn host_bits_in_the_key_are_masked() {
        let dir = tempfile::tempdir().unwrap();
        let ipam = Ipam::new(dir.path().join("subnet.json"));
        let ip = ipam.allocate(&net("172.18.5.9/24")).unwrap();
        assert_eq!(ip, Ipv4Addr::new(172, 18, 5, 1));

        let table: Table =
            serde_json::from_str(&std::fs::read_to_string(ipam.path()).unwrap()).unwrap();
        let bits = &table["172.18.5.0/24"];
        assert_eq!(bits.len(), 256);
        assert!(bits.starts_with("10"));
    }

    #[test]
    fn wide_subnets_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ipam = Ipam::new(dir.path().join("subnet.json"));
        assert!(matches!(
            ipam.allocate(&net("10.0.0.0/8")),
            Err(CorralError::Config { .. })
        ));
    }

    #[test]
    fn release_of_foreign_address_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ipam = Ipam::new(dir.path().join("subnet.json"));
        assert!(ipam.release(&net("10.0.0.0/24"), Ipv4Addr::new(10, 0, 1, 5)).is_err());
    }

    #[test]
    fn release_before_any_allocation_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let ipam = Ipam::new(dir.path().join("subnet.json"));
        ipam.release(&net("10.0.0.0/24"), Ipv4Addr::new(10, 0, 0, 9)).unwrap();
        assert_eq!(ipam.allocate(&net("10.0.0.0/24")).unwrap(), Ipv4Addr::new(10, 0, 0, 1));
    }
}
