//! Domain primitive types used across the corral workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CorralError;

const ID_ALPHABET: &[u8] = b"1234567890abcdefghijklmnopqrstuvwxyz";
const ID_LEN: usize = 10;

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from an existing string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random 10-character lowercase alphanumeric ID.
    #[must_use]
    pub fn generate() -> Self {
        let bytes = uuid::Uuid::new_v4().into_bytes();
        let id = bytes
            .iter()
            .take(ID_LEN)
            .map(|b| char::from(ID_ALPHABET[usize::from(*b) % ID_ALPHABET.len()]))
            .collect();
        Self(id)
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource limits for one container.
///
/// Values are kept in the textual form the kernel control files accept
/// (`"100m"`, `"512"`, `"0-1"`). An absent field leaves that axis
/// unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit, bytes or a `k`/`m`/`g` suffixed quantity.
    pub memory_limit: Option<String>,
    /// Relative CPU weight (cgroup v1 shares).
    pub cpu_share: Option<String>,
    /// CPU core list such as `0-2,4`.
    pub cpu_set: Option<String>,
}

impl ResourceLimits {
    /// Returns `true` when no axis is constrained.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.memory_limit.is_none() && self.cpu_share.is_none() && self.cpu_set.is_none()
    }
}

/// Lifecycle status stored in a container record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// The init process is alive.
    Running,
    /// The container was stopped with `stop`.
    Stopped,
    /// The command exited on its own.
    Exited,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Exited => "exited",
        })
    }
}

/// A `hostPort:containerPort` TCP forwarding entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortMapping {
    /// Port on the host.
    pub host: u16,
    /// Port inside the container.
    pub container: u16,
}

impl FromStr for PortMapping {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CorralError::config(format!("invalid port mapping: {s}"));
        let (host, container) = s.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            host: host.trim().parse().map_err(|_| invalid())?,
            container: container.trim().parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// A `hostPath:containerPath` volume specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Directory on the host.
    pub host: String,
    /// Mount target relative to the container root.
    pub container: String,
}

impl VolumeSpec {
    /// Parses a volume flag; returns `None` unless both sides are non-empty
    /// and the container side stays inside the container root (no `..`).
    #[must_use]
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.split(':');
        let host = parts.next()?;
        let container = parts.next()?;
        if parts.next().is_some() || host.is_empty() || container.is_empty() {
            return None;
        }
        if container.split('/').any(|part| part == "..") {
            return None;
        }
        Some(Self {
            host: host.to_string(),
            container: container.to_string(),
        })
    }
}
