//! Unified error types for the corral workspace.
//!
//! Every library crate returns [`Result`]; the CLI converts these into
//! `anyhow` errors at the command boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CorralError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value or user input is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A privileged kernel operation (mount, namespace, signal) was refused.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// Every host address of a subnet is already allocated.
    #[error("no free address left in subnet {subnet}")]
    AddressExhausted {
        /// Subnet in CIDR notation.
        subnet: String,
    },

    /// An external tool (`ip`, `iptables`) exited unsuccessfully.
    #[error("{program} failed: {message}")]
    Command {
        /// Program that was invoked.
        program: String,
        /// Captured diagnostic output.
        message: String,
    },

    /// A cgroup subsystem could not be located or written.
    #[error("cgroup {subsystem}: {message}")]
    Cgroup {
        /// Subsystem name (`memory`, `cpu`, `cpuset`).
        subsystem: String,
        /// Description of the failure.
        message: String,
    },

    /// The requested lifecycle transition is not allowed from the current state.
    #[error("container {id}: {message}")]
    InvalidState {
        /// Container name or id.
        id: String,
        /// Why the transition was refused.
        message: String,
    },
}

impl CorralError {
    /// Builds an [`CorralError::Io`] for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`CorralError::Config`] from any displayable message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CorralError>;
