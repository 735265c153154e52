//! CPU share control.
//!
//! v1 takes the share directly in `cpu.shares`; v2 expects a weight in
//! `cpu.weight`, mapped linearly from the shares range `[2, 262144]` onto
//! `[1, 10000]`.

use std::sync::Arc;

use corral_common::error::{CorralError, Result};
use corral_common::types::ResourceLimits;

use super::{CgroupFs, Hierarchy, Subsystem};

const NAME: &str = "cpu";

/// Driver for the `cpu` controller.
#[derive(Debug, Clone)]
pub struct CpuSubsystem {
    fs: Arc<CgroupFs>,
}

impl CpuSubsystem {
    /// Creates the driver.
    #[must_use]
    pub const fn new(fs: Arc<CgroupFs>) -> Self {
        Self { fs }
    }
}

impl Subsystem for CpuSubsystem {
    fn name(&self) -> &'static str {
        NAME
    }

    fn set(&self, cgroup_path: &str, limits: &ResourceLimits) -> Result<()> {
        let Some(share) = limits.cpu_share.as_deref() else {
            return Ok(());
        };
        let dir = self.fs.get_or_create_path(NAME, cgroup_path, true)?;
        match dir.hierarchy {
            Hierarchy::V1 => super::write_control(NAME, &dir.path, "cpu.shares", share),
            Hierarchy::Unified => {
                let weight = shares_to_weight(share)?;
                super::write_control(NAME, &dir.path, "cpu.weight", &weight.to_string())
            }
        }
    }

    fn apply(&self, cgroup_path: &str, pid: i32) -> Result<()> {
        super::attach(&self.fs, NAME, cgroup_path, pid)
    }

    fn remove(&self, cgroup_path: &str) -> Result<()> {
        super::remove(&self.fs, NAME, cgroup_path)
    }
}

/// Converts v1 shares to a v2 weight.
///
/// # Errors
///
/// Returns [`CorralError::Cgroup`] if `share` is not an integer.
pub fn shares_to_weight(share: &str) -> Result<u64> {
    let shares: u64 = share.trim().parse().map_err(|_| CorralError::Cgroup {
        subsystem: NAME.to_string(),
        message: format!("cpu share must be an integer, got {share:?}"),
    })?;
    let shares = shares.clamp(2, 262_144);
    Ok(1 + (shares - 2) * 9999 / 262_142)
}
