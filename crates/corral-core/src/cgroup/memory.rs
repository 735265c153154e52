//! Memory limit control via `memory.limit_in_bytes` (v1) or `memory.max` (v2).
//!
//! Both files accept `k`/`m`/`g` suffixed quantities, so the limit is
//! written as given.

use std::sync::Arc;

use corral_common::error::Result;
use corral_common::types::ResourceLimits;

use super::{CgroupFs, Hierarchy, Subsystem};

const NAME: &str = "memory";

/// Driver for the `memory` controller.
#[derive(Debug, Clone)]
pub struct MemorySubsystem {
    fs: Arc<CgroupFs>,
}

impl MemorySubsystem {
    /// Creates the driver.
    #[must_use]
    pub const fn new(fs: Arc<CgroupFs>) -> Self {
        Self { fs }
    }
}

impl Subsystem for MemorySubsystem {
    fn name(&self) -> &'static str {
        NAME
    }

    fn set(&self, cgroup_path: &str, limits: &ResourceLimits) -> Result<()> {
        let Some(limit) = limits.memory_limit.as_deref() else {
            return Ok(());
        };
        let dir = self.fs.get_or_create_path(NAME, cgroup_path, true)?;
        let file = match dir.hierarchy {
            Hierarchy::V1 => "memory.limit_in_bytes",
            Hierarchy::Unified => "memory.max",
        };
        super::write_control(NAME, &dir.path, file, limit)
    }

    fn apply(&self, cgroup_path: &str, pid: i32) -> Result<()> {
        super::attach(&self.fs, NAME, cgroup_path, pid)
    }

    fn remove(&self, cgroup_path: &str) -> Result<()> {
        super::remove(&self.fs, NAME, cgroup_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::testing::{fake_v1, hierarchy_root};

    #[test]
    fn apply_writes_pid_to_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let driver = MemorySubsystem::new(Arc::new(fake_v1(dir.path(), &["memory"])));
        let limits = ResourceLimits {
            memory_limit: Some("64m".into()),
            ..ResourceLimits::default()
        };
        driver.set("corral/m", &limits).unwrap();
        driver.apply("corral/m", 1234).unwrap();

        let leaf = hierarchy_root(dir.path(), "memory").join("corral/m");
        assert_eq!(std::fs::read_to_string(leaf.join("tasks")).unwrap(), "1234");
    }

    #[test]
    fn remove_of_absent_cgroup_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let driver = MemorySubsystem::new(Arc::new(fake_v1(dir.path(), &["memory"])));
        driver.remove("corral/never").unwrap();
    }
}
