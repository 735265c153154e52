//! CPU pinning via `cpuset.cpus`.
//!
//! A freshly created v1 cpuset has empty `cpuset.cpus` and `cpuset.mems`
//! and refuses tasks until both are filled, so every level created on the
//! way to the container's cgroup copies them from its parent first.

use std::path::Path;
use std::sync::Arc;

use corral_common::error::Result;
use corral_common::types::ResourceLimits;

use super::{CgroupFs, Hierarchy, Subsystem};

const NAME: &str = "cpuset";
const INHERITED: [&str; 2] = ["cpuset.cpus", "cpuset.mems"];

/// Driver for the `cpuset` controller.
#[derive(Debug, Clone)]
pub struct CpusetSubsystem {
    fs: Arc<CgroupFs>,
}

impl CpusetSubsystem {
    /// Creates the driver.
    #[must_use]
    pub const fn new(fs: Arc<CgroupFs>) -> Self {
        Self { fs }
    }
}

impl Subsystem for CpusetSubsystem {
    fn name(&self) -> &'static str {
        NAME
    }

    fn set(&self, cgroup_path: &str, limits: &ResourceLimits) -> Result<()> {
        let Some(cpus) = limits.cpu_set.as_deref() else {
            return Ok(());
        };
        let dir = self.fs.get_or_create_path(NAME, cgroup_path, true)?;
        if dir.hierarchy == Hierarchy::V1 {
            inherit_from_parents(&dir.root, &dir.path)?;
        }
        super::write_control(NAME, &dir.path, "cpuset.cpus", cpus)
    }

    fn apply(&self, cgroup_path: &str, pid: i32) -> Result<()> {
        super::attach(&self.fs, NAME, cgroup_path, pid)
    }

    fn remove(&self, cgroup_path: &str) -> Result<()> {
        super::remove(&self.fs, NAME, cgroup_path)
    }
}

/// Fills empty `cpuset.cpus`/`cpuset.mems` on each level below `root`,
/// walking down to `leaf`.
fn inherit_from_parents(root: &Path, leaf: &Path) -> Result<()> {
    let Ok(relative) = leaf.strip_prefix(root) else {
        return Ok(());
    };
    let mut parent = root.to_path_buf();
    for component in relative.components() {
        let child = parent.join(component);
        for file in INHERITED {
            if read_trimmed(&child.join(file)).is_empty() {
                let value = read_trimmed(&parent.join(file));
                if !value.is_empty() {
                    super::write_control(NAME, &child, file, &value)?;
                }
            }
        }
        parent = child;
    }
    Ok(())
}

fn read_trimmed(path: &Path) -> String {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}
