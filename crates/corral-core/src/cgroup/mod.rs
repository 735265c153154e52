//! Cgroup resource management.
//!
//! A [`CgroupManager`] owns one container's cgroup path and fans `set`,
//! `apply`, and `destroy` out over a [`SubsystemSet`]. Each [`Subsystem`]
//! locates its own hierarchy through [`CgroupFs`], so the CPU, cpuset and
//! memory controllers may live in separate v1 mounts or share the unified
//! v2 tree.

pub mod cpu;
pub mod cpuset;
pub mod memory;
pub mod mountinfo;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use corral_common::error::{CorralError, Result};
use corral_common::types::ResourceLimits;

pub use mountinfo::{CgroupDir, CgroupFs, Hierarchy};

/// One resource-control axis backed by a kernel cgroup controller.
pub trait Subsystem: Send + Sync + fmt::Debug {
    /// Controller name as it appears in the mount table.
    fn name(&self) -> &'static str;

    /// Writes this axis of `limits` under `cgroup_path`.
    ///
    /// Must not touch the filesystem when the axis is unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the hierarchy is missing or a control file
    /// cannot be written.
    fn set(&self, cgroup_path: &str, limits: &ResourceLimits) -> Result<()>;

    /// Attaches `pid` to the cgroup, if `set` created one.
    ///
    /// # Errors
    ///
    /// Returns an error if the task list cannot be written.
    fn apply(&self, cgroup_path: &str, pid: i32) -> Result<()>;

    /// Removes the cgroup directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    fn remove(&self, cgroup_path: &str) -> Result<()>;
}

/// A subsystem that failed during a fan-out; the others still ran.
#[derive(Debug)]
pub struct SubsystemFailure {
    /// Name of the failing subsystem.
    pub subsystem: &'static str,
    /// What went wrong.
    pub error: CorralError,
}

impl fmt::Display for SubsystemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subsystem, self.error)
    }
}

/// Registered subsystem drivers, keyed by controller name.
#[derive(Debug, Default)]
pub struct SubsystemSet {
    drivers: BTreeMap<&'static str, Box<dyn Subsystem>>,
}

impl SubsystemSet {
    /// The three drivers shipped with corral, resolving hierarchies via `fs`.
    #[must_use]
    pub fn host(fs: Arc<CgroupFs>) -> Self {
        Self::from_drivers(vec![
            Box::new(cpu::CpuSubsystem::new(Arc::clone(&fs))),
            Box::new(cpuset::CpusetSubsystem::new(Arc::clone(&fs))),
            Box::new(memory::MemorySubsystem::new(fs)),
        ])
    }

    /// Builds a set from arbitrary drivers. A later driver with the same
    /// name replaces an earlier one.
    #[must_use]
    pub fn from_drivers(drivers: Vec<Box<dyn Subsystem>>) -> Self {
        Self {
            drivers: drivers.into_iter().map(|d| (d.name(), d)).collect(),
        }
    }

    /// Names of the registered drivers in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.drivers.keys().copied()
    }

    fn iter(&self) -> impl Iterator<Item = &dyn Subsystem> {
        self.drivers.values().map(AsRef::as_ref)
    }
}

/// Handle to one container's cgroup across every registered subsystem.
#[derive(Debug, Clone)]
pub struct CgroupManager {
    path: String,
    subsystems: Arc<SubsystemSet>,
}

impl CgroupManager {
    /// Creates a manager for `path`, relative to each hierarchy root.
    ///
    /// Nothing is created until [`set`](Self::set) runs.
    #[must_use]
    pub fn new(path: impl Into<String>, subsystems: Arc<SubsystemSet>) -> Self {
        Self {
            path: path.into(),
            subsystems,
        }
    }

    /// Cgroup path shared by all subsystems.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Writes `limits` through every subsystem.
    ///
    /// Every driver runs even when an earlier one fails; failures are logged
    /// and returned for the caller to report.
    pub fn set(&self, limits: &ResourceLimits) -> Vec<SubsystemFailure> {
        self.fan_out("set", |s| s.set(&self.path, limits))
    }

    /// Attaches `pid` through every subsystem.
    ///
    /// Must finish before the container's command is released, or the
    /// command runs unconstrained until it does.
    pub fn apply(&self, pid: i32) -> Vec<SubsystemFailure> {
        tracing::debug!(pid, path = %self.path, "attaching to cgroups");
        self.fan_out("apply", |s| s.apply(&self.path, pid))
    }

    /// Removes the cgroup from every subsystem. Failures are only logged.
    pub fn destroy(&self) {
        let failures = self.fan_out("remove", |s| s.remove(&self.path));
        if failures.is_empty() {
            tracing::info!(path = %self.path, "cgroup destroyed");
        }
    }

    fn fan_out(
        &self,
        op: &'static str,
        mut f: impl FnMut(&dyn Subsystem) -> Result<()>,
    ) -> Vec<SubsystemFailure> {
        let mut failures = Vec::new();
        for subsystem in self.subsystems.iter() {
            if let Err(error) = f(subsystem) {
                tracing::warn!(
                    subsystem = subsystem.name(),
                    op,
                    path = %self.path,
                    error = %error,
                    "cgroup operation failed"
                );
                failures.push(SubsystemFailure {
                    subsystem: subsystem.name(),
                    error,
                });
            }
        }
        failures
    }
}

/// Writes `value` into the control file `file` of `dir`.
pub(crate) fn write_control(subsystem: &str, dir: &Path, file: &str, value: &str) -> Result<()> {
    let target = dir.join(file);
    std::fs::write(&target, value).map_err(|e| CorralError::Cgroup {
        subsystem: subsystem.to_string(),
        message: format!("write {}: {e}", target.display()),
    })?;
    tracing::debug!(subsystem, file, value, "cgroup limit written");
    Ok(())
}

/// Writes `pid` into the task list of an existing cgroup; a subsystem whose
/// cgroup was never created has nothing to attach to.
pub(crate) fn attach(fs: &CgroupFs, subsystem: &str, cgroup_path: &str, pid: i32) -> Result<()> {
    let Ok(dir) = fs.get_or_create_path(subsystem, cgroup_path, false) else {
        tracing::debug!(subsystem, cgroup_path, "no cgroup to attach to");
        return Ok(());
    };
    let tasks = match dir.hierarchy {
        Hierarchy::V1 => "tasks",
        Hierarchy::Unified => "cgroup.procs",
    };
    write_control(subsystem, &dir.path, tasks, &pid.to_string())
}

/// Removes the cgroup directory of one subsystem if it exists.
pub(crate) fn remove(fs: &CgroupFs, subsystem: &str, cgroup_path: &str) -> Result<()> {
    let Ok(dir) = fs.get_or_create_path(subsystem, cgroup_path, false) else {
        return Ok(());
    };
    match std::fs::remove_dir(&dir.path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CorralError::Cgroup {
            subsystem: subsystem.to_string(),
            message: format!("remove {}: {e}", dir.path.display()),
        }),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fake v1 hierarchies rooted in a temp directory.

    use std::path::{Path, PathBuf};

    use super::CgroupFs;

    /// Creates one v1 hierarchy per controller under `base` and a mountinfo
    /// file describing them.
    pub fn fake_v1(base: &Path, controllers: &[&str]) -> CgroupFs {
        let mut table = String::new();
        for (i, name) in controllers.iter().enumerate() {
            let root = hierarchy_root(base, name);
            std::fs::create_dir_all(&root).unwrap();
            table.push_str(&format!(
                "{} 22 0:{} / {} rw,nosuid - cgroup cgroup rw,{name}\n",
                30 + i,
                26 + i,
                root.display()
            ));
        }
        let info = base.join("mountinfo");
        std::fs::write(&info, table).unwrap();
        CgroupFs::new(info)
    }

    pub fn hierarchy_root(base: &Path, controller: &str) -> PathBuf {
        base.join("sys").join(controller)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::testing::{fake_v1, hierarchy_root};
    use super::*;

    #[derive(Debug, Default)]
    struct Recorder {
        name: &'static str,
        fail: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Subsystem for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn set(&self, path: &str, _limits: &ResourceLimits) -> Result<()> {
            self.calls.lock().unwrap().push(format!("set {} {path}", self.name));
            if self.fail {
                return Err(CorralError::config("boom"));
            }
            Ok(())
        }

        fn apply(&self, path: &str, pid: i32) -> Result<()> {
            self.calls.lock().unwrap().push(format!("apply {} {path} {pid}", self.name));
            Ok(())
        }

        fn remove(&self, _path: &str) -> Result<()> {
            Err(CorralError::config("busy"))
        }
    }

    #[test]
    fn failing_driver_does_not_stop_the_others() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let set = SubsystemSet::from_drivers(vec![
            Box::new(Recorder { name: "a", fail: true, calls: Arc::clone(&calls) }),
            Box::new(Recorder { name: "b", fail: false, calls: Arc::clone(&calls) }),
        ]);
        let manager = CgroupManager::new("corral/x", Arc::new(set));

        let failures = manager.set(&ResourceLimits::default());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].subsystem, "a");
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["set a corral/x".to_string(), "set b corral/x".to_string()]
        );
    }

    #[test]
    fn destroy_swallows_errors() {
        let set = SubsystemSet::from_drivers(vec![Box::new(Recorder {
            name: "a",
            ..Recorder::default()
        })]);
        CgroupManager::new("corral/x", Arc::new(set)).destroy();
    }

    #[test]
    fn host_set_registers_three_controllers() {
        let set = SubsystemSet::host(Arc::new(CgroupFs::host()));
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["cpu", "cpuset", "memory"]);
    }

    #[test]
    fn set_writes_only_the_configured_axis() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(fake_v1(dir.path(), &["cpu", "cpuset", "memory"]));
        let manager = CgroupManager::new("corral/c1", Arc::new(SubsystemSet::host(fs)));

        let limits = ResourceLimits {
            memory_limit: Some("100m".into()),
            ..ResourceLimits::default()
        };
        assert!(manager.set(&limits).is_empty());

        let mem = hierarchy_root(dir.path(), "memory").join("corral/c1");
        assert_eq!(
            std::fs::read_to_string(mem.join("memory.limit_in_bytes")).unwrap(),
            "100m"
        );
        assert!(!hierarchy_root(dir.path(), "cpu").join("corral").exists());
        assert!(!hierarchy_root(dir.path(), "cpuset").join("corral").exists());
    }

    #[test]
    fn empty_limits_write_nothing_and_apply_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(fake_v1(dir.path(), &["cpu", "cpuset", "memory"]));
        let manager = CgroupManager::new("corral/c2", Arc::new(SubsystemSet::host(fs)));

        assert!(manager.set(&ResourceLimits::default()).is_empty());
        assert!(manager.apply(4242).is_empty());
        for controller in ["cpu", "cpuset", "memory"] {
            let root = hierarchy_root(dir.path(), controller);
            assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0, "{controller}");
        }
    }

    #[test]
    fn apply_then_destroy_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(fake_v1(dir.path(), &["cpu", "cpuset", "memory"]));
        let manager = CgroupManager::new("corral/c3", Arc::new(SubsystemSet::host(fs)));
        let limits = ResourceLimits {
            cpu_share: Some("512".into()),
            ..ResourceLimits::default()
        };

        assert!(manager.set(&limits).is_empty());
        assert!(manager.apply(77).is_empty());
        let leaf = hierarchy_root(dir.path(), "cpu").join("corral/c3");
        assert_eq!(std::fs::read_to_string(leaf.join("cpu.shares")).unwrap(), "512");
        assert_eq!(std::fs::read_to_string(leaf.join("tasks")).unwrap(), "77");

        // A real cgroupfs drops control files on rmdir; plain dirs need emptying.
        for entry in std::fs::read_dir(&leaf).unwrap() {
            std::fs::remove_file(entry.unwrap().path()).unwrap();
        }
        manager.destroy();
        assert!(!leaf.exists());
    }
}
