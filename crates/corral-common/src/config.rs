//! Runtime configuration and the on-disk layout derived from it.
//!
//! Every crate resolves container, image, and network locations through
//! [`RuntimeConfig`] so that `run`, `ps`, `rm`, and `network` agree on paths.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants;

/// Root configuration for the corral runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Per-container records, logs, and network descriptors live here.
    pub run_dir: PathBuf,
    /// Image tarballs, extracted layers, write layers, and mount points.
    pub root_dir: PathBuf,
    /// Directory of network descriptor files, one per network.
    pub network_dir: PathBuf,
    /// Subnet allocation table shared by all networks.
    pub ipam_file: PathBuf,
    /// Parent directory of container cgroups inside each hierarchy.
    pub cgroup_parent: String,
    /// Mount table scanned for cgroup hierarchies.
    pub mountinfo: PathBuf,
    /// Whether the init process pivots into the container root before exec.
    pub pivot_root: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::with_dirs(constants::DEFAULT_RUN_DIR, constants::DEFAULT_ROOT_DIR)
    }
}

impl RuntimeConfig {
    /// Builds a configuration rooted at the given run and data directories.
    #[must_use]
    pub fn with_dirs(run_dir: impl Into<PathBuf>, root_dir: impl Into<PathBuf>) -> Self {
        let run_dir = run_dir.into();
        Self {
            network_dir: run_dir.join("network").join("networks"),
            ipam_file: run_dir.join("network").join("ipam").join("subnet.json"),
            run_dir,
            root_dir: root_dir.into(),
            cgroup_parent: constants::DEFAULT_CGROUP_PARENT.to_string(),
            mountinfo: PathBuf::from(constants::PROC_MOUNTINFO),
            pivot_root: false,
        }
    }

    /// Reads overrides from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Applies `CORRAL_RUN_DIR`, `CORRAL_ROOT`, and `CORRAL_PIVOT_ROOT`
    /// as returned by `lookup` on top of the defaults.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let run_dir = lookup(constants::ENV_RUN_DIR)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| constants::DEFAULT_RUN_DIR.to_string());
        let root_dir = lookup(constants::ENV_ROOT_DIR)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| constants::DEFAULT_ROOT_DIR.to_string());
        let mut config = Self::with_dirs(run_dir, root_dir);
        config.pivot_root = lookup(constants::ENV_PIVOT_ROOT).is_some_and(|v| v == "1");
        config
    }

    /// Directory holding one container's record and log.
    #[must_use]
    pub fn container_dir(&self, name: &str) -> PathBuf {
        self.run_dir.join("containers").join(name)
    }

    /// Record file of one container.
    #[must_use]
    pub fn config_file(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(constants::CONFIG_NAME)
    }

    /// Log file of one container.
    #[must_use]
    pub fn log_file(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(constants::CONTAINER_LOG_FILE)
    }

    /// Image tarball for `image`.
    #[must_use]
    pub fn image_tar(&self, image: &str) -> PathBuf {
        self.root_dir.join("images").join(format!("{image}.tar"))
    }

    /// Extracted read-only layer for `image`.
    #[must_use]
    pub fn image_layer(&self, image: &str) -> PathBuf {
        self.root_dir.join("layers").join(image)
    }

    /// Writable layer of one container.
    #[must_use]
    pub fn write_layer(&self, name: &str) -> PathBuf {
        self.root_dir.join("writable").join(name)
    }

    /// Overlay work directory of one container.
    #[must_use]
    pub fn work_dir(&self, name: &str) -> PathBuf {
        self.root_dir.join("work").join(name)
    }

    /// Merged mount point (container root) of one container.
    #[must_use]
    pub fn mount_point(&self, name: &str) -> PathBuf {
        self.root_dir.join("mnt").join(name)
    }

    /// Cgroup path, relative to each hierarchy root, for one container.
    #[must_use]
    pub fn cgroup_path(&self, id: &str) -> String {
        format!("{}/{id}", self.cgroup_parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_uses_system_dirs() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.run_dir, PathBuf::from("/var/run/corral"));
        assert_eq!(
            cfg.config_file("web"),
            PathBuf::from("/var/run/corral/containers/web/config.json")
        );
        assert_eq!(
            cfg.ipam_file,
            PathBuf::from("/var/run/corral/network/ipam/subnet.json")
        );
        assert!(!cfg.pivot_root);
    }

    #[test]
    fn lookup_overrides_dirs_and_pivot() {
        let cfg = RuntimeConfig::from_lookup(|key| match key {
            "CORRAL_RUN_DIR" => Some("/tmp/run".into()),
            "CORRAL_ROOT" => Some("/tmp/root".into()),
            "CORRAL_PIVOT_ROOT" => Some("1".into()),
            _ => None,
        });
        assert_eq!(cfg.log_file("a"), PathBuf::from("/tmp/run/containers/a/container.log"));
        assert_eq!(cfg.image_tar("busybox"), PathBuf::from("/tmp/root/images/busybox.tar"));
        assert_eq!(cfg.mount_point("a"), PathBuf::from("/tmp/root/mnt/a"));
        assert!(cfg.pivot_root);
    }

    #[test]
    fn empty_env_values_fall_back_to_defaults() {
        let cfg = RuntimeConfig::from_lookup(|_| Some(String::new()));
        assert_eq!(cfg, RuntimeConfig::default());
    }

    #[test]
    fn cgroup_path_nests_under_parent() {
        assert_eq!(RuntimeConfig::default().cgroup_path("abc"), "corral/abc");
    }
}
