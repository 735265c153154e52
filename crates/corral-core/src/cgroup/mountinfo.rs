//! Locating cgroup hierarchies through the process mount table.
//!
//! Each line of `/proc/self/mountinfo` looks like
//! `36 35 0:30 / /sys/fs/cgroup/memory rw,nosuid - cgroup cgroup rw,memory`.
//! A v1 hierarchy advertises its subsystems in the trailing super-options;
//! the unified v2 hierarchy is recognised by its `cgroup2` filesystem type.

use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};

/// Which kernel interface a located cgroup directory speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hierarchy {
    /// A per-subsystem v1 hierarchy (`tasks`, `memory.limit_in_bytes`).
    V1,
    /// The unified v2 hierarchy (`cgroup.procs`, `memory.max`).
    Unified,
}

/// One parsed mountinfo entry, reduced to what cgroup lookup needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Where the filesystem is mounted.
    pub mount_point: PathBuf,
    /// Filesystem type (`cgroup`, `cgroup2`, `ext4`, ...).
    pub fs_type: String,
    /// Comma-separated super options split into a list.
    pub super_options: Vec<String>,
}

/// Parses mountinfo text, skipping lines that do not have the expected shape.
#[must_use]
pub fn parse_mountinfo(content: &str) -> Vec<MountEntry> {
    content.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<MountEntry> {
    let (head, tail) = line.split_once(" - ")?;
    let mount_point = head.split(' ').nth(4)?;
    let mut tail = tail.split(' ');
    let fs_type = tail.next()?;
    let _source = tail.next()?;
    let options = tail.next().unwrap_or_default();
    Some(MountEntry {
        mount_point: PathBuf::from(unescape(mount_point)),
        fs_type: fs_type.to_string(),
        super_options: options.split(',').map(str::to_string).collect(),
    })
}

/// Undoes the kernel's octal escapes (`\040` for a space) in a path field.
fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(i) = rest.find('\\') {
        out.push_str(&rest[..i]);
        match rest
            .get(i + 1..i + 4)
            .and_then(|digits| u8::from_str_radix(digits, 8).ok())
        {
            Some(byte) => {
                out.push(char::from(byte));
                rest = &rest[i + 4..];
            }
            None => {
                out.push('\\');
                rest = &rest[i + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// A resolved cgroup directory for one subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupDir {
    /// Root of the hierarchy the directory lives in.
    pub root: PathBuf,
    /// Absolute path of the container's cgroup directory.
    pub path: PathBuf,
    /// Interface spoken by the hierarchy.
    pub hierarchy: Hierarchy,
}

/// Resolves subsystem names to cgroup directories.
///
/// The mount table is re-read on every lookup so a hierarchy mounted after
/// startup is still found.
#[derive(Debug, Clone)]
pub struct CgroupFs {
    mountinfo: PathBuf,
}

impl CgroupFs {
    /// Uses the given mountinfo file as the mount table.
    #[must_use]
    pub fn new(mountinfo: impl Into<PathBuf>) -> Self {
        Self {
            mountinfo: mountinfo.into(),
        }
    }

    /// Uses the calling process's mount table.
    #[must_use]
    pub fn host() -> Self {
        Self::new(corral_common::constants::PROC_MOUNTINFO)
    }

    /// Finds the hierarchy root serving `subsystem`.
    ///
    /// A v1 mount listing the subsystem in its options wins; otherwise a
    /// `cgroup2` mount whose `cgroup.controllers` lists it is used.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Cgroup`] if no hierarchy serves the subsystem,
    /// or an I/O error if the mount table cannot be read.
    pub fn find_mount(&self, subsystem: &str) -> Result<(PathBuf, Hierarchy)> {
        let content = std::fs::read_to_string(&self.mountinfo)
            .map_err(|e| CorralError::io(&self.mountinfo, e))?;
        let entries = parse_mountinfo(&content);

        if let Some(entry) = entries
            .iter()
            .find(|e| e.fs_type == "cgroup" && e.super_options.iter().any(|o| o == subsystem))
        {
            return Ok((entry.mount_point.clone(), Hierarchy::V1));
        }

        entries
            .iter()
            .filter(|e| e.fs_type == "cgroup2")
            .find(|e| unified_has_controller(&e.mount_point, subsystem))
            .map(|e| (e.mount_point.clone(), Hierarchy::Unified))
            .ok_or_else(|| CorralError::Cgroup {
                subsystem: subsystem.to_string(),
                message: "no mounted hierarchy provides this subsystem".into(),
            })
    }

    /// Resolves `cgroup_path` under the hierarchy serving `subsystem`,
    /// creating the directory when `auto_create` is set and it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the hierarchy cannot be found, the directory is
    /// absent without `auto_create`, or creation fails.
    pub fn get_or_create_path(
        &self,
        subsystem: &str,
        cgroup_path: &str,
        auto_create: bool,
    ) -> Result<CgroupDir> {
        let (root, hierarchy) = self.find_mount(subsystem)?;
        let path = root.join(cgroup_path.trim_start_matches('/'));

        if !path.exists() {
            if !auto_create {
                return Err(CorralError::Cgroup {
                    subsystem: subsystem.to_string(),
                    message: format!("cgroup {} does not exist", path.display()),
                });
            }
            if hierarchy == Hierarchy::Unified {
                enable_controller_chain(&root, &path, subsystem);
            }
            std::fs::create_dir_all(&path).map_err(|e| CorralError::Cgroup {
                subsystem: subsystem.to_string(),
                message: format!("create {}: {e}", path.display()),
            })?;
            tracing::debug!(subsystem, path = %path.display(), "cgroup created");
        }

        Ok(CgroupDir {
            root,
            path,
            hierarchy,
        })
    }
}

fn unified_has_controller(root: &Path, subsystem: &str) -> bool {
    std::fs::read_to_string(root.join("cgroup.controllers"))
        .is_ok_and(|c| c.split_whitespace().any(|c| c == subsystem))
}

/// Enables `subsystem` in `cgroup.subtree_control` of every directory from
/// `root` down to the parent of `leaf`, creating intermediate directories.
fn enable_controller_chain(root: &Path, leaf: &Path, subsystem: &str) {
    let Ok(relative) = leaf.strip_prefix(root) else {
        return;
    };
    let mut current = root.to_path_buf();
    let components: Vec<_> = relative.components().collect();
    for component in components.iter().take(components.len().saturating_sub(1)) {
        write_subtree_control(&current, subsystem);
        current.push(component);
        if let Err(e) = std::fs::create_dir_all(&current) {
            tracing::debug!(path = %current.display(), error = %e, "intermediate cgroup not created");
            return;
        }
    }
    write_subtree_control(&current, subsystem);
}

fn write_subtree_control(dir: &Path, subsystem: &str) {
    let file = dir.join("cgroup.subtree_control");
    if let Err(e) = std::fs::write(&file, format!("+{subsystem}")) {
        tracing::debug!(path = %file.display(), error = %e, "controller not delegated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
30 22 0:26 / /sys/fs/cgroup/memory rw,nosuid shared:9 - cgroup cgroup rw,memory
31 22 0:27 / /sys/fs/cgroup/cpu,cpuacct rw,nosuid shared:10 - cgroup cgroup rw,cpu,cpuacct
32 22 0:28 / /sys/fs/cgroup/cpuset rw,nosuid shared:11 - cgroup cgroup rw,cpuset
";

    #[test]
    fn parses_mount_point_type_and_options() {
        let entries = parse_mountinfo(SAMPLE);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1].mount_point, PathBuf::from("/sys/fs/cgroup/memory"));
        assert_eq!(entries[1].fs_type, "cgroup");
        assert_eq!(entries[2].super_options, vec!["rw", "cpu", "cpuacct"]);
    }

    #[test]
    fn escaped_mount_points_are_decoded() {
        let entries =
            parse_mountinfo("90 1 0:50 / /var/lib/my\\040root rw - overlay overlay rw\n");
        assert_eq!(entries[0].mount_point, PathBuf::from("/var/lib/my root"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        assert!(parse_mountinfo("garbage line\n\n").is_empty());
    }

    #[test]
    fn finds_v1_mount_by_exact_option() {
        let dir = tempfile::tempdir().unwrap();
        let info = dir.path().join("mountinfo");
        std::fs::write(&info, SAMPLE).unwrap();
        let fs = CgroupFs::new(&info);

        let (root, hierarchy) = fs.find_mount("cpu").unwrap();
        assert_eq!(root, PathBuf::from("/sys/fs/cgroup/cpu,cpuacct"));
        assert_eq!(hierarchy, Hierarchy::V1);
        assert_eq!(
            fs.find_mount("cpuset").unwrap().0,
            PathBuf::from("/sys/fs/cgroup/cpuset")
        );
    }

    #[test]
    fn missing_subsystem_is_a_lookup_error() {
        let dir = tempfile::tempdir().unwrap();
        let info = dir.path().join("mountinfo");
        std::fs::write(&info, SAMPLE).unwrap();
        let err = CgroupFs::new(&info).find_mount("pids").unwrap_err();
        assert!(matches!(err, CorralError::Cgroup { .. }));
    }

    #[test]
    fn unified_mount_is_used_when_controller_listed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("unified");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("cgroup.controllers"), "cpuset cpu io memory pids\n").unwrap();
        let info = dir.path().join("mountinfo");
        std::fs::write(
            &info,
            format!(
                "40 22 0:35 / {} rw - cgroup2 cgroup2 rw,nsdelegate\n",
                root.display()
            ),
        )
        .unwrap();

        let fs = CgroupFs::new(&info);
        let cg = fs.get_or_create_path("memory", "corral/abc", true).unwrap();
        assert_eq!(cg.hierarchy, Hierarchy::Unified);
        assert!(cg.path.is_dir());
        assert_eq!(
            std::fs::read_to_string(root.join("cgroup.subtree_control")).unwrap(),
            "+memory"
        );
        assert!(fs.find_mount("rdma").is_err());
    }

    #[test]
    fn get_without_create_fails_for_absent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let info = dir.path().join("mountinfo");
        let mem = dir.path().join("memory");
        std::fs::create_dir_all(&mem).unwrap();
        std::fs::write(
            &info,
            format!("30 22 0:26 / {} rw - cgroup cgroup rw,memory\n", mem.display()),
        )
        .unwrap();
        let fs = CgroupFs::new(&info);

        assert!(fs.get_or_create_path("memory", "corral/x", false).is_err());
        let created = fs.get_or_create_path("memory", "corral/x", true).unwrap();
        assert_eq!(created.path, mem.join("corral/x"));
        assert!(fs.get_or_create_path("memory", "corral/x", false).is_ok());
    }
}
