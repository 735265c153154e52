//! `OverlayFS` mounts for container root filesystems.
//!
//! The extracted image is the single read-only lower layer; each container
//! gets its own upper (write) layer and work directory.

use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};

use crate::cgroup::mountinfo::parse_mountinfo;

/// Directories making up one overlay mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Read-only lower layers, topmost first.
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer.
    pub upper_dir: PathBuf,
    /// Scratch directory on the same filesystem as `upper_dir`.
    pub work_dir: PathBuf,
    /// Where the merged view is mounted.
    pub merged_dir: PathBuf,
}

impl OverlayConfig {
    /// The mount data string passed to the kernel.
    #[must_use]
    pub fn mount_options(&self) -> String {
        let lowers = self
            .lower_dirs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        format!(
            "lowerdir={lowers},upperdir={},workdir={}",
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }
}

/// Creates the upper, work, and merged directories and mounts the overlay.
///
/// # Errors
///
/// Returns an error if directory creation or the mount fails.
pub fn mount_overlay(config: &OverlayConfig) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    for dir in [&config.upper_dir, &config.work_dir, &config.merged_dir] {
        std::fs::create_dir_all(dir).map_err(|e| CorralError::io(dir, e))?;
    }

    let opts = config.mount_options();
    mount(
        Some("overlay"),
        &config.merged_dir,
        Some("overlay"),
        MsFlags::empty(),
        Some(opts.as_str()),
    )
    .map_err(|e| CorralError::PermissionDenied {
        message: format!("overlay mount at {}: {e}", config.merged_dir.display()),
    })?;

    tracing::info!(merged = %config.merged_dir.display(), "overlayfs mounted");
    Ok(())
}

/// Lazily detaches whatever is mounted at `path`.
///
/// # Errors
///
/// Returns an error if `umount2(2)` fails.
pub fn unmount(path: &Path) -> Result<()> {
    nix::mount::umount2(path, nix::mount::MntFlags::MNT_DETACH).map_err(|e| {
        CorralError::PermissionDenied {
            message: format!("unmount {}: {e}", path.display()),
        }
    })?;
    tracing::debug!(path = %path.display(), "unmounted");
    Ok(())
}

/// Detaches `path` only if `mountinfo` lists a mount there.
///
/// Returns `false` when nothing was mounted, including when `path` does
/// not exist.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read or the unmount
/// fails; the caller must then treat `path` as still mounted.
pub fn unmount_if_mounted(path: &Path, mountinfo: &Path) -> Result<bool> {
    let path = match path.canonicalize() {
        Ok(path) => path,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(CorralError::io(path, e)),
    };
    let table = std::fs::read_to_string(mountinfo).map_err(|e| CorralError::io(mountinfo, e))?;
    if !parse_mountinfo(&table)
        .iter()
        .any(|entry| entry.mount_point == path)
    {
        return Ok(false);
    }
    unmount(&path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_unlisted_paths_need_no_unmount() {
        let dir = tempfile::tempdir().unwrap();
        let info = dir.path().join("mountinfo");
        std::fs::write(&info, "22 1 0:21 / /proc rw - proc proc rw\n").unwrap();

        assert!(!unmount_if_mounted(&dir.path().join("absent"), &info).unwrap());
        assert!(!unmount_if_mounted(dir.path(), &info).unwrap());
    }

    #[test]
    fn unreadable_mount_table_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = unmount_if_mounted(dir.path(), &dir.path().join("no-mountinfo"));
        assert!(matches!(err, Err(CorralError::Io { .. })));
    }

    #[test]
    fn options_list_every_layer() {
        let config = OverlayConfig {
            lower_dirs: vec![PathBuf::from("/l/busybox")],
            upper_dir: PathBuf::from("/w/c1"),
            work_dir: PathBuf::from("/k/c1"),
            merged_dir: PathBuf::from("/m/c1"),
        };
        assert_eq!(
            config.mount_options(),
            "lowerdir=/l/busybox,upperdir=/w/c1,workdir=/k/c1"
        );
    }

    #[test]
    fn lowers_join_with_colons() {
        let config = OverlayConfig {
            lower_dirs: vec![PathBuf::from("/a"), PathBuf::from("/b")],
            upper_dir: PathBuf::from("/u"),
            work_dir: PathBuf::from("/w"),
            merged_dir: PathBuf::from("/m"),
        };
        assert!(config.mount_options().starts_with("lowerdir=/a:/b,"));
    }
}
