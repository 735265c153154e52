//! Switching the root filesystem with `pivot_root(2)`.
//!
//! Unlike `chroot`, the old root is actually unmounted afterwards, so
//! nothing outside the container root stays reachable.

use std::path::Path;

use corral_common::error::{CorralError, Result};
use nix::mount::{MntFlags, umount2};

use super::mount::{bind_mount, make_rprivate, mount_dev_tmpfs, mount_proc};

/// Directory inside the new root that briefly holds the old one.
pub const PUT_OLD: &str = ".pivot_root";

/// Makes `new_root` the filesystem root of the calling mount namespace.
///
/// `new_root` is bind-mounted onto itself first because `pivot_root(2)`
/// requires it to be a mount point. The old root is detached and its
/// placeholder directory removed.
///
/// # Errors
///
/// Returns an error if any mount, the pivot, or the chdir fails.
pub fn pivot_root(new_root: &Path) -> Result<()> {
    bind_mount(new_root, new_root)?;

    let put_old = new_root.join(PUT_OLD);
    std::fs::create_dir_all(&put_old).map_err(|e| CorralError::io(&put_old, e))?;
    nix::unistd::pivot_root(new_root, &put_old).map_err(|e| CorralError::PermissionDenied {
        message: format!("pivot_root into {}: {e}", new_root.display()),
    })?;
    nix::unistd::chdir("/").map_err(|e| CorralError::PermissionDenied {
        message: format!("chdir to new root: {e}"),
    })?;

    let old = Path::new("/").join(PUT_OLD);
    umount2(&old, MntFlags::MNT_DETACH).map_err(|e| CorralError::PermissionDenied {
        message: format!("detach old root: {e}"),
    })?;
    std::fs::remove_dir(&old).map_err(|e| CorralError::io(&old, e))?;

    tracing::debug!(root = %new_root.display(), "pivoted into new root");
    Ok(())
}

/// Full mount setup of a container's init: private propagation, pivot into
/// `root`, then fresh `/proc` and `/dev`.
///
/// Must run before the command is resolved, so lookups see the new root.
///
/// # Errors
///
/// Returns the first failing step's error.
pub fn setup_root(root: &Path) -> Result<()> {
    make_rprivate()?;
    pivot_root(root)?;
    mount_proc(Path::new("/proc"))?;
    mount_dev_tmpfs(Path::new("/dev"))?;
    tracing::info!(root = %root.display(), "container root ready");
    Ok(())
}
