//! Mount helpers: bind mounts, propagation, and the pseudo-filesystems a
//! fresh root needs.

use std::path::Path;

use corral_common::error::{CorralError, Result};
use nix::mount::{MsFlags, mount};

fn denied(what: &str, path: &Path, e: nix::Error) -> CorralError {
    CorralError::PermissionDenied {
        message: format!("{what} {}: {e}", path.display()),
    }
}

/// Bind-mounts `source` onto `target`, recursively.
///
/// # Errors
///
/// Returns an error if `mount(2)` fails.
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| denied("bind mount onto", target, e))?;
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        "bind mount created"
    );
    Ok(())
}

/// Marks every mount under `/` private so nothing done inside the mount
/// namespace propagates back to the host.
///
/// # Errors
///
/// Returns an error if `mount(2)` fails.
pub fn make_rprivate() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| denied("make private", Path::new("/"), e))
}

/// Mounts a fresh `proc` at `target` with `noexec,nosuid,nodev`.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the mount fails.
pub fn mount_proc(target: &Path) -> Result<()> {
    std::fs::create_dir_all(target).map_err(|e| CorralError::io(target, e))?;
    mount(
        Some("proc"),
        target,
        Some("proc"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        None::<&str>,
    )
    .map_err(|e| denied("mount proc at", target, e))
}

/// Mounts a `tmpfs` at `target` with mode 755, for use as `/dev`.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the mount fails.
pub fn mount_dev_tmpfs(target: &Path) -> Result<()> {
    std::fs::create_dir_all(target).map_err(|e| CorralError::io(target, e))?;
    mount(
        Some("tmpfs"),
        target,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=755"),
    )
    .map_err(|e| denied("mount tmpfs at", target, e))
}
