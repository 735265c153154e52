//! Per-container root filesystem.
//!
//! Layout for container `name` running image `image`:
//!
//! | path                     | role                            |
//! |--------------------------|---------------------------------|
//! | `<root>/layers/<image>`  | extracted image, read-only      |
//! | `<root>/writable/<name>` | overlay upper layer             |
//! | `<root>/work/<name>`     | overlay work directory          |
//! | `<root>/mnt/<name>`      | merged view, the container root |
//!
//! A volume `host:container` is bind-mounted at `<mnt>/<container>`.

use std::path::{Path, PathBuf};

use corral_common::config::RuntimeConfig;
use corral_common::error::{CorralError, Result};
use corral_common::types::VolumeSpec;
use corral_core::filesystem::mount::bind_mount;
use corral_core::filesystem::overlayfs::{OverlayConfig, mount_overlay, unmount_if_mounted};

use crate::layer::ensure_image_layer;

/// Directories backing one container's root filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Merged mount point, used as the container's root and working dir.
    pub mount_point: PathBuf,
    /// Container-private write layer.
    pub write_layer: PathBuf,
    /// Overlay work directory.
    pub work_dir: PathBuf,
    /// Parsed volume, if one was requested and well-formed.
    pub volume: Option<VolumeSpec>,
    mountinfo: PathBuf,
}

impl Workspace {
    /// Resolves the workspace paths of `name` without touching the disk.
    ///
    /// A malformed `volume` is logged and dropped.
    #[must_use]
    pub fn locate(config: &RuntimeConfig, name: &str, volume: &str) -> Self {
        let volume = if volume.is_empty() {
            None
        } else {
            let parsed = VolumeSpec::parse(volume);
            if parsed.is_none() {
                tracing::warn!(volume, "ignoring malformed volume, expected host:container");
            }
            parsed
        };
        Self {
            mount_point: config.mount_point(name),
            write_layer: config.write_layer(name),
            work_dir: config.work_dir(name),
            volume,
            mountinfo: config.mountinfo.clone(),
        }
    }

    /// Where the volume appears on the host, inside the merged root.
    #[must_use]
    pub fn volume_target(&self) -> Option<PathBuf> {
        self.volume.as_ref().map(|v| {
            self.mount_point
                .join(v.container.trim_start_matches('/'))
        })
    }

    /// Builds the workspace: extracts the image if needed, mounts the
    /// overlay, then bind-mounts the volume.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is missing or a mount fails. Volume
    /// mount failures are logged instead, leaving the container without
    /// its volume.
    pub fn create(config: &RuntimeConfig, image: &str, name: &str, volume: &str) -> Result<Self> {
        let workspace = Self::locate(config, name, volume);
        let lower = ensure_image_layer(config, image)?;
        mount_overlay(&OverlayConfig {
            lower_dirs: vec![lower],
            upper_dir: workspace.write_layer.clone(),
            work_dir: workspace.work_dir.clone(),
            merged_dir: workspace.mount_point.clone(),
        })?;
        if let Err(e) = workspace.mount_volume() {
            tracing::warn!(container = name, error = %e, "volume not mounted");
        }
        Ok(workspace)
    }

    fn mount_volume(&self) -> Result<()> {
        let (Some(volume), Some(target)) = (&self.volume, self.volume_target()) else {
            return Ok(());
        };
        let host = Path::new(&volume.host);
        std::fs::create_dir_all(host).map_err(|e| CorralError::io(host, e))?;
        std::fs::create_dir_all(&target).map_err(|e| CorralError::io(&target, e))?;
        bind_mount(host, &target)?;
        tracing::info!(host = %volume.host, target = %target.display(), "volume mounted");
        Ok(())
    }

    /// Tears the workspace down: volume, overlay, then directories.
    ///
    /// Every step is logged and never returned. If the volume or the root
    /// is still mounted afterwards the directories are kept, so nothing is
    /// deleted through a live mount.
    pub fn delete(&self) {
        let mut still_mounted = false;
        if let Some(target) = self.volume_target() {
            still_mounted |= !self.detach("unmount volume", &target);
        }
        still_mounted |= !self.detach("unmount root", &self.mount_point);
        if still_mounted {
            tracing::warn!(
                mount_point = %self.mount_point.display(),
                "workspace still mounted, keeping its directories"
            );
            return;
        }
        for dir in [&self.mount_point, &self.work_dir, &self.write_layer] {
            log_step("remove", dir, remove_tree(dir));
        }
        tracing::debug!(mount_point = %self.mount_point.display(), "workspace deleted");
    }

    /// Returns `false` when `path` may still be mounted.
    fn detach(&self, step: &str, path: &Path) -> bool {
        match unmount_if_mounted(path, &self.mountinfo) {
            Ok(_) => true,
            Err(e) => {
                log_step(step, path, Err(e));
                false
            }
        }
    }
}

fn remove_tree(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CorralError::io(dir, e)),
    }
}

fn log_step(step: &str, path: &Path, result: Result<()>) {
    if let Err(e) = result {
        tracing::warn!(step, path = %path.display(), error = %e, "workspace teardown step failed");
    }
}
