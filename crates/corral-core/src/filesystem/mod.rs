//! Filesystem setup for container roots.
//!
//! Provides the `OverlayFS` mount that stacks a container's write layer
//! over its image, bind mounts for volumes, and the `pivot_root` sequence
//! the init process runs before exec.

pub mod mount;
pub mod overlayfs;
pub mod pivot_root;
