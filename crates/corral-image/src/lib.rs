//! # corral-image
//!
//! Root filesystems for corral containers.
//!
//! Handles:
//! - **Layers**: extracting an image tarball (plain or gzip) once into a
//!   shared read-only layer.
//! - **Workspaces**: a per-container write layer stacked over the image
//!   with `OverlayFS`, plus an optional bind-mounted volume.
//! - **Commit**: archiving a container's merged root as a new image.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod commit;
pub mod layer;
pub mod workspace;
