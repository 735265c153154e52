//! Saving a container's root filesystem as a new image.

use std::fs::File;
use std::path::Path;

use corral_common::error::{CorralError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;

/// Archives the contents of `mount_point` as a gzip tarball at `dest`.
///
/// Entries are stored relative to the root, so the result can be used as
/// an image by [`crate::layer::extract_layer`].
///
/// # Errors
///
/// Returns an error if `mount_point` is missing or the archive cannot be
/// written.
pub fn commit(mount_point: &Path, dest: &Path) -> Result<()> {
    if !mount_point.is_dir() {
        return Err(CorralError::NotFound {
            kind: "mount point",
            id: mount_point.display().to_string(),
        });
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CorralError::io(parent, e))?;
    }

    let file = File::create(dest).map_err(|e| CorralError::io(dest, e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", mount_point)
        .map_err(|e| CorralError::io(mount_point, e))?;
    let _ = builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .map_err(|e| CorralError::io(dest, e))?;

    tracing::info!(source = %mount_point.display(), image = %dest.display(), "image committed");
    Ok(())
}
