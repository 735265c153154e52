//! Read-only image layers.
//!
//! An image is a tarball at `<root>/images/<name>.tar`. The first container
//! using it extracts it to `<root>/layers/<name>`; later containers reuse
//! the extracted tree.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use corral_common::config::RuntimeConfig;
use corral_common::error::{CorralError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Extracts a tar archive, gzip-compressed or not, into `target`.
///
/// Returns the archive size in bytes.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or unpacked.
pub fn extract_layer(archive_path: &Path, target: &Path) -> Result<u64> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "extracting layer"
    );

    let size_bytes = std::fs::metadata(archive_path)
        .map_err(|e| CorralError::io(archive_path, e))?
        .len();
    let gzip = is_gzip(archive_path)?;

    std::fs::create_dir_all(target).map_err(|e| CorralError::io(target, e))?;
    let file = File::open(archive_path).map_err(|e| CorralError::io(archive_path, e))?;
    let unpacked = if gzip {
        tar::Archive::new(flate2::read::GzDecoder::new(file)).unpack(target)
    } else {
        tar::Archive::new(file).unpack(target)
    };
    unpacked.map_err(|e| CorralError::io(target, e))?;

    tracing::debug!(size = size_bytes, gzip, "layer extracted");
    Ok(size_bytes)
}

/// Sniffs the gzip magic number instead of trusting the file name.
fn is_gzip(path: &Path) -> Result<bool> {
    let mut magic = [0u8; 2];
    let mut file = File::open(path).map_err(|e| CorralError::io(path, e))?;
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == GZIP_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(CorralError::io(path, e)),
    }
}

/// Returns the extracted layer of `image`, extracting it on first use.
///
/// # Errors
///
/// Returns [`CorralError::NotFound`] if neither the layer nor the image
/// tarball exists, or an extraction error.
pub fn ensure_image_layer(config: &RuntimeConfig, image: &str) -> Result<PathBuf> {
    let layer = config.image_layer(image);
    if layer.is_dir() {
        return Ok(layer);
    }
    let tarball = config.image_tar(image);
    if !tarball.is_file() {
        return Err(CorralError::NotFound {
            kind: "image",
            id: image.to_string(),
        });
    }
    if let Err(e) = extract_layer(&tarball, &layer) {
        // Leave no half-extracted layer behind for the next run to trust.
        let _ = std::fs::remove_dir_all(&layer);
        return Err(e);
    }
    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tar(path: &Path, name: &str, data: &[u8], gzip: bool) {
        let file = File::create(path).unwrap();
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        if gzip {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            builder.append_data(&mut header, name, data).unwrap();
            let _ = builder.into_inner().unwrap().finish().unwrap();
        } else {
            let mut builder = tar::Builder::new(file);
            builder.append_data(&mut header, name, data).unwrap();
            builder.finish().unwrap();
        }
    }

    #[test]
    fn plain_tar_is_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let tar = dir.path().join("busybox.tar");
        write_tar(&tar, "bin/hello", b"hello from layer", false);

        let size = extract_layer(&tar, &dir.path().join("out")).unwrap();
        assert!(size > 0);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out/bin/hello")).unwrap(),
            "hello from layer"
        );
    }

    #[test]
    fn gzip_is_detected_despite_tar_extension() {
        let dir = tempfile::tempdir().unwrap();
        let tar = dir.path().join("image.tar");
        write_tar(&tar, "etc/motd", b"gzipped", true);
        assert!(is_gzip(&tar).unwrap());

        extract_layer(&tar, &dir.path().join("out")).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out/etc/motd")).unwrap(),
            "gzipped"
        );
    }

    #[test]
    fn missing_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(extract_layer(&dir.path().join("nope.tar"), &dir.path().join("out")).is_err());
    }

    #[test]
    fn image_layer_extracted_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::with_dirs(dir.path().join("run"), dir.path().join("root"));
        std::fs::create_dir_all(config.root_dir.join("images")).unwrap();
        write_tar(&config.image_tar("busybox"), "marker", b"v1", false);

        let layer = ensure_image_layer(&config, "busybox").unwrap();
        assert_eq!(layer, config.image_layer("busybox"));

        // A replaced tarball is ignored once the layer exists.
        write_tar(&config.image_tar("busybox"), "marker", b"v2", false);
        let _ = ensure_image_layer(&config, "busybox").unwrap();
        assert_eq!(std::fs::read_to_string(layer.join("marker")).unwrap(), "v1");
    }

    #[test]
    fn unknown_image_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::with_dirs(dir.path().join("run"), dir.path().join("root"));
        let err = ensure_image_layer(&config, "ghost").unwrap_err();
        assert!(matches!(err, CorralError::NotFound { kind: "image", .. }));
    }
}
