//! Container log files.
//!
//! A detached container's standard output goes straight into
//! `<run>/containers/<name>/container.log`; nothing here formats it.

use std::fs::File;
use std::io::Write;

use corral_common::config::RuntimeConfig;
use corral_common::error::{CorralError, Result};

/// Creates (or truncates) the log file of `name`, making its directory.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be created.
pub fn create_log_file(config: &RuntimeConfig, name: &str) -> Result<File> {
    let dir = config.container_dir(name);
    std::fs::create_dir_all(&dir).map_err(|e| CorralError::io(&dir, e))?;
    let path = config.log_file(name);
    File::create(&path).map_err(|e| CorralError::io(path, e))
}

/// Copies the log of `name` byte for byte into `out` and returns the
/// number of bytes copied.
///
/// A missing log file copies nothing, as for a container run in the
/// foreground.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, or `out`
/// cannot be written.
pub fn copy_logs(config: &RuntimeConfig, name: &str, out: &mut impl Write) -> Result<u64> {
    let path = config.log_file(name);
    let mut file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(CorralError::io(path, e)),
    };
    std::io::copy(&mut file, out).map_err(|e| CorralError::io(path, e))
}
