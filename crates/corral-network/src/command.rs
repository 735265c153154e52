//! Running the host's network tools.

use std::process::Command;

use corral_common::error::{CorralError, Result};

/// Runs `program` with `args` and returns its stdout.
///
/// # Errors
///
/// Returns [`CorralError::Command`] with the tool's stderr when it exits
/// unsuccessfully, or an I/O error if it cannot be started.
pub fn run<S: AsRef<str>>(program: &str, args: &[S]) -> Result<String> {
    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
    tracing::debug!(program, args = ?args, "running");
    let output = Command::new(program)
        .args(&args)
        .output()
        .map_err(|e| CorralError::io(program, e))?;
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(CorralError::Command {
        program: program.to_string(),
        message: format!("{} ({})", stderr.trim(), args.join(" ")),
    })
}
