//! `corral logs`: Print a detached container's output.

use std::io::Write;

use clap::Args;
use corral_runtime::engine::Engine;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container name.
    pub container: String,
}

/// Executes the `logs` command.
///
/// # Errors
///
/// Returns an error if the container is unknown or its log unreadable.
pub fn execute(args: &LogsArgs, engine: &Engine) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    let _ = engine
        .logs(&args.container, &mut stdout)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    stdout.flush()?;
    Ok(())
}
