//! `corral rm`: Remove a stopped container.

use clap::Args;
use corral_runtime::engine::Engine;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container name.
    pub container: String,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if the container is unknown or still running.
pub fn execute(args: &RmArgs, engine: &Engine) -> anyhow::Result<()> {
    engine
        .remove(&args.container)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("{}", args.container);
    Ok(())
}
