//! `corral stop`: Stop a running container.

use clap::Args;
use corral_runtime::engine::Engine;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container name.
    pub container: String,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if the container is unknown, not running, or cannot
/// be signalled.
pub fn execute(args: &StopArgs, engine: &Engine) -> anyhow::Result<()> {
    let _ = engine
        .stop(&args.container)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("{}", args.container);
    Ok(())
}
