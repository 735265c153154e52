//! `corral ps`: List containers.

use clap::Args;
use corral_common::types::ContainerStatus;
use corral_runtime::engine::Engine;

use crate::output;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Only show running containers.
    #[arg(long)]
    pub running: bool,
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the registry cannot be read.
pub fn execute(args: &PsArgs, engine: &Engine) -> anyhow::Result<()> {
    let mut records = engine.list().map_err(|e| anyhow::anyhow!("{e}"))?;
    if args.running {
        records.retain(|r| r.status == ContainerStatus::Running);
    }
    print!("{}", output::container_table(&records));
    Ok(())
}
