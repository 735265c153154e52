//! `corral init`: The container's first process.

use clap::Args;

/// Arguments for the hidden `init` command.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Make the working directory the root filesystem first.
    #[arg(long)]
    pub pivot_root: bool,
}

/// Waits for the command on fd 3 and becomes it.
///
/// # Errors
///
/// Returns an error if the command is empty, cannot be found, or cannot
/// be executed. On success this never returns.
pub fn execute(args: &InitArgs) -> anyhow::Result<()> {
    tracing::debug!(pivot_root = args.pivot_root, "init waiting for command");
    match corral_runtime::init::run(args.pivot_root) {
        Ok(never) => match never {},
        Err(e) => Err(anyhow::anyhow!("init: {e}")),
    }
}
