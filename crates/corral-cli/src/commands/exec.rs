//! `corral exec`: Run a command inside a running container.

use clap::Args;
use corral_runtime::engine::Engine;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Container name.
    pub container: String,

    /// Command to run; passed to `/bin/sh -c`.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command, exiting with the command's exit code.
///
/// # Errors
///
/// Returns an error if the container is not running or the command
/// cannot be started.
pub fn execute(args: &ExecArgs, engine: &Engine) -> anyhow::Result<()> {
    let code = engine
        .exec(&args.container, &args.command)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
