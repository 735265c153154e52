//! `corral commit`: Save a container's root filesystem as an image.

use clap::Args;
use corral_runtime::engine::Engine;

/// Arguments for the `commit` command.
#[derive(Args, Debug)]
pub struct CommitArgs {
    /// Container name.
    pub container: String,

    /// Name of the image to write.
    pub image: String,
}

/// Executes the `commit` command.
///
/// # Errors
///
/// Returns an error if the container or its root is missing, or the
/// archive cannot be written.
pub fn execute(args: &CommitArgs, engine: &Engine) -> anyhow::Result<()> {
    engine
        .commit(&args.container, &args.image)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("{}", engine.config().image_tar(&args.image).display());
    Ok(())
}
