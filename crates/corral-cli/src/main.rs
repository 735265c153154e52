//! # corral
//!
//! Daemon-less container runtime: namespaces, cgroups, overlay roots, and
//! bridge networking from a single binary.

mod commands;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    // Before anything that could start a thread: `corral exec` re-enters
    // here with the target namespaces to join.
    corral_core::namespace::nsenter::run_hook();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::execute(cli)
}
