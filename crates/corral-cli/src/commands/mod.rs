//! CLI command definitions and dispatch.

pub mod commit;
pub mod exec;
pub mod init;
pub mod logs;
pub mod network;
pub mod ps;
pub mod rm;
pub mod run;
pub mod stop;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use corral_common::config::RuntimeConfig;
use corral_runtime::engine::Engine;

/// corral: daemon-less Linux container runtime.
#[derive(Parser, Debug)]
#[command(name = "corral", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Directory of container records, logs, and network state
    /// [env: `CORRAL_RUN_DIR`].
    #[arg(long, global = true)]
    pub run_dir: Option<PathBuf>,

    /// Directory of images, layers, and container roots [env: `CORRAL_ROOT`].
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,
}

impl Cli {
    /// Environment configuration with the command-line directories on top.
    #[must_use]
    pub fn runtime_config(&self) -> RuntimeConfig {
        let env = RuntimeConfig::from_env();
        let mut config = RuntimeConfig::with_dirs(
            self.run_dir.clone().unwrap_or(env.run_dir),
            self.root.clone().unwrap_or(env.root_dir),
        );
        config.pivot_root = env.pivot_root;
        config
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and start a container.
    Run(run::RunArgs),
    /// Container init process; started by `run`, not by hand.
    #[command(hide = true)]
    Init(init::InitArgs),
    /// Run a command inside a running container.
    Exec(exec::ExecArgs),
    /// Stop a running container.
    Stop(stop::StopArgs),
    /// Remove a stopped container.
    Rm(rm::RmArgs),
    /// List containers.
    Ps(ps::PsArgs),
    /// Print a detached container's output.
    Logs(logs::LogsArgs),
    /// Save a container's root filesystem as an image.
    Commit(commit::CommitArgs),
    /// Manage bridge networks.
    Network(network::NetworkArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.runtime_config();
    match cli.command {
        Command::Run(args) => run::execute(args, engine(config)?),
        Command::Init(args) => init::execute(&args),
        Command::Exec(args) => exec::execute(&args, &engine(config)?),
        Command::Stop(args) => stop::execute(&args, &engine(config)?),
        Command::Rm(args) => rm::execute(&args, &engine(config)?),
        Command::Ps(args) => ps::execute(&args, &engine(config)?),
        Command::Logs(args) => logs::execute(&args, &engine(config)?),
        Command::Commit(args) => commit::execute(&args, &engine(config)?),
        Command::Network(args) => network::execute(args, engine(config)?),
    }
}

fn engine(config: RuntimeConfig) -> anyhow::Result<Engine> {
    Engine::host(config).map_err(|e| anyhow::anyhow!("{e}"))
}
