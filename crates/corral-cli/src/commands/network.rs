//! `corral network`: Manage bridge networks.

use clap::{Args, Subcommand};
use corral_common::constants::BRIDGE_DRIVER;
use corral_runtime::engine::Engine;

use crate::output;

/// Arguments for the `network` command.
#[derive(Args, Debug)]
pub struct NetworkArgs {
    /// Network action.
    #[command(subcommand)]
    pub command: NetworkCommand,
}

/// Network actions.
#[derive(Subcommand, Debug)]
pub enum NetworkCommand {
    /// Create a network; its first address becomes the gateway.
    Create {
        /// Network driver.
        #[arg(long, default_value = BRIDGE_DRIVER)]
        driver: String,
        /// Subnet in CIDR notation, e.g. `192.168.10.0/24`.
        #[arg(long)]
        subnet: String,
        /// Network name, also the bridge device name.
        name: String,
    },
    /// List networks.
    #[command(alias = "ls")]
    List,
    /// Remove a network.
    #[command(alias = "rm")]
    Remove {
        /// Network name.
        name: String,
    },
}

/// Executes the `network` command.
///
/// # Errors
///
/// Returns an error if the network action fails.
pub fn execute(args: NetworkArgs, mut engine: Engine) -> anyhow::Result<()> {
    match args.command {
        NetworkCommand::Create {
            driver,
            subnet,
            name,
        } => {
            let network = engine
                .create_network(&driver, &subnet, &name)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{} {}", network.name, network.ip_range);
        }
        NetworkCommand::List => print!("{}", output::network_table(&engine.networks())),
        NetworkCommand::Remove { name } => {
            engine
                .remove_network(&name)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{name}");
        }
    }
    Ok(())
}
