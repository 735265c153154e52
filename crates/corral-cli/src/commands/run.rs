//! `corral run`: Create and start a container.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use clap::Args;
use corral_common::types::ResourceLimits;
use corral_runtime::engine::{Engine, RunOptions};
use corral_runtime::launcher::force_kill;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Attach the current terminal and wait for the command to exit.
    #[arg(short = 't', long = "ti")]
    pub tty: bool,

    /// Keep stdin attached; implied by `-t`, accepted for `-ti`.
    #[arg(short = 'i', hide = true)]
    pub stdin: bool,

    /// Return at once and send the command's output to the log file.
    #[arg(short = 'd', long)]
    pub detach: bool,

    /// Memory limit, e.g. `100m`.
    #[arg(short = 'm', long)]
    pub memory: Option<String>,

    /// Relative CPU weight.
    #[arg(long = "cpu-share", alias = "cpushare")]
    pub cpu_share: Option<String>,

    /// CPUs the container may use, e.g. `0-1`.
    #[arg(long = "cpu-set", alias = "cpuset")]
    pub cpu_set: Option<String>,

    /// Bind-mount a host directory, `host:container`.
    #[arg(short = 'v', long, default_value = "")]
    pub volume: String,

    /// Container name; defaults to the generated id.
    #[arg(long)]
    pub name: Option<String>,

    /// Set an environment variable, `KEY=VALUE`. Repeatable.
    #[arg(short = 'e', long = "env")]
    pub env: Vec<String>,

    /// Network to connect the container to.
    #[arg(long = "net")]
    pub network: Option<String>,

    /// Forward a host port, `host:container`. Repeatable.
    #[arg(short = 'p', long = "publish")]
    pub ports: Vec<String>,

    /// Image to run.
    pub image: String,

    /// Command and its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    fn into_options(self) -> RunOptions {
        RunOptions {
            image: self.image,
            command: self.command,
            name: self.name,
            interactive: self.tty || self.stdin,
            detach: self.detach,
            limits: ResourceLimits {
                memory_limit: self.memory,
                cpu_share: self.cpu_share,
                cpu_set: self.cpu_set,
            },
            volume: self.volume,
            env: self.env,
            network: self.network,
            port_mapping: self.ports,
        }
    }
}

/// Ctrl-C during a foreground run.
///
/// The container's init does not get the terminal's `SIGINT`, so the
/// handler kills it instead; the engine's wait then returns and tears the
/// container down. An interrupt that arrives before the pid is known is
/// delivered as soon as it is.
#[derive(Debug, Default)]
struct Interrupt {
    pid: AtomicI32,
    requested: AtomicBool,
}

impl Interrupt {
    fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.forward();
    }

    fn started(&self, pid: i32) {
        self.pid.store(pid, Ordering::SeqCst);
        if self.requested.load(Ordering::SeqCst) {
            self.forward();
        }
    }

    fn forward(&self) {
        let pid = self.pid.load(Ordering::SeqCst);
        if pid <= 0 {
            return;
        }
        tracing::info!(pid, "interrupted, killing container");
        if let Err(e) = force_kill(pid) {
            tracing::warn!(pid, error = %e, "container not killed");
        }
    }
}

/// Executes the `run` command.
///
/// A detached container's id is printed; a foreground run exits with the
/// container's exit code.
///
/// # Errors
///
/// Returns an error if the container cannot be created or started.
pub fn execute(args: RunArgs, engine: Engine) -> anyhow::Result<()> {
    let options = args.into_options();
    let interrupt = Arc::new(Interrupt::default());
    if options.interactive {
        let handler = Arc::clone(&interrupt);
        ctrlc::set_handler(move || handler.trigger())
            .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;
    }

    let outcome = engine
        .run_observed(&options, |pid| interrupt.started(pid))
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    match outcome.exit_code {
        None => {
            println!("{}", outcome.id);
            Ok(())
        }
        Some(0) => Ok(()),
        Some(code) => std::process::exit(code),
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::process::ExitStatusExt;
    use std::process::{Child, Command};

    use super::*;

    fn sleeper() -> (Child, i32) {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = i32::try_from(child.id()).unwrap();
        (child, pid)
    }

    #[test]
    fn interrupt_kills_the_started_container() {
        let (mut child, pid) = sleeper();
        let interrupt = Interrupt::default();
        interrupt.started(pid);
        interrupt.trigger();
        assert_eq!(child.wait().unwrap().signal(), Some(9));
    }

    #[test]
    fn early_interrupt_is_delivered_on_start() {
        let (mut child, pid) = sleeper();
        let interrupt = Interrupt::default();
        interrupt.trigger();
        interrupt.started(pid);
        assert_eq!(child.wait().unwrap().signal(), Some(9));
    }

    #[test]
    fn no_interrupt_leaves_the_container_alone() {
        let (mut child, pid) = sleeper();
        Interrupt::default().started(pid);
        assert!(child.try_wait().unwrap().is_none());
        child.kill().unwrap();
        let _ = child.wait();
    }
}
