//! Runtime engine that orchestrates container lifecycle.
//!
//! `run` drives one container from nothing to a released command:
//!
//! 1. launch the init process (workspace, namespaces, command pipe),
//! 2. record it as running,
//! 3. write its cgroup limits and attach its pid,
//! 4. connect it to a network when asked,
//! 5. release the command.
//!
//! Foreground containers are then waited for and torn down. Any failure
//! before step 5 kills the init process and undoes what was set up.

use std::net::Ipv4Addr;
use std::sync::Arc;

use corral_common::config::RuntimeConfig;
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, ContainerStatus, ResourceLimits};
use corral_core::cgroup::mountinfo::CgroupFs;
use corral_core::cgroup::{CgroupManager, SubsystemSet};
use corral_image::workspace::Workspace;
use corral_network::network::{Network, NetworkManager};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use crate::launcher::{ChildProcess, LaunchRequest, Launched, Launcher, NamespaceLauncher};
use crate::registry::{ContainerRecord, Registry};

/// Options of `run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Image to build the root filesystem from.
    pub image: String,
    /// Command and arguments.
    pub command: Vec<String>,
    /// Container name; the id is used when absent.
    pub name: Option<String>,
    /// Attach the caller's terminal and wait for the command.
    pub interactive: bool,
    /// Return as soon as the command is released.
    pub detach: bool,
    /// Resource limits.
    pub limits: ResourceLimits,
    /// Volume flag `host:container`, empty for none.
    pub volume: String,
    /// `KEY=VALUE` entries added to the environment.
    pub env: Vec<String>,
    /// Network to connect to.
    pub network: Option<String>,
    /// `hostPort:containerPort` entries.
    pub port_mapping: Vec<String>,
}

/// What `run` produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Container id.
    pub id: String,
    /// Registry name.
    pub name: String,
    /// Host pid of the init process.
    pub pid: i32,
    /// Address on the requested network.
    pub ip: Option<Ipv4Addr>,
    /// Exit code, for foreground runs.
    pub exit_code: Option<i32>,
}

/// The runtime engine that coordinates all container operations.
#[derive(Debug)]
pub struct Engine {
    config: RuntimeConfig,
    registry: Registry,
    launcher: Box<dyn Launcher>,
    subsystems: Arc<SubsystemSet>,
    networks: NetworkManager,
}

impl Engine {
    /// Creates an engine acting on the host: namespace launcher, the
    /// cgroup hierarchies in `config.mountinfo`, and the bridge driver.
    ///
    /// # Errors
    ///
    /// Returns an error if the network directory cannot be read.
    pub fn host(config: RuntimeConfig) -> Result<Self> {
        let cgroups = Arc::new(CgroupFs::new(config.mountinfo.clone()));
        let networks = NetworkManager::host(&config)?;
        Ok(Self::new(
            config.clone(),
            Box::new(NamespaceLauncher::new(config)),
            Arc::new(SubsystemSet::host(cgroups)),
            networks,
        ))
    }

    /// Creates an engine from explicit parts.
    #[must_use]
    pub fn new(
        config: RuntimeConfig,
        launcher: Box<dyn Launcher>,
        subsystems: Arc<SubsystemSet>,
        networks: NetworkManager,
    ) -> Self {
        Self {
            registry: Registry::new(config.clone()),
            config,
            launcher,
            subsystems,
            networks,
        }
    }

    /// Configuration the engine was built with.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Creates and starts a container.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for conflicting flags, an empty
    /// command, malformed environment entries, or a name already in use.
    /// Launch, registry, and network failures abort the run after undoing
    /// the partial setup. Cgroup failures are logged only.
    pub fn run(&self, options: &RunOptions) -> Result<RunOutcome> {
        self.run_observed(options, |_| {})
    }

    /// Like [`run`](Self::run), calling `on_started` with the init pid once
    /// the command is released and before a foreground run waits. Killing
    /// that pid from elsewhere ends the wait and the usual teardown follows.
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run).
    pub fn run_observed(
        &self,
        options: &RunOptions,
        on_started: impl FnOnce(i32),
    ) -> Result<RunOutcome> {
        validate(options)?;
        let env = parse_env(&options.env)?;
        let id = ContainerId::generate();
        let name = options
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| id.to_string());
        validate_name(&name)?;
        if self.registry.exists(&name) {
            return Err(CorralError::config(format!("container {name} already exists")));
        }

        let Launched { mut child, channel } = self.launcher.launch(&LaunchRequest {
            name: &name,
            image: &options.image,
            volume: &options.volume,
            interactive: options.interactive,
            env: &env,
        })?;
        let pid = child.pid();

        let mut record = ContainerRecord::running(id.as_str(), &name, pid, &options.command);
        record.volume.clone_from(&options.volume);
        record.portmapping.clone_from(&options.port_mapping);
        let cgroup = self.cgroup(id.as_str());

        let started = self
            .prepare(&mut record, &cgroup, options, pid)
            .and_then(|()| channel.send(&options.command));
        if let Err(e) = started {
            tracing::error!(name = %name, error = %e, "container setup failed, rolling back");
            abort(child.as_mut());
            self.teardown(&record, &cgroup);
            return Err(e);
        }
        tracing::info!(id = %id, name = %name, pid, "container started");
        on_started(pid);

        let exit_code = if options.interactive {
            Some(self.wait_foreground(child.as_mut(), &record, &cgroup)?)
        } else {
            None
        };
        Ok(RunOutcome {
            id: record.id,
            name: record.name,
            pid,
            ip: record.ip,
            exit_code,
        })
    }

    /// Everything between launch and command release. Ordering matters:
    /// the pid is in its cgroups before any network work, and both are done
    /// before the caller sends the command.
    fn prepare(
        &self,
        record: &mut ContainerRecord,
        cgroup: &CgroupManager,
        options: &RunOptions,
        pid: i32,
    ) -> Result<()> {
        self.registry.save(record)?;

        let set_failures = cgroup.set(&options.limits);
        let apply_failures = cgroup.apply(pid);
        if !set_failures.is_empty() || !apply_failures.is_empty() {
            tracing::warn!(
                name = %record.name,
                failed = set_failures.len() + apply_failures.len(),
                "container runs with incomplete resource limits"
            );
        }

        if let Some(network) = &options.network {
            let ip = self
                .networks
                .connect(network, &record.id, pid, &options.port_mapping)?;
            record.network = Some(network.clone());
            record.ip = Some(ip);
            self.registry.save(record)?;
        }
        Ok(())
    }

    fn wait_foreground(
        &self,
        child: &mut dyn ChildProcess,
        record: &ContainerRecord,
        cgroup: &CgroupManager,
    ) -> Result<i32> {
        let waited = child.wait();
        self.teardown(record, cgroup);
        let code = waited?;
        tracing::info!(name = %record.name, code, "container exited");
        Ok(code)
    }

    /// Releases everything a container holds. Every step is attempted and
    /// failures are only logged.
    fn teardown(&self, record: &ContainerRecord, cgroup: &CgroupManager) {
        self.release(record, cgroup);
        if let Err(e) = self.registry.remove(&record.name) {
            tracing::warn!(name = %record.name, error = %e, "container record not removed");
        }
    }

    fn release(&self, record: &ContainerRecord, cgroup: &CgroupManager) {
        if let (Some(network), Some(ip)) = (&record.network, record.ip) {
            if let Err(e) = self
                .networks
                .disconnect(network, &record.id, ip, &record.portmapping)
            {
                tracing::warn!(name = %record.name, network, error = %e, "endpoint not released");
            }
        }
        cgroup.destroy();
        Workspace::locate(&self.config, &record.name, &record.volume).delete();
    }

    fn cgroup(&self, id: &str) -> CgroupManager {
        CgroupManager::new(self.config.cgroup_path(id), Arc::clone(&self.subsystems))
    }

    /// Sends `SIGTERM` to a running container and marks it stopped.
    ///
    /// A process that is already gone is logged and still marked stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown or has no pid, or the
    /// signal is refused.
    pub fn stop(&self, name: &str) -> Result<ContainerRecord> {
        let mut record = self.registry.load(name)?;
        let Some(pid) = record.pid() else {
            return Err(CorralError::InvalidState {
                id: name.to_string(),
                message: "not running".into(),
            });
        };
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => tracing::info!(name, pid, "sent SIGTERM"),
            Err(Errno::ESRCH) => tracing::warn!(name, pid, "process already gone"),
            Err(e) => {
                return Err(CorralError::PermissionDenied {
                    message: format!("signal pid {pid}: {e}"),
                });
            }
        }
        record.status = ContainerStatus::Stopped;
        record.pid.clear();
        self.registry.save(&record)?;
        Ok(record)
    }

    /// Removes a container that is no longer running: network endpoint,
    /// cgroup, workspace, then its record.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidState`] for a running container, which
    /// is left untouched, or an error if the record cannot be deleted.
    pub fn remove(&self, name: &str) -> Result<()> {
        let record = self.registry.load(name)?;
        if record.status == ContainerStatus::Running {
            return Err(CorralError::InvalidState {
                id: name.to_string(),
                message: "is running, stop it first".into(),
            });
        }
        self.release(&record, &self.cgroup(&record.id));
        self.registry.remove(name)?;
        tracing::info!(name, "container removed");
        Ok(())
    }

    /// All container records.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be listed.
    pub fn list(&self) -> Result<Vec<ContainerRecord>> {
        self.registry.list()
    }

    /// Writes the captured output of a detached container to `out`, as
    /// the raw bytes the container produced.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown, its log unreadable,
    /// or `out` not writable.
    pub fn logs(&self, name: &str, out: &mut impl std::io::Write) -> Result<u64> {
        let _ = self.registry.load(name)?;
        crate::logs::copy_logs(&self.config, name, out)
    }

    /// Runs `command` inside a running container and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown or not running, the
    /// command is empty, or the binary cannot be re-invoked.
    pub fn exec(&self, name: &str, command: &[String]) -> Result<i32> {
        if command.is_empty() {
            return Err(CorralError::config("missing command to exec"));
        }
        let record = self.registry.load(name)?;
        let pid = record
            .pid()
            .filter(|_| record.status == ContainerStatus::Running)
            .ok_or_else(|| CorralError::InvalidState {
                id: name.to_string(),
                message: "not running".into(),
            })?;
        crate::exec::exec_in_container(pid, &command.join(" "))
    }

    /// Archives the root filesystem of container `name` as image `image`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container or its mount point is missing, or
    /// the archive cannot be written.
    pub fn commit(&self, name: &str, image: &str) -> Result<()> {
        let _ = self.registry.load(name)?;
        corral_image::commit::commit(&self.config.mount_point(name), &self.config.image_tar(image))
    }

    /// Creates a network.
    ///
    /// # Errors
    ///
    /// See [`NetworkManager::create_network`].
    pub fn create_network(&mut self, driver: &str, subnet: &str, name: &str) -> Result<Network> {
        self.networks.create_network(driver, subnet, name).cloned()
    }

    /// All networks, ordered by name.
    #[must_use]
    pub fn networks(&self) -> Vec<Network> {
        self.networks.list().cloned().collect()
    }

    /// Deletes a network.
    ///
    /// # Errors
    ///
    /// See [`NetworkManager::delete_network`].
    pub fn remove_network(&mut self, name: &str) -> Result<()> {
        self.networks.delete_network(name)
    }
}

fn abort(child: &mut dyn ChildProcess) {
    if let Err(e) = child.kill() {
        tracing::warn!(pid = child.pid(), error = %e, "init process not killed");
        return;
    }
    if let Err(e) = child.wait() {
        tracing::warn!(pid = child.pid(), error = %e, "init process not reaped");
    }
}

fn validate(options: &RunOptions) -> Result<()> {
    if options.interactive && options.detach {
        return Err(CorralError::config("-ti and -d cannot be used together"));
    }
    if options.command.is_empty() {
        return Err(CorralError::config("missing container command"));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    if name == "." || name == ".." || name.contains('/') {
        return Err(CorralError::config(format!("invalid container name: {name:?}")));
    }
    Ok(())
}

/// Splits `KEY=VALUE` entries.
///
/// # Errors
///
/// Returns a configuration error for an entry without `=` or with an
/// empty key.
pub fn parse_env(entries: &[String]) -> Result<Vec<(String, String)>> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(CorralError::config(format!(
                "invalid environment entry {entry:?}, expected KEY=VALUE"
            ))),
        })
        .collect()
}
