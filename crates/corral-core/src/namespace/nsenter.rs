//! Entering a running container before `main` does anything else.
//!
//! `corral exec` re-invokes the binary with [`ENV_EXEC_PID`] and
//! [`ENV_EXEC_CMD`] set. [`run_hook`] sees them, joins the five namespaces
//! of the target pid, runs the command through `/bin/sh -c`, and exits
//! with its status. It must run while the process is still single
//! threaded: the kernel refuses to move a multi-threaded process into
//! another mount namespace.

use std::io::Write;
use std::process::Command;

use corral_common::constants::{ENV_EXEC_CMD, ENV_EXEC_PID};
use corral_common::error::{CorralError, Result};

use super::{CONTAINER_NAMESPACES, join};

/// Shell used to run the requested command.
pub const SHELL: &str = "/bin/sh";

/// A request to run `command` inside the namespaces of `pid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRequest {
    /// Target process, normally a container's init.
    pub pid: i32,
    /// Shell command line to execute.
    pub command: String,
}

impl EntryRequest {
    /// Reads the request from the process environment.
    #[must_use]
    pub fn from_env() -> Option<Result<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a request when both variables are present and non-empty.
    ///
    /// Returns `None` when the hook should stay out of the way, and
    /// `Some(Err(_))` when it was asked to run but the pid is unusable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Result<Self>> {
        let pid = lookup(ENV_EXEC_PID).filter(|v| !v.is_empty())?;
        let command = lookup(ENV_EXEC_CMD).filter(|v| !v.is_empty())?;
        Some(
            pid.trim()
                .parse()
                .map(|pid| Self { pid, command })
                .map_err(|_| CorralError::config(format!("{ENV_EXEC_PID} is not a pid: {pid}"))),
        )
    }

    /// Joins the target namespaces and runs the command, returning its
    /// exit code (128 + signal number when it was killed).
    ///
    /// Namespaces that cannot be joined are reported and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the shell cannot be spawned.
    pub fn execute(&self) -> Result<i32> {
        for (kind, error) in join::join_all(self.pid, &CONTAINER_NAMESPACES) {
            let _ = writeln!(std::io::stderr(), "corral: join {kind} namespace: {error}");
        }
        let status = Command::new(SHELL)
            .arg("-c")
            .arg(&self.command)
            .status()
            .map_err(|e| CorralError::io(SHELL, e))?;
        Ok(exit_code(status))
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1)
}

/// Runs a pending namespace-entry request and exits; returns normally only
/// when no request is present.
///
/// Call this as the first statement of `main`, before logging or any
/// thread is started. Output goes straight to stderr since no subscriber
/// exists yet.
pub fn run_hook() {
    let Some(request) = EntryRequest::from_env() else {
        return;
    };
    let code = match request.and_then(|r| r.execute()) {
        Ok(code) => code,
        Err(e) => {
            let _ = writeln!(std::io::stderr(), "corral: exec failed: {e}");
            1
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn absent_variables_disable_the_hook() {
        assert!(EntryRequest::from_lookup(lookup(&[])).is_none());
        assert!(EntryRequest::from_lookup(lookup(&[(ENV_EXEC_PID, "12")])).is_none());
        assert!(EntryRequest::from_lookup(lookup(&[(ENV_EXEC_CMD, "ls")])).is_none());
        assert!(
            EntryRequest::from_lookup(lookup(&[(ENV_EXEC_PID, ""), (ENV_EXEC_CMD, "ls")]))
                .is_none()
        );
    }

    #[test]
    fn both_variables_build_a_request() {
        let request = EntryRequest::from_lookup(lookup(&[
            (ENV_EXEC_PID, "4321"),
            (ENV_EXEC_CMD, "ls -l /"),
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(
            request,
            EntryRequest {
                pid: 4321,
                command: "ls -l /".into()
            }
        );
    }

    #[test]
    fn bad_pid_is_an_error_not_a_noop() {
        let request =
            EntryRequest::from_lookup(lookup(&[(ENV_EXEC_PID, "abc"), (ENV_EXEC_CMD, "ls")]));
        assert!(matches!(request, Some(Err(CorralError::Config { .. }))));
    }

    #[test]
    fn command_exit_code_is_returned() {
        // Joining our own namespaces is either a no-op or refused; the
        // command still runs either way.
        let request = EntryRequest {
            pid: i32::try_from(std::process::id()).unwrap(),
            command: "exit 7".into(),
        };
        assert_eq!(request.execute().unwrap(), 7);
    }
}
