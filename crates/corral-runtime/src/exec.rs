//! Running a command inside a running container.
//!
//! The current binary is re-invoked with the target pid and command in
//! [`ENV_EXEC_PID`] and [`ENV_EXEC_CMD`]; its namespace-entry hook does the
//! joining before `main` proper starts. The child also receives the
//! container's own environment, read from `/proc/<pid>/environ`.

use std::path::PathBuf;
use std::process::Command;

use corral_common::constants::{ENV_EXEC_CMD, ENV_EXEC_PID};
use corral_common::error::{CorralError, Result};

/// Location of a process's initial environment.
#[must_use]
pub fn environ_path(pid: i32) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/environ"))
}

/// Splits a NUL-separated environment block into pairs. Entries without
/// `=` are dropped.
#[must_use]
pub fn parse_environ(block: &[u8]) -> Vec<(String, String)> {
    block
        .split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            let (key, value) = entry.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Environment of process `pid`.
///
/// # Errors
///
/// Returns an error if the environ file cannot be read.
pub fn container_environ(pid: i32) -> Result<Vec<(String, String)>> {
    let path = environ_path(pid);
    let block = std::fs::read(&path).map_err(|e| CorralError::io(path, e))?;
    Ok(parse_environ(&block))
}

/// Runs `command` through the shell inside the namespaces of `pid`, with
/// the caller's terminal, and returns its exit code.
///
/// # Errors
///
/// Returns an error if the binary cannot be re-invoked.
pub fn exec_in_container(pid: i32, command: &str) -> Result<i32> {
    let env = container_environ(pid).unwrap_or_else(|e| {
        tracing::warn!(pid, error = %e, "container environment unavailable");
        Vec::new()
    });
    let exe = std::env::current_exe().map_err(|e| CorralError::io("/proc/self/exe", e))?;
    tracing::info!(pid, command, "exec into container");

    let status = Command::new(&exe)
        .envs(env)
        .env(ENV_EXEC_PID, pid.to_string())
        .env(ENV_EXEC_CMD, command)
        .status()
        .map_err(|e| CorralError::io(&exe, e))?;
    Ok(status.code().unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environ_block_is_split_into_pairs() {
        let block = b"PATH=/bin:/usr/bin\0HOSTNAME=box\0BROKEN\0EQ=a=b\0";
        assert_eq!(
            parse_environ(block),
            vec![
                ("PATH".to_string(), "/bin:/usr/bin".to_string()),
                ("HOSTNAME".to_string(), "box".to_string()),
                ("EQ".to_string(), "a=b".to_string()),
            ]
        );
    }

    #[test]
    fn own_environment_is_readable() {
        let pid = i32::try_from(std::process::id()).unwrap();
        let env = container_environ(pid).unwrap();
        assert!(!env.is_empty());
    }

    #[test]
    fn missing_process_is_an_io_error() {
        assert!(matches!(container_environ(i32::MAX), Err(CorralError::Io { .. })));
    }
}
