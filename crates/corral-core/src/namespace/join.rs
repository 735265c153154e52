//! Joining the namespaces of a running process with `setns(2)`.

use std::fs::File;
use std::path::PathBuf;

use corral_common::error::{CorralError, Result};

use super::NamespaceKind;

/// Path of a process's namespace handle.
#[must_use]
pub fn ns_path(pid: i32, kind: NamespaceKind) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/ns/{}", kind.proc_name()))
}

/// The calling thread's own handle; `/proc/self` would name the main
/// thread's.
fn own_ns_path(kind: NamespaceKind) -> PathBuf {
    PathBuf::from(format!("/proc/thread-self/ns/{}", kind.proc_name()))
}

fn open_ns(pid: i32, kind: NamespaceKind) -> Result<File> {
    let path = ns_path(pid, kind);
    File::open(&path).map_err(|e| CorralError::io(path, e))
}

fn enter(handle: &File, kind: NamespaceKind) -> Result<()> {
    nix::sched::setns(handle, kind.clone_flag()).map_err(|e| CorralError::PermissionDenied {
        message: format!("setns {kind}: {e}"),
    })
}

/// Moves the calling thread into the `kind` namespace of `pid`.
///
/// # Errors
///
/// Returns an error if the handle cannot be opened or `setns(2)` fails.
pub fn join(pid: i32, kind: NamespaceKind) -> Result<()> {
    let handle = open_ns(pid, kind)?;
    enter(&handle, kind)?;
    tracing::debug!(pid, namespace = %kind, "joined namespace");
    Ok(())
}

/// Tries to join each of `kinds` independently.
///
/// A failure on one kind does not prevent the rest from being attempted;
/// every failure is returned.
pub fn join_all(pid: i32, kinds: &[NamespaceKind]) -> Vec<(NamespaceKind, CorralError)> {
    kinds
        .iter()
        .filter_map(|&kind| join(pid, kind).err().map(|e| (kind, e)))
        .collect()
}

/// Keeps the calling thread inside another process's namespace until dropped.
///
/// The original namespace is re-entered on drop, including on early
/// returns through `?`. A Rust thread is a kernel thread, so nothing else
/// can run on it while the guard is held.
#[derive(Debug)]
pub struct NamespaceGuard {
    kind: NamespaceKind,
    original: File,
}

impl NamespaceGuard {
    /// Switches into the `kind` namespace of `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if either namespace handle cannot be opened or the
    /// switch fails. The thread is left where it was in that case.
    pub fn enter(pid: i32, kind: NamespaceKind) -> Result<Self> {
        let own = own_ns_path(kind);
        let original = File::open(&own).map_err(|e| CorralError::io(own, e))?;
        let target = open_ns(pid, kind)?;
        enter(&target, kind)?;
        tracing::debug!(pid, namespace = %kind, "switched into namespace");
        Ok(Self { kind, original })
    }
}

impl Drop for NamespaceGuard {
    fn drop(&mut self) {
        if let Err(e) = enter(&self.original, self.kind) {
            tracing::error!(namespace = %self.kind, error = %e, "failed to restore namespace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ns_path_layout() {
        assert_eq!(ns_path(42, NamespaceKind::Net), PathBuf::from("/proc/42/ns/net"));
    }

    #[test]
    fn joining_a_missing_process_reports_every_kind() {
        let failures = join_all(i32::MAX, &super::super::CONTAINER_NAMESPACES);
        assert_eq!(failures.len(), 5);
        assert!(failures.iter().all(|(_, e)| matches!(e, CorralError::Io { .. })));
    }

    #[test]
    fn guard_for_missing_process_fails_cleanly() {
        assert!(NamespaceGuard::enter(i32::MAX, NamespaceKind::Net).is_err());
    }

    fn configure_inside(pid: i32) -> Result<()> {
        let _guard = NamespaceGuard::enter(pid, NamespaceKind::Net)?;
        let inside = std::fs::read_link(own_ns_path(NamespaceKind::Net))
            .map_err(|e| CorralError::io("/proc/thread-self/ns/net", e))?;
        Err(CorralError::config(format!("failed inside {}", inside.display())))
    }

    #[test]
    fn guard_restores_namespace_when_work_fails() {
        use std::process::Command;
        use std::time::{Duration, Instant};

        if !nix::unistd::geteuid().is_root() {
            return;
        }
        let Ok(mut child) = Command::new("unshare").args(["-n", "sleep", "30"]).spawn() else {
            return;
        };
        let pid = i32::try_from(child.id()).unwrap();
        let before = std::fs::read_link(own_ns_path(NamespaceKind::Net)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let target = loop {
            let current = std::fs::read_link(ns_path(pid, NamespaceKind::Net)).unwrap();
            if current != before || Instant::now() > deadline {
                break current;
            }
            std::thread::sleep(Duration::from_millis(10));
        };

        let err = configure_inside(pid).unwrap_err();
        let after = std::fs::read_link(own_ns_path(NamespaceKind::Net)).unwrap();
        let _ = child.kill();
        let _ = child.wait();

        assert_ne!(target, before, "unshare never left the host namespace");
        assert!(matches!(err, CorralError::Config { .. }));
        assert!(err.to_string().contains(&target.display().to_string()));
        assert_eq!(after, before);
    }
}
