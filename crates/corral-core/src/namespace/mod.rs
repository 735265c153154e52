//! Linux namespaces a container is isolated by.
//!
//! Containers get fresh IPC, UTS, network, PID, and mount namespaces at
//! clone time. Existing containers are entered again through
//! [`join`] (for network setup) and [`nsenter`] (for `exec`).

pub mod join;
pub mod nsenter;

use std::fmt;

use nix::sched::CloneFlags;

/// One namespace kind, addressed as `/proc/<pid>/ns/<name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    /// System V IPC objects and POSIX message queues.
    Ipc,
    /// Hostname and NIS domain name.
    Uts,
    /// Network devices, addresses, routes, and firewall rules.
    Net,
    /// Process ID numbering.
    Pid,
    /// Mount table.
    Mnt,
}

/// Every namespace a container owns, in the order `exec` joins them.
///
/// Mount goes last: once it is joined, `/proc/<pid>/ns` paths resolve
/// inside the container.
pub const CONTAINER_NAMESPACES: [NamespaceKind; 5] = [
    NamespaceKind::Ipc,
    NamespaceKind::Uts,
    NamespaceKind::Net,
    NamespaceKind::Pid,
    NamespaceKind::Mnt,
];

impl NamespaceKind {
    /// Entry name under `/proc/<pid>/ns`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Ipc => "ipc",
            Self::Uts => "uts",
            Self::Net => "net",
            Self::Pid => "pid",
            Self::Mnt => "mnt",
        }
    }

    /// Flag used with `clone(2)` and `setns(2)`.
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::Net => CloneFlags::CLONE_NEWNET,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Mnt => CloneFlags::CLONE_NEWNS,
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proc_name())
    }
}

/// Flags that create all of [`CONTAINER_NAMESPACES`] in one `clone(2)`.
#[must_use]
pub fn container_clone_flags() -> CloneFlags {
    CONTAINER_NAMESPACES
        .iter()
        .fold(CloneFlags::empty(), |flags, kind| flags | kind.clone_flag())
}
