//! System-wide constants and default paths.

/// Default directory holding per-container records, logs, and network state.
pub const DEFAULT_RUN_DIR: &str = "/var/run/corral";

/// Default directory holding image tarballs, layers, and mount points.
pub const DEFAULT_ROOT_DIR: &str = "/var/lib/corral";

/// Default parent directory for container cgroups inside each hierarchy.
pub const DEFAULT_CGROUP_PARENT: &str = "corral";

/// Mount table scanned to locate cgroup hierarchies.
pub const PROC_MOUNTINFO: &str = "/proc/self/mountinfo";

/// Record file name inside a container directory.
pub const CONFIG_NAME: &str = "config.json";

/// Log file name inside a container directory.
pub const CONTAINER_LOG_FILE: &str = "container.log";

/// Environment variable carrying the target PID for the namespace-entry hook.
pub const ENV_EXEC_PID: &str = "CORRAL_EXEC_PID";

/// Environment variable carrying the command for the namespace-entry hook.
pub const ENV_EXEC_CMD: &str = "CORRAL_EXEC_CMD";

/// Overrides [`DEFAULT_RUN_DIR`].
pub const ENV_RUN_DIR: &str = "CORRAL_RUN_DIR";

/// Overrides [`DEFAULT_ROOT_DIR`].
pub const ENV_ROOT_DIR: &str = "CORRAL_ROOT";

/// Enables the pivot-root mount setup in the init process when set to `1`.
pub const ENV_PIVOT_ROOT: &str = "CORRAL_PIVOT_ROOT";

/// File descriptor number the init process reads its command from.
pub const INIT_COMMAND_FD: i32 = 3;

/// Name of the only network driver shipped.
pub const BRIDGE_DRIVER: &str = "bridge";

/// Application name used in CLI output.
pub const APP_NAME: &str = "corral";
