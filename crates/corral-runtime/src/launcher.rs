//! Creating a container's init process.
//!
//! The launcher clones the current binary into fresh UTS, PID, mount,
//! network, and IPC namespaces with `init` as its subcommand. The child
//! starts in the container's mount point with the read end of a pipe on
//! fd 3 and blocks there until the parent has attached it to its cgroups
//! and network, then sends the command down the pipe.

use std::collections::BTreeMap;
use std::ffi::{CString, OsString};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use corral_common::config::RuntimeConfig;
use corral_common::constants::INIT_COMMAND_FD;
use corral_common::error::{CorralError, Result};
use corral_core::namespace::container_clone_flags;
use corral_image::workspace::Workspace;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{Pid, pipe2};

use crate::logs::create_log_file;

/// Subcommand that turns the re-executed binary into the init process.
pub const INIT_ARG: &str = "init";

/// Flag asking the init process to pivot into its working directory.
pub const PIVOT_ROOT_FLAG: &str = "--pivot-root";

const STACK_SIZE: usize = 1024 * 1024;

/// What to launch.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    /// Container name, keying the workspace and log file.
    pub name: &'a str,
    /// Image the root filesystem is built from.
    pub image: &'a str,
    /// Volume flag, empty for none.
    pub volume: &'a str,
    /// Share the caller's terminal instead of logging to a file.
    pub interactive: bool,
    /// Variables set on top of the caller's environment.
    pub env: &'a [(String, String)],
}

/// A launched init process, as seen from the parent.
pub trait ChildProcess: Send + fmt::Debug {
    /// Host pid of the process.
    fn pid(&self) -> i32;

    /// Blocks until the process exits and returns its exit code, or
    /// 128 + signal number when it was killed.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be waited for.
    fn wait(&mut self) -> Result<i32>;

    /// Kills the process. A process that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered.
    fn kill(&mut self) -> Result<()>;
}

/// Parent side of the pipe the init process reads its command from.
///
/// Sending consumes the channel: the write end is closed afterwards, which
/// is what lets the child's read finish.
pub struct CommandChannel {
    writer: Box<dyn Write + Send>,
}

impl CommandChannel {
    /// Wraps any writer; the launcher passes the pipe's write end.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Box::new(writer),
        }
    }

    /// Writes `argv` and closes the channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails, typically because the child
    /// already died.
    pub fn send(mut self, argv: &[String]) -> Result<()> {
        let payload = encode_command(argv);
        self.writer
            .write_all(&payload)
            .and_then(|()| self.writer.flush())
            .map_err(|e| CorralError::io("command channel", e))?;
        tracing::debug!(argc = argv.len(), "command released to init");
        Ok(())
    }
}

impl fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandChannel").finish_non_exhaustive()
    }
}

/// Arguments joined with NUL, so arguments containing spaces survive.
#[must_use]
pub fn encode_command(argv: &[String]) -> Vec<u8> {
    argv.join("\0").into_bytes()
}

/// Inverse of [`encode_command`]; an empty payload is an empty command.
#[must_use]
pub fn decode_command(payload: &[u8]) -> Vec<String> {
    if payload.is_empty() {
        return Vec::new();
    }
    String::from_utf8_lossy(payload)
        .split('\0')
        .map(str::to_string)
        .collect()
}

/// A started init process and the channel feeding it.
#[derive(Debug)]
pub struct Launched {
    /// The process.
    pub child: Box<dyn ChildProcess>,
    /// Where its command goes.
    pub channel: CommandChannel,
}

/// Builds container init processes.
pub trait Launcher: Send + Sync + fmt::Debug {
    /// Prepares the container's root filesystem and starts its init
    /// process, blocked on the command channel.
    ///
    /// # Errors
    ///
    /// Returns an error if any setup step fails; nothing is left running
    /// in that case.
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<Launched>;
}

/// Launcher cloning the current executable into new namespaces.
#[derive(Debug, Clone)]
pub struct NamespaceLauncher {
    config: RuntimeConfig,
}

impl NamespaceLauncher {
    /// Creates a launcher laying workspaces out per `config`.
    #[must_use]
    pub const fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    fn spawn(&self, request: &LaunchRequest<'_>, workspace: &Workspace) -> Result<Launched> {
        let (log, null) = if request.interactive {
            (None, None)
        } else {
            (
                Some(create_log_file(&self.config, request.name)?),
                Some(open_null()?),
            )
        };
        let (read_end, write_end) =
            pipe2(OFlag::O_CLOEXEC).map_err(|e| CorralError::io("pipe", e.into()))?;

        let image = ChildImage::new(&self.config, &workspace.mount_point, request.env)?;
        let fds = ChildFds {
            channel: read_end.as_raw_fd(),
            stdout: log.as_ref().map(AsRawFd::as_raw_fd),
            null: null.as_ref().map(AsRawFd::as_raw_fd),
        };

        let mut stack = vec![0u8; STACK_SIZE];
        // SAFETY: without CLONE_VM the child works on a private copy of the
        // address space, and `child_main` only issues raw syscalls on data
        // prepared above before it execs or returns.
        let pid = unsafe {
            nix::sched::clone(
                Box::new(|| child_main(&image, &fds)),
                &mut stack,
                container_clone_flags(),
                Some(libc::SIGCHLD),
            )
        }
        .map_err(clone_error)?;

        drop(read_end);
        drop(log);
        drop(null);
        tracing::info!(
            pid = pid.as_raw(),
            name = request.name,
            interactive = request.interactive,
            "init process started"
        );
        Ok(Launched {
            child: Box::new(InitChild { pid, status: None }),
            channel: CommandChannel::new(File::from(write_end)),
        })
    }
}

impl Launcher for NamespaceLauncher {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<Launched> {
        let workspace =
            Workspace::create(&self.config, request.image, request.name, request.volume)?;
        self.spawn(request, &workspace).inspect_err(|_| workspace.delete())
    }
}

fn clone_error(errno: Errno) -> CorralError {
    if errno == Errno::EPERM {
        CorralError::PermissionDenied {
            message: "clone into new namespaces (root required)".into(),
        }
    } else {
        CorralError::io("clone", errno.into())
    }
}

/// Everything `execve` needs, built before cloning so the child does not
/// allocate.
struct ChildImage {
    program: CString,
    cwd: CString,
    _strings: Vec<CString>,
    argv: Vec<*const libc::c_char>,
    envp: Vec<*const libc::c_char>,
}

impl ChildImage {
    fn new(config: &RuntimeConfig, cwd: &Path, env: &[(String, String)]) -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| CorralError::io("/proc/self/exe", e))?;
        let program = c_string(exe.as_os_str().as_bytes())?;
        let mut args = vec![program.clone(), c_string(INIT_ARG.as_bytes())?];
        if config.pivot_root {
            args.push(c_string(PIVOT_ROOT_FLAG.as_bytes())?);
        }
        let vars = child_environment(std::env::vars_os(), env)?;

        let argv = null_terminated(&args);
        let envp = null_terminated(&vars);
        let mut strings = args;
        strings.extend(vars);
        Ok(Self {
            program,
            cwd: c_string(cwd.as_os_str().as_bytes())?,
            _strings: strings,
            argv,
            envp,
        })
    }
}

fn open_null() -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|e| CorralError::io("/dev/null", e))
}

/// Descriptors the child rearranges before exec.
///
/// A detached child has `stdout` on its log and `null` on `/dev/null`;
/// an interactive one keeps the caller's terminal.
#[derive(Debug, Clone, Copy)]
struct ChildFds {
    channel: RawFd,
    stdout: Option<RawFd>,
    null: Option<RawFd>,
}

impl ChildFds {
    const fn detached(&self) -> bool {
        self.null.is_some()
    }

    /// Moves the log onto stdout, `/dev/null` onto stdin and stderr, and
    /// the command pipe onto fd 3. A detached child also leaves the
    /// caller's session.
    ///
    /// # Safety
    ///
    /// Only for a freshly forked or cloned child that is about to exec;
    /// it issues nothing but async-signal-safe libc calls.
    unsafe fn wire(&self) -> bool {
        // SAFETY: see the function contract.
        unsafe {
            if let Some(out) = self.stdout {
                if libc::dup2(out, libc::STDOUT_FILENO) < 0 {
                    return false;
                }
            }
            if let Some(null) = self.null {
                if libc::dup2(null, libc::STDIN_FILENO) < 0
                    || libc::dup2(null, libc::STDERR_FILENO) < 0
                {
                    return false;
                }
            }
            if self.channel == INIT_COMMAND_FD {
                let flags = libc::fcntl(self.channel, libc::F_GETFD);
                let _ = libc::fcntl(self.channel, libc::F_SETFD, flags & !libc::FD_CLOEXEC);
            } else if libc::dup2(self.channel, INIT_COMMAND_FD) < 0 {
                return false;
            }
            if self.detached() {
                let _ = libc::setsid();
            }
        }
        true
    }
}

/// Runs in the cloned child. Returns only on failure, as its exit code.
fn child_main(image: &ChildImage, fds: &ChildFds) -> isize {
    // SAFETY: async-signal-safe libc calls on descriptors and strings that
    // stay alive in this copy of the parent's memory until execve.
    unsafe {
        if !fds.wire() {
            return 126;
        }
        if libc::chdir(image.cwd.as_ptr()) < 0 {
            return 126;
        }
        let _ = libc::execve(image.program.as_ptr(), image.argv.as_ptr(), image.envp.as_ptr());
    }
    127
}

/// The caller's environment with `overrides` applied, as `KEY=VALUE`.
///
/// # Errors
///
/// Returns a configuration error if a variable contains a NUL byte.
pub fn child_environment(
    base: impl Iterator<Item = (OsString, OsString)>,
    overrides: &[(String, String)],
) -> Result<Vec<CString>> {
    let mut vars: BTreeMap<OsString, OsString> = base.collect();
    for (key, value) in overrides {
        let _ = vars.insert(key.into(), value.into());
    }
    vars.iter()
        .map(|(key, value)| {
            let mut entry = key.as_bytes().to_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            c_string(&entry)
        })
        .collect()
}

fn c_string(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|_| {
        CorralError::config(format!(
            "NUL byte in {:?}",
            String::from_utf8_lossy(bytes)
        ))
    })
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

/// The init process as cloned by [`NamespaceLauncher`].
#[derive(Debug)]
struct InitChild {
    pid: Pid,
    status: Option<i32>,
}

impl ChildProcess for InitChild {
    fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    fn wait(&mut self) -> Result<i32> {
        if let Some(code) = self.status {
            return Ok(code);
        }
        let code = loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => break code,
                Ok(WaitStatus::Signaled(_, signal, _)) => break 128 + signal as i32,
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => return Err(CorralError::io(format!("wait {}", self.pid), e.into())),
            }
        };
        self.status = Some(code);
        Ok(code)
    }

    fn kill(&mut self) -> Result<()> {
        force_kill(self.pid.as_raw())
    }
}

/// Sends `SIGKILL` to `pid`. A container's init ignores every other
/// signal sent from outside its namespace. A process that is already gone
/// is not an error.
///
/// # Errors
///
/// Returns an error if the signal cannot be delivered.
pub fn force_kill(pid: i32) -> Result<()> {
    match kill(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(CorralError::PermissionDenied {
            message: format!("kill {pid}: {e}"),
        }),
    }
}
