//! The first code run inside a new container.
//!
//! The init process waits on fd 3 for its command, optionally pivots into
//! its working directory, resolves the program on `PATH`, and replaces
//! itself with it. Progress is one-way:
//!
//! ```text
//! AwaitingCommand --read_command--> Resolved --exec--> (user program)
//! ```
//!
//! `exec` only ever returns an error.

use std::convert::Infallible;
use std::ffi::CString;
use std::fs::File;
use std::io::Read;
use std::os::fd::FromRawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use corral_common::constants::INIT_COMMAND_FD;
use corral_common::error::{CorralError, Result};
use corral_core::filesystem::pivot_root::setup_root;

use crate::launcher::decode_command;

/// An init process that has not received its command yet.
#[derive(Debug)]
pub struct AwaitingCommand<R> {
    channel: R,
    pivot_root: bool,
}

/// A command resolved to an executable, ready to replace the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Absolute path of the program.
    pub program: PathBuf,
    /// Full argument vector, `argv[0]` as the user typed it.
    pub argv: Vec<String>,
}

impl AwaitingCommand<File> {
    /// Takes ownership of the command pipe inherited on fd 3.
    #[must_use]
    pub fn inherited(pivot_root: bool) -> Self {
        // SAFETY: the launcher places the pipe's read end on fd 3 and nothing
        // else in this process opens or owns that descriptor.
        let channel = unsafe { File::from_raw_fd(INIT_COMMAND_FD) };
        Self::new(channel, pivot_root)
    }
}

impl<R: Read> AwaitingCommand<R> {
    /// Waits on `channel`; with `pivot_root` the working directory becomes
    /// the new root before the program is looked up.
    pub const fn new(channel: R, pivot_root: bool) -> Self {
        Self {
            channel,
            pivot_root,
        }
    }

    /// Reads the command to end of stream and resolves its program.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty command, a mount error if
    /// pivoting fails, and [`CorralError::NotFound`] if the program is not
    /// on `PATH`.
    pub fn read_command(mut self) -> Result<Resolved> {
        let mut payload = Vec::new();
        let _ = self
            .channel
            .read_to_end(&mut payload)
            .map_err(|e| CorralError::io("command channel", e))?;
        let argv = decode_command(&payload);
        let Some(first) = argv.first() else {
            return Err(CorralError::config("init received an empty command"));
        };

        if self.pivot_root {
            let root = std::env::current_dir().map_err(|e| CorralError::io(".", e))?;
            setup_root(&root)?;
        }

        let program = which::which(first).map_err(|_| CorralError::NotFound {
            kind: "executable",
            id: first.clone(),
        })?;
        tracing::debug!(program = %program.display(), "command resolved");
        Ok(Resolved { program, argv })
    }
}

impl Resolved {
    /// Replaces the current process with the program, keeping the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `execv` fails; on success it never returns.
    pub fn exec(self) -> Result<Infallible> {
        let program = to_c_string(self.program.as_os_str().as_bytes())?;
        let argv = self
            .argv
            .iter()
            .map(|arg| to_c_string(arg.as_bytes()))
            .collect::<Result<Vec<_>>>()?;
        nix::unistd::execv(&program, &argv)
            .map_err(|e| CorralError::io(&self.program, e.into()))
    }
}

fn to_c_string(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|_| CorralError::config("NUL byte in command"))
}

/// Entry point of `corral init`.
///
/// # Errors
///
/// Returns whatever stopped the process from becoming the user program.
pub fn run(pivot_root: bool) -> Result<Infallible> {
    AwaitingCommand::inherited(pivot_root).read_command()?.exec()
}
