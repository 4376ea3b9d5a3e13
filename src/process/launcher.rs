// Detached subprocess launching with an observable diagnostic stream

use super::{ProcessError, Result};
use log::{debug, trace, warn};
use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read};
use std::os::unix::io::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, ChildStderr, Command, Stdio};

/// An opaque program + argument list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Build a `Command` detached into its own process group, with no stdin.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null()).process_group(0);
        cmd
    }

    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// A started process whose startup diagnostics can be polled.
pub trait RunningProcess {
    /// PID of the spawned process
    fn pid(&self) -> u32;

    /// Return whatever diagnostic output arrived since the last call, without blocking.
    fn read_diagnostics(&mut self) -> String;

    /// True once the process has terminated.
    fn has_exited(&mut self) -> bool;

    /// Forcibly stop a launch that is being abandoned and collect its exit status.
    fn terminate(&mut self);
}

/// Starts backing processes without waiting for them to initialize.
pub trait Launcher {
    fn launch(&self, spec: &CommandSpec) -> Result<Box<dyn RunningProcess>>;
}

/// Launcher backed by `std::process`, stderr wired to a non-blocking pipe.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubprocessLauncher;

impl Launcher for SubprocessLauncher {
    fn launch(&self, spec: &CommandSpec) -> Result<Box<dyn RunningProcess>> {
        Ok(Box::new(LaunchedProcess::spawn(spec)?))
    }
}

/// A spawned child with its stderr pipe.
///
/// The pipe is closed when this value is dropped; the process itself keeps
/// running in its own process group.
pub struct LaunchedProcess {
    child: Child,
    stderr: Option<ChildStderr>,
    exited: bool,
}

impl LaunchedProcess {
    pub fn spawn(spec: &CommandSpec) -> Result<Self> {
        let mut cmd = spec.to_command();
        cmd.stdout(Stdio::null()).stderr(Stdio::piped());

        debug!("Launching: {}", spec);

        let mut child = cmd.spawn().map_err(|source| ProcessError::SpawnFailed {
            program: spec.program_name(),
            source,
        })?;

        // If this fails the child still runs; stderr is simply not inspectable.
        let stderr = match child.stderr.take() {
            Some(stderr) => match set_nonblocking(&stderr) {
                Ok(()) => Some(stderr),
                Err(e) => {
                    warn!("Cannot make stderr of pid {} non-blocking: {}", child.id(), e);
                    None
                }
            },
            None => None,
        };

        debug!("Spawned {} as pid {}", spec.program_name(), child.id());

        Ok(Self {
            child,
            stderr,
            exited: false,
        })
    }
}

impl RunningProcess for LaunchedProcess {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn read_diagnostics(&mut self) -> String {
        let Some(stderr) = self.stderr.as_mut() else {
            return String::new();
        };

        let mut collected = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match stderr.read(&mut buf) {
                Ok(0) => {
                    // EOF: every writer is gone
                    self.stderr = None;
                    break;
                }
                Ok(n) => collected.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    trace!("stderr read failed for pid {}: {}", self.child.id(), e);
                    self.stderr = None;
                    break;
                }
            }
        }

        String::from_utf8_lossy(&collected).into_owned()
    }

    fn has_exited(&mut self) -> bool {
        if !self.exited {
            self.exited = match self.child.try_wait() {
                Ok(status) => status.is_some(),
                // Already collected through the registry
                Err(e) => e.raw_os_error() == Some(libc::ECHILD),
            };
        }
        self.exited
    }

    fn terminate(&mut self) {
        if self.has_exited() {
            return;
        }
        // The child leads its own process group; take its helpers down too
        let group = -(self.child.id() as libc::pid_t);
        if unsafe { libc::kill(group, libc::SIGKILL) } != 0 {
            if let Err(e) = self.child.kill() {
                debug!("Failed to kill pid {}: {}", self.child.id(), e);
            }
        }
        let _ = self.child.wait();
        self.exited = true;
    }
}

fn set_nonblocking(stderr: &ChildStderr) -> io::Result<()> {
    let fd = stderr.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
