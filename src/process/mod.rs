// Process supervision primitives
//
// PID-file bookkeeping, liveness/ownership probes and detached launching of
// backing processes (Xvfb, ffmpeg, x11vnc).

mod launcher;
pub mod pidfile;
mod registry;

pub use launcher::{CommandSpec, LaunchedProcess, Launcher, RunningProcess, SubprocessLauncher};
pub use registry::{KillOptions, ProcessRegistry, UnixRegistry};

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Process supervision errors
#[derive(Debug)]
pub enum ProcessError {
    /// Not allowed to inspect or signal a process / read its pid file
    PermissionDenied(String),
    /// The OS refused to create the process
    SpawnFailed { program: String, source: io::Error },
    /// Required executable not found
    ExecutableNotFound(String),
    /// Any other I/O failure
    Io(io::Error),
}

impl ProcessError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, ProcessError::PermissionDenied(_))
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::PermissionDenied(what) => write!(f, "Permission denied: {}", what),
            ProcessError::SpawnFailed { program, source } => {
                write!(f, "Failed to spawn {}: {}", program, source)
            }
            ProcessError::ExecutableNotFound(name) => {
                write!(f, "{} not found on your system", name)
            }
            ProcessError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessError::SpawnFailed { source, .. } => Some(source),
            ProcessError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ProcessError {
    fn from(e: io::Error) -> Self {
        ProcessError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, ProcessError>;

/// Resolve an executable name to a full path.
///
/// Names containing a path separator are taken as-is when they exist;
/// bare names are looked up on `PATH`.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    if name.contains(std::path::MAIN_SEPARATOR) {
        let path = Path::new(name);
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(ProcessError::ExecutableNotFound(name.to_string()))
        };
    }

    which::which(name).map_err(|_| ProcessError::ExecutableNotFound(name.to_string()))
}
