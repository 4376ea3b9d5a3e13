// Display management module for headless X11 sessions
//
// This module picks a free display number, launches (or attaches to) an Xvfb
// server bound to it, points DISPLAY at it and tears it down again.

mod allocator;
mod manager;
mod xvfb;

pub use allocator::{Acquired, SlotAcquirer, SlotRequest, ALREADY_ACTIVE_MARKER, SOCKET_TAKEN_MARKER};
pub use manager::{Backends, DisplayOptions, Headless};
pub use xvfb::{lock_path, Dimensions, XvfbCommand};

use crate::process::ProcessError;
use std::fmt;
use std::time::Duration;

/// Default display number when none is requested
pub const DEFAULT_DISPLAY: u32 = 99;
/// Upper bound of the autopick range
pub const MAX_DISPLAY: u32 = 10_000;
pub const DEFAULT_DIMENSIONS: &str = "1280x1024x24";
pub const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Display management errors
#[derive(Debug)]
pub enum DisplayError {
    /// Xvfb (or another required program) is not installed
    ExecutableNotFound(String),
    /// Rejected configuration
    InvalidOptions(String),
    /// Display is occupied and may not be reused
    AlreadyTaken(u32),
    /// Display belongs to someone we can't even inspect
    PermissionDenied(u32),
    /// The X socket exists but the lock file doesn't
    SocketTaken(u32),
    /// Xvfb started but never wrote its lock file
    LaunchTimeout { display: u32, timeout: Duration },
    /// Xvfb exited before finishing initialization
    LaunchFailed { display: u32, diagnostics: String },
    /// No display number in the range could be used
    NoAvailableDisplay { start: u32, end: u32 },
    /// The OS refused to start the server
    Spawn(ProcessError),
    /// Registry / filesystem failure
    Process(ProcessError),
}

impl fmt::Display for DisplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayError::ExecutableNotFound(name) => {
                write!(f, "{} not found on your system. Please install it: apt-get install xvfb", name)
            }
            DisplayError::InvalidOptions(msg) => write!(f, "Invalid display options: {}", msg),
            DisplayError::AlreadyTaken(n) => {
                write!(f, "Display :{} is already taken and reuse=false", n)
            }
            DisplayError::PermissionDenied(n) => {
                write!(f, "Display :{} is owned by another user and cannot be inspected", n)
            }
            DisplayError::SocketTaken(n) => write!(
                f,
                "Display :{} socket is taken but lock file is missing - check the troubleshooting guide",
                n
            ),
            DisplayError::LaunchTimeout { display, timeout } => write!(
                f,
                "Xvfb launched on :{} but did not complete initialization within {:?}",
                display, timeout
            ),
            DisplayError::LaunchFailed { display, diagnostics } => {
                write!(f, "Xvfb exited before display :{} was ready", display)?;
                let diagnostics = diagnostics.trim();
                if !diagnostics.is_empty() {
                    write!(f, ": {}", diagnostics)?;
                }
                Ok(())
            }
            DisplayError::NoAvailableDisplay { start, end } => {
                write!(f, "Could not find an available display in :{}..:{}", start, end)
            }
            DisplayError::Spawn(e) => write!(f, "Xvfb did not launch: {}", e),
            DisplayError::Process(e) => write!(f, "Process error: {}", e),
        }
    }
}

impl std::error::Error for DisplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DisplayError::Spawn(e) | DisplayError::Process(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProcessError> for DisplayError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::ExecutableNotFound(name) => DisplayError::ExecutableNotFound(name),
            ProcessError::SpawnFailed { .. } => DisplayError::Spawn(e),
            other => DisplayError::Process(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, DisplayError>;
