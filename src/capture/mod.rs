//! Screen capture of a headless display
//!
//! Screenshots are one-shot tool invocations; video capture is an ffmpeg
//! process supervised through a pid file like the display itself.

pub mod screenshot;
pub mod video;

pub use screenshot::{take_screenshot, ScreenshotTool};
pub use video::VideoRecorder;

use crate::process::ProcessError;
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Capture errors
#[derive(Debug)]
pub enum CaptureError {
    /// The capture tool is not installed
    ExecutableNotFound(String),
    /// Unrecognized screenshot tool name
    UnknownTool(String),
    /// Tool ran but reported failure
    CommandFailed { command: String, status: Option<i32> },
    /// Could not move the recording into place
    Save { path: PathBuf, source: io::Error },
    Process(ProcessError),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::ExecutableNotFound(name) => {
                write!(f, "{} not found on your system. Install it or pick another tool", name)
            }
            CaptureError::UnknownTool(name) => {
                write!(f, "Unknown screenshot tool: {}. Valid options: imagemagick, xwd, graphicsmagick", name)
            }
            CaptureError::CommandFailed { command, status } => match status {
                Some(code) => write!(f, "{} exited with status {}", command, code),
                None => write!(f, "{} was terminated by a signal", command),
            },
            CaptureError::Save { path, source } => {
                write!(f, "Failed to save recording to {}: {}", path.display(), source)
            }
            CaptureError::Process(e) => write!(f, "Process error: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CaptureError::Save { source, .. } => Some(source),
            CaptureError::Process(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProcessError> for CaptureError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::ExecutableNotFound(name) => CaptureError::ExecutableNotFound(name),
            other => CaptureError::Process(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
