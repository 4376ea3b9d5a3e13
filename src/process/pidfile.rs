// PID marker file I/O
//
// Format: a single decimal PID, optionally padded with whitespace. Xvfb writes
// its lock file as a right-aligned 10-column number followed by a newline.

use super::{ProcessError, Result};
use std::fs;
use std::io;
use std::path::Path;

/// Read the PID recorded at `path`.
///
/// A missing file, empty content, `0` or anything that is not a positive
/// integer all mean "unoccupied" and yield `Ok(None)`. A file we are not
/// allowed to read is reported as `PermissionDenied`.
pub fn read_pid(path: &Path) -> Result<Option<u32>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            return Err(ProcessError::PermissionDenied(path.display().to_string()));
        }
        // Unreadable as text (e.g. garbage bytes) is just "no valid pid"
        Err(e) if e.kind() == io::ErrorKind::InvalidData => return Ok(None),
        Err(e) => return Err(ProcessError::Io(e)),
    };

    Ok(parse_pid(&content))
}

/// Parse pid file content; `None` for anything that is not a positive PID.
pub fn parse_pid(content: &str) -> Option<u32> {
    match content.trim().parse::<u32>() {
        Ok(0) | Err(_) => None,
        // pid_t is signed; anything larger can't be a real process
        Ok(pid) if pid > i32::MAX as u32 => None,
        Ok(pid) => Some(pid),
    }
}

/// Write a PID file atomically (temp file + rename).
pub fn write_pid(path: &Path, pid: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    fs::write(&temp, format!("{}\n", pid))?;
    fs::rename(&temp, path)?;
    Ok(())
}

/// Delete a PID file; a file that is already gone is not an error.
pub fn remove_pid(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ProcessError::Io(e)),
    }
}
