//! Shared fixtures for the subprocess-driven tests.
//!
//! A shell script stands in for Xvfb: it claims `<lock_dir>/.X<N>-lock` with
//! an exclusive hard link, exactly like the real server, and complains the
//! way Xvfb does when it cannot.
#![allow(dead_code)]

use headless_display::display::{lock_path, Backends};
use headless_display::env::{MemoryEnvironment, DISPLAY_VAR};
use headless_display::exit_guard::RecordingExitHooks;
use headless_display::{DisplayError, DisplayOptions, Headless};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const FAKE_XVFB: &str = r#"#!/bin/sh
n="${1#:}"
lock="@LOCK_DIR@/.X$n-lock"
printf '%10d\n' $$ > "$lock.$$"
if ! ln "$lock.$$" "$lock" 2>/dev/null; then
    rm -f "$lock.$$"
    echo "(EE) Fatal server error:" >&2
    echo "(EE) Server is already active for display $n" >&2
    exit 1
fi
rm -f "$lock.$$"
trap 'rm -f "$lock"; exit 0' TERM
while :; do sleep 0.1; done
"#;

pub const BROKEN_SOCKET_XVFB: &str = r#"#!/bin/sh
echo "_XSERVTransMakeAllCOTSServerListeners: server already running" >&2
echo "(EE) Cannot establish any listening sockets - Make sure an X server isn't already running" >&2
exit 1
"#;

pub const HANGING_XVFB: &str = r#"#!/bin/sh
while :; do sleep 0.1; done
"#;

pub struct Sandbox {
    pub dir: TempDir,
    pub env: Arc<MemoryEnvironment>,
    pub hooks: Arc<RecordingExitHooks>,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
            env: Arc::new(MemoryEnvironment::with_var(DISPLAY_VAR, ":0")),
            hooks: Arc::new(RecordingExitHooks::new()),
        }
    }

    pub fn lock_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn install(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        let body = body.replace("@LOCK_DIR@", &self.lock_dir().display().to_string());
        fs::write(&path, body).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    pub fn options(&self, script: &Path, display: u32) -> DisplayOptions {
        DisplayOptions {
            display,
            xvfb_executable: script.display().to_string(),
            lock_dir: self.lock_dir().to_path_buf(),
            launch_timeout: Duration::from_secs(5),
            ..DisplayOptions::default()
        }
    }

    pub fn acquire(&self, options: DisplayOptions) -> Result<Headless, DisplayError> {
        let backends = Backends {
            environment: self.env.clone(),
            exit_hooks: self.hooks.clone(),
            ..Backends::default()
        };
        Headless::acquire_with(options, backends)
    }

    pub fn lock(&self, n: u32) -> PathBuf {
        lock_path(self.lock_dir(), n)
    }
}

/// Pid of a process that has exited and been reaped
pub fn dead_pid() -> u32 {
    let mut child = std::process::Command::new("true").spawn().expect("spawn");
    let pid = child.id();
    child.wait().expect("wait");
    pid
}

/// Children of this process that exited but were never reaped
#[cfg(target_os = "linux")]
pub fn zombie_children() -> Vec<u32> {
    let me = std::process::id();
    let mut zombies = Vec::new();
    let Ok(entries) = fs::read_dir("/proc") else {
        return zombies;
    };
    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let Ok(stat) = fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        // "pid (comm) state ppid ...", where comm may contain anything
        let Some(close) = stat.rfind(')') else {
            continue;
        };
        let mut fields = stat[close + 1..].split_whitespace();
        let state = fields.next();
        let ppid = fields.next().and_then(|p| p.parse::<u32>().ok());
        if state == Some("Z") && ppid == Some(me) {
            zombies.push(pid);
        }
    }
    zombies
}
