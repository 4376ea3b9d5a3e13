// PID-file keyed process registry: liveness, ownership, teardown

use super::launcher::CommandSpec;
use super::{pidfile, ProcessError, Result};
use log::{debug, info, warn};
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::thread;
use std::time::{Duration, Instant};

/// How long a SIGTERM'd process gets before SIGKILL when waiting
const TERM_GRACE: Duration = Duration::from_secs(5);
/// How long to wait for a SIGKILL'd process to disappear
const KILL_GRACE: Duration = Duration::from_secs(2);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Options for [`ProcessRegistry::kill`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KillOptions {
    /// Block until the process is gone
    pub wait: bool,
    /// Leave the pid file in place (the process removes it itself)
    pub preserve_pid_file: bool,
}

impl KillOptions {
    pub fn wait() -> Self {
        Self {
            wait: true,
            preserve_pid_file: false,
        }
    }
}

/// Capability interface over "how to detect and kill a process".
///
/// Nothing here caches liveness: every call goes back to the OS.
pub trait ProcessRegistry {
    /// PID recorded at `path`, if any
    fn read_pid(&self, path: &Path) -> Result<Option<u32>>;

    /// Whether `pid` exists. Fails with `PermissionDenied` when the OS won't say.
    fn is_alive(&self, pid: u32) -> Result<bool>;

    /// Whether the calling user could signal (and so terminate) `pid`
    fn is_mine(&self, pid: u32) -> bool;

    /// Terminate the process recorded at `pid_file`. Never fails: a process
    /// or file that is already gone counts as success.
    fn kill(&self, pid_file: &Path, options: KillOptions);

    /// Launch `spec` detached with stderr appended to `log_file`, and record
    /// its PID at `pid_file` before returning.
    fn spawn_tracked(&self, spec: &CommandSpec, pid_file: &Path, log_file: &Path) -> Result<u32>;

    /// PID at `path` if it names a live process
    fn running_pid(&self, path: &Path) -> Result<Option<u32>> {
        match self.read_pid(path)? {
            Some(pid) if self.is_alive(pid)? => Ok(Some(pid)),
            _ => Ok(None),
        }
    }
}

/// Registry implementation for Unix-like systems (libc signals)
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixRegistry;

impl ProcessRegistry for UnixRegistry {
    fn read_pid(&self, path: &Path) -> Result<Option<u32>> {
        pidfile::read_pid(path)
    }

    fn is_alive(&self, pid: u32) -> Result<bool> {
        // A zombie child of ours still has a process group; collect it first.
        if reap_child(pid) {
            return Ok(false);
        }
        // A process group lookup succeeds for any existing process,
        // including ones owned by other users.
        if unsafe { libc::getpgid(pid as libc::pid_t) } >= 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Ok(false),
            Some(libc::EPERM) => Err(ProcessError::PermissionDenied(format!("pid {}", pid))),
            _ => Err(ProcessError::Io(err)),
        }
    }

    fn is_mine(&self, pid: u32) -> bool {
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    fn kill(&self, pid_file: &Path, options: KillOptions) {
        match self.read_pid(pid_file) {
            Ok(Some(pid)) => terminate(pid, options.wait),
            Ok(None) => debug!("No live pid recorded in {}", pid_file.display()),
            Err(e) => debug!("Cannot read {}: {}", pid_file.display(), e),
        }

        if !options.preserve_pid_file {
            if let Err(e) = pidfile::remove_pid(pid_file) {
                warn!("Failed to remove pid file {}: {}", pid_file.display(), e);
            }
        }
    }

    fn spawn_tracked(&self, spec: &CommandSpec, pid_file: &Path, log_file: &Path) -> Result<u32> {
        let log = OpenOptions::new().create(true).append(true).open(log_file)?;

        let mut cmd = spec.to_command();
        cmd.stdout(Stdio::null()).stderr(Stdio::from(log));

        debug!("Spawning tracked process: {}", spec);
        let mut child = cmd.spawn().map_err(|source| ProcessError::SpawnFailed {
            program: spec.program_name(),
            source,
        })?;
        let pid = child.id();

        if let Err(e) = pidfile::write_pid(pid_file, pid) {
            // Untracked processes would leak; take it down before reporting
            signal(pid, libc::SIGKILL);
            let _ = child.wait();
            return Err(e);
        }

        info!("Started {} (pid {}, pid file {})", spec.program_name(), pid, pid_file.display());
        Ok(pid)
    }
}

/// Outcome of delivering a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Delivered,
    /// No such process
    Gone,
    /// The process exists but belongs to someone else
    Denied,
}

/// Send `sig` to the process group led by `pid`, or to `pid` alone when it
/// isn't a group leader.
fn signal(pid: u32, sig: libc::c_int) -> Delivery {
    let raw = pid as libc::pid_t;
    // kill(-1, ..) would signal every process we may signal
    let target = if raw > 1 && unsafe { libc::getpgid(raw) } == raw { -raw } else { raw };

    if unsafe { libc::kill(target, sig) } == 0 {
        return Delivery::Delivered;
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Delivery::Gone,
        Some(libc::EPERM) => Delivery::Denied,
        _ => {
            debug!("Signal {} to {} failed: {}", sig, target, err);
            // The process may still be there; let the caller's wait decide
            Delivery::Delivered
        }
    }
}

fn terminate(pid: u32, wait: bool) {
    debug!("Sending SIGTERM to pid {}", pid);
    match signal(pid, libc::SIGTERM) {
        Delivery::Delivered => {}
        Delivery::Gone => {
            debug!("pid {} already exited", pid);
            reap_child(pid);
            return;
        }
        Delivery::Denied => {
            debug!("pid {} belongs to another user, leaving it running", pid);
            return;
        }
    }
    if !wait {
        reap_in_background(pid);
        return;
    }

    if wait_for_exit(pid, TERM_GRACE) {
        return;
    }

    warn!("pid {} ignored SIGTERM for {:?}, sending SIGKILL", pid, TERM_GRACE);
    if signal(pid, libc::SIGKILL) != Delivery::Delivered {
        return;
    }
    if !wait_for_exit(pid, KILL_GRACE) {
        warn!("pid {} still present after SIGKILL", pid);
    }
}

/// Collect `pid` if it is an exited child of ours. Returns true if it was.
fn reap_child(pid: u32) -> bool {
    let raw = pid as libc::pid_t;
    let mut status: libc::c_int = 0;
    unsafe { libc::waitpid(raw, &mut status, libc::WNOHANG) == raw }
}

/// Reap a signalled child once it exits, without blocking the caller.
fn reap_in_background(pid: u32) {
    let raw = pid as libc::pid_t;
    let mut status: libc::c_int = 0;
    // 0: still running child of ours; -1: not our child (or already reaped)
    if unsafe { libc::waitpid(raw, &mut status, libc::WNOHANG) } != 0 {
        return;
    }
    let spawned = thread::Builder::new()
        .name(format!("reap-{}", pid))
        .spawn(move || {
            let mut status: libc::c_int = 0;
            unsafe { libc::waitpid(raw, &mut status, 0) };
        });
    if let Err(e) = spawned {
        debug!("Cannot reap pid {} in the background: {}", pid, e);
    }
}

/// Poll until `pid` is gone, reaping it if it is our child.
fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let raw = pid as libc::pid_t;
    let start = Instant::now();

    loop {
        let mut status: libc::c_int = 0;
        let reaped = unsafe { libc::waitpid(raw, &mut status, libc::WNOHANG) };
        if reaped == raw {
            return true;
        }
        if reaped < 0 {
            // ECHILD: not our child, fall back to probing for existence
            if unsafe { libc::kill(raw, 0) } != 0
                && io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH)
            {
                return true;
            }
        }

        if start.elapsed() >= timeout {
            return false;
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn own_process_is_alive_and_mine() {
        let registry = UnixRegistry;
        let pid = std::process::id();
        assert!(registry.is_alive(pid).expect("probe"));
        assert!(registry.is_mine(pid));
    }

    #[test]
    fn exited_process_is_not_alive() {
        let registry = UnixRegistry;
        let mut child = Command::new("true").spawn().expect("spawn true");
        let pid = child.id();
        child.wait().expect("wait");
        assert!(!registry.is_alive(pid).expect("probe"));
        assert!(!registry.is_mine(pid));
    }

    #[test]
    fn init_is_alive_but_not_mine_for_unprivileged_users() {
        let registry = UnixRegistry;
        assert!(registry.is_alive(1).expect("probe"));
        if unsafe { libc::geteuid() } != 0 {
            assert!(!registry.is_mine(1));
        }
    }

    #[test]
    fn kill_missing_pid_file_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = UnixRegistry;
        registry.kill(&dir.path().join("absent.pid"), KillOptions::wait());
        registry.kill(&dir.path().join("absent.pid"), KillOptions::default());
    }

    #[test]
    fn spawn_tracked_then_kill_with_wait() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pid_file = dir.path().join("sleeper.pid");
        let log_file = dir.path().join("sleeper.log");
        let registry = UnixRegistry;

        let spec = CommandSpec::new("sh").args(["-c", "echo started >&2; exec sleep 30"]);
        let pid = registry
            .spawn_tracked(&spec, &pid_file, &log_file)
            .expect("spawn");

        assert_eq!(registry.read_pid(&pid_file).expect("read"), Some(pid));
        assert_eq!(registry.running_pid(&pid_file).expect("running"), Some(pid));

        registry.kill(&pid_file, KillOptions::wait());
        assert!(!registry.is_alive(pid).expect("probe"));
        assert!(!pid_file.exists());

        // Idempotent: the process and the file are both gone now
        registry.kill(&pid_file, KillOptions::wait());
    }

    #[test]
    fn preserve_pid_file_keeps_marker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pid_file = dir.path().join("keep.pid");
        let log_file = dir.path().join("keep.log");
        let registry = UnixRegistry;

        let spec = CommandSpec::new("sleep").arg("30");
        registry
            .spawn_tracked(&spec, &pid_file, &log_file)
            .expect("spawn");

        registry.kill(
            &pid_file,
            KillOptions {
                wait: true,
                preserve_pid_file: true,
            },
        );
        assert!(pid_file.exists());
        assert_eq!(registry.running_pid(&pid_file).expect("running"), None);
    }

    #[test]
    fn exited_child_is_collected_by_liveness_check() {
        let registry = UnixRegistry;
        // Dropped without wait(): exits into a zombie
        let pid = Command::new("true").spawn().expect("spawn true").id();

        let start = Instant::now();
        while registry.is_alive(pid).expect("probe") {
            assert!(start.elapsed() < Duration::from_secs(5), "pid {} never reported dead", pid);
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(unsafe { libc::kill(pid as libc::pid_t, 0) }, -1);
    }

    #[test]
    fn kill_without_wait_still_collects_the_child() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pid_file = dir.path().join("bg.pid");
        let registry = UnixRegistry;
        let pid = registry
            .spawn_tracked(&CommandSpec::new("sleep").arg("30"), &pid_file, &dir.path().join("bg.log"))
            .expect("spawn");

        registry.kill(&pid_file, KillOptions::default());

        let start = Instant::now();
        while unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
            assert!(start.elapsed() < Duration::from_secs(5), "pid {} left behind", pid);
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn foreign_process_is_left_alone_without_waiting() {
        if unsafe { libc::geteuid() } == 0 {
            // root may signal init
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let pid_file = dir.path().join("init.pid");
        pidfile::write_pid(&pid_file, 1).expect("write");

        let start = Instant::now();
        UnixRegistry.kill(&pid_file, KillOptions::wait());
        assert!(start.elapsed() < Duration::from_secs(1), "took {:?}", start.elapsed());
        assert!(UnixRegistry.is_alive(1).expect("probe"));
        assert_eq!(signal(1, 0), Delivery::Denied);
    }
}
