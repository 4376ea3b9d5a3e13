// Display number allocation under cross-process contention
//
// Candidates are tried in ascending order. Each one is either reused (a live
// Xvfb we may attach to), launched into, or skipped. Mutual exclusion between
// competing acquirers comes only from Xvfb's own lock file creation, so a
// launch can lose a race and the loser moves on to the next number.

use super::xvfb::XvfbCommand;
use super::{DisplayError, Result};
use crate::process::{Launcher, ProcessError, ProcessRegistry, RunningProcess};
use log::{debug, info, trace, warn};
use std::thread;
use std::time::{Duration, Instant};

/// Xvfb found the X socket in use without a matching lock file
pub const SOCKET_TAKEN_MARKER: &str = "Cannot establish any listening sockets";
/// Prefix of Xvfb's "lock file already held" complaint; followed by the display number
pub const ALREADY_ACTIVE_MARKER: &str = "Server is already active for display";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What the caller asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRequest {
    /// First candidate
    pub start: u32,
    /// Last candidate when autopicking (inclusive)
    pub end: u32,
    /// Scan forward on conflict instead of failing
    pub autopick: bool,
    /// Attach to an already running server
    pub reuse: bool,
    pub launch_timeout: Duration,
}

impl SlotRequest {
    fn candidates(&self) -> std::ops::RangeInclusive<u32> {
        if self.autopick {
            self.start..=self.end.max(self.start)
        } else {
            self.start..=self.start
        }
    }
}

/// The slot that was won
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// An existing server was reused
    Attached { display: u32, pid: u32 },
    /// We started the server
    Launched { display: u32, pid: u32 },
}

impl Acquired {
    pub fn display(&self) -> u32 {
        match *self {
            Acquired::Attached { display, .. } | Acquired::Launched { display, .. } => display,
        }
    }

    pub fn pid(&self) -> u32 {
        match *self {
            Acquired::Attached { pid, .. } | Acquired::Launched { pid, .. } => pid,
        }
    }

    pub fn was_launched(&self) -> bool {
        matches!(self, Acquired::Launched { .. })
    }
}

/// Occupancy of one candidate, derived fresh from the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Occupancy {
    Free,
    Occupied(u32),
    /// Someone else's resource we may not even inspect
    Inaccessible,
}

/// Result of launching into a free candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaunchOutcome {
    Ready(u32),
    /// Another process took the slot first
    LostRace,
}

/// Display-number state machine
pub struct SlotAcquirer<'a> {
    registry: &'a dyn ProcessRegistry,
    launcher: &'a dyn Launcher,
    xvfb: &'a XvfbCommand,
    poll_interval: Duration,
}

impl<'a> SlotAcquirer<'a> {
    pub fn new(registry: &'a dyn ProcessRegistry, launcher: &'a dyn Launcher, xvfb: &'a XvfbCommand) -> Self {
        Self {
            registry,
            launcher,
            xvfb,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Find the first usable display, attaching to or launching into it.
    pub fn acquire(&self, request: &SlotRequest) -> Result<Acquired> {
        debug!(
            "Acquiring display from :{} (autopick={}, reuse={})",
            request.start, request.autopick, request.reuse
        );

        let mut rejection = None;

        for n in request.candidates() {
            match self.probe(n)? {
                Occupancy::Inaccessible => {
                    debug!("Display :{} is not accessible, skipping", n);
                    rejection = Some(DisplayError::PermissionDenied(n));
                }
                Occupancy::Occupied(pid) => {
                    // An explicitly requested display is reused even when
                    // foreign; an autopicked one only when it is ours.
                    if request.reuse && (!request.autopick || self.registry.is_mine(pid)) {
                        info!("Reusing running Xvfb on :{} (pid {})", n, pid);
                        return Ok(Acquired::Attached { display: n, pid });
                    }
                    debug!("Display :{} is taken by pid {}, skipping", n, pid);
                    rejection = Some(DisplayError::AlreadyTaken(n));
                }
                Occupancy::Free => match self.launch(n, request.launch_timeout)? {
                    LaunchOutcome::Ready(pid) => {
                        info!("Launched Xvfb on :{} (pid {})", n, pid);
                        return Ok(Acquired::Launched { display: n, pid });
                    }
                    LaunchOutcome::LostRace => {
                        debug!("Lost the race for display :{}", n);
                        rejection = None;
                    }
                },
            }
        }

        let candidates = request.candidates();
        match rejection {
            Some(err) if !request.autopick => Err(err),
            _ => Err(DisplayError::NoAvailableDisplay {
                start: *candidates.start(),
                end: *candidates.end(),
            }),
        }
    }

    fn probe(&self, n: u32) -> Result<Occupancy> {
        match self.registry.running_pid(&self.xvfb.lock_path(n)) {
            Ok(Some(pid)) => Ok(Occupancy::Occupied(pid)),
            Ok(None) => Ok(Occupancy::Free),
            Err(ProcessError::PermissionDenied(_)) => Ok(Occupancy::Inaccessible),
            Err(e) => Err(e.into()),
        }
    }

    /// Start Xvfb on `n` and wait until it owns the lock file, fails, or times out.
    fn launch(&self, n: u32, timeout: Duration) -> Result<LaunchOutcome> {
        let spec = self.xvfb.for_display(n);
        let mut process = self.launcher.launch(&spec)?;

        let outcome = self.await_registration(process.as_mut(), n, timeout);
        // Anything but a ready server is abandoned; don't leave it behind
        // running or unreaped.
        if !matches!(outcome, Ok(LaunchOutcome::Ready(_))) {
            process.terminate();
        }
        outcome
    }

    fn await_registration(&self, process: &mut dyn RunningProcess, n: u32, timeout: Duration) -> Result<LaunchOutcome> {
        let lock = self.xvfb.lock_path(n);

        let start = Instant::now();
        let mut diagnostics = String::new();

        loop {
            diagnostics.push_str(&process.read_diagnostics());
            if let Some(outcome) = classify(&diagnostics, n)? {
                return Ok(outcome);
            }

            match self.registry.running_pid(&lock) {
                Ok(Some(pid)) if pid == process.pid() => return Ok(LaunchOutcome::Ready(pid)),
                Ok(Some(pid)) => {
                    debug!("Display :{} was claimed by pid {} instead of ours ({})", n, pid, process.pid());
                    return Ok(LaunchOutcome::LostRace);
                }
                Ok(None) => {}
                Err(ProcessError::PermissionDenied(_)) => return Ok(LaunchOutcome::LostRace),
                Err(e) => return Err(e.into()),
            }

            if process.has_exited() {
                return self.exited_early(process, n, diagnostics);
            }

            if start.elapsed() >= timeout {
                warn!("Xvfb on :{} did not initialize within {:?}", n, timeout);
                return Err(DisplayError::LaunchTimeout { display: n, timeout });
            }

            trace!("Waiting for Xvfb on :{} ({:?} elapsed)", n, start.elapsed());
            thread::sleep(self.poll_interval);
        }
    }

    /// The server died before we saw it ready: drain what it said last.
    fn exited_early(
        &self,
        process: &mut dyn RunningProcess,
        n: u32,
        mut diagnostics: String,
    ) -> Result<LaunchOutcome> {
        diagnostics.push_str(&process.read_diagnostics());
        if let Some(outcome) = classify(&diagnostics, n)? {
            return Ok(outcome);
        }
        // Another Xvfb may have grabbed the lock in the meantime
        if let Ok(Some(_)) = self.registry.running_pid(&self.xvfb.lock_path(n)) {
            return Ok(LaunchOutcome::LostRace);
        }
        Err(DisplayError::LaunchFailed {
            display: n,
            diagnostics,
        })
    }
}

/// Inspect accumulated stderr for the two conditions Xvfb reports at startup.
fn classify(diagnostics: &str, n: u32) -> Result<Option<LaunchOutcome>> {
    if diagnostics.contains(SOCKET_TAKEN_MARKER) {
        return Err(DisplayError::SocketTaken(n));
    }
    if reports_already_active(diagnostics, n) {
        return Ok(Some(LaunchOutcome::LostRace));
    }
    Ok(None)
}

/// True if `diagnostics` says display `n` specifically is already active.
fn reports_already_active(diagnostics: &str, n: u32) -> bool {
    diagnostics.match_indices(ALREADY_ACTIVE_MARKER).any(|(idx, marker)| {
        let rest = diagnostics[idx + marker.len()..].trim_start();
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse::<u32>().ok() == Some(n)
    })
}
