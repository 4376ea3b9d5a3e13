//! One-shot teardown on process exit.
//!
//! Hooks registered with [`ProcessExitHooks`] run from `atexit`, i.e. when
//! `main` returns (including after a panic in `main`) or `std::process::exit`
//! is called. They run inside `exit()` itself, so the status the program is
//! exiting with is passed through unchanged.

use log::{debug, warn};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

pub type ExitHook = Box<dyn FnOnce() + Send + 'static>;

/// Host facility that runs callbacks when the process terminates.
pub trait ExitHooks: Send + Sync {
    fn register(&self, hook: ExitHook);
}

static HOOKS: Mutex<Vec<ExitHook>> = parking_lot::const_mutex(Vec::new());
static INSTALL: Once = Once::new();

/// `atexit`-backed hook registry shared by the whole process
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExitHooks;

impl ExitHooks for ProcessExitHooks {
    fn register(&self, hook: ExitHook) {
        INSTALL.call_once(|| {
            if unsafe { libc::atexit(run_exit_hooks) } != 0 {
                warn!("Failed to install atexit handler; displays will not be cleaned up at exit");
            }
        });
        HOOKS.lock().push(hook);
    }
}

extern "C" fn run_exit_hooks() {
    let hooks = std::mem::take(&mut *HOOKS.lock());
    // Last registered, first torn down
    for hook in hooks.into_iter().rev() {
        // Unwinding out of an extern "C" fn aborts; keep going instead.
        if panic::catch_unwind(AssertUnwindSafe(hook)).is_err() {
            eprintln!("exit hook panicked");
        }
    }
}

/// Arms a teardown action at most once.
pub struct ExitGuard {
    armed: AtomicBool,
    hooks: Arc<dyn ExitHooks>,
}

impl ExitGuard {
    pub fn new(hooks: Arc<dyn ExitHooks>) -> Self {
        Self {
            armed: AtomicBool::new(false),
            hooks,
        }
    }

    /// Register `teardown` on the first call; later calls do nothing.
    ///
    /// Returns whether this call registered the hook.
    pub fn arm<F>(&self, teardown: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.armed.swap(true, Ordering::SeqCst) {
            return false;
        }
        debug!("Installing exit hook");
        self.hooks.register(Box::new(teardown));
        true
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ExitGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitGuard").field("armed", &self.is_armed()).finish()
    }
}

/// Collects hooks instead of installing them; `run` fires them like exit would.
///
/// For embedders that drive teardown themselves, and for tests.
#[derive(Default)]
pub struct RecordingExitHooks {
    hooks: Mutex<Vec<ExitHook>>,
}

impl RecordingExitHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run and drop every registered hook, newest first.
    pub fn run(&self) {
        let hooks = std::mem::take(&mut *self.hooks.lock());
        for hook in hooks.into_iter().rev() {
            hook();
        }
    }
}

impl ExitHooks for RecordingExitHooks {
    fn register(&self, hook: ExitHook) {
        self.hooks.lock().push(hook);
    }
}
