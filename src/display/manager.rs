// Headless display handle: acquire, use, tear down

use super::allocator::{Acquired, SlotAcquirer, SlotRequest};
use super::xvfb::{Dimensions, XvfbCommand};
use super::{DisplayError, Result, DEFAULT_DISPLAY, MAX_DISPLAY};
use crate::capture::{self, ScreenshotTool, VideoRecorder};
use crate::config::{DisplayConfig, VideoConfig};
use crate::env::{EnvironmentBinding, ProcessEnvironment, DISPLAY_VAR};
use crate::exit_guard::{ExitGuard, ExitHooks, ProcessExitHooks};
use crate::process::{self, find_executable, KillOptions, Launcher, ProcessRegistry, SubprocessLauncher, UnixRegistry};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Validated display options
#[derive(Debug, Clone)]
pub struct DisplayOptions {
    pub display: u32,
    pub autopick: bool,
    pub reuse: bool,
    pub dimensions: Dimensions,
    pub launch_timeout: Duration,
    pub destroy_at_exit: bool,
    pub extensions: Vec<String>,
    pub xvfb_executable: String,
    pub lock_dir: PathBuf,
    pub max_display: u32,
    pub video: VideoConfig,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            display: DEFAULT_DISPLAY,
            autopick: true,
            reuse: true,
            dimensions: Dimensions::default(),
            launch_timeout: super::DEFAULT_LAUNCH_TIMEOUT,
            destroy_at_exit: true,
            extensions: Vec::new(),
            xvfb_executable: "Xvfb".to_string(),
            lock_dir: PathBuf::from("/tmp"),
            max_display: MAX_DISPLAY,
            video: VideoConfig::default(),
        }
    }
}

impl DisplayOptions {
    /// Options for an explicitly requested display; autopick is off.
    pub fn for_display(display: u32) -> Self {
        Self {
            display,
            autopick: false,
            ..Self::default()
        }
    }

    /// Resolve defaults and validate a config section.
    pub fn from_config(config: &DisplayConfig) -> Result<Self> {
        let options = Self {
            display: config.display.unwrap_or(DEFAULT_DISPLAY),
            autopick: config.autopick.unwrap_or(config.display.is_none()),
            reuse: config.reuse,
            dimensions: config.dimensions.parse()?,
            launch_timeout: Duration::from_secs(config.launch_timeout_secs),
            destroy_at_exit: config.destroy_at_exit,
            extensions: config.extensions.clone(),
            xvfb_executable: config.xvfb_executable.clone(),
            lock_dir: config.lock_dir.clone(),
            max_display: config.max_display,
            video: VideoConfig::default(),
        };
        options.validate()?;
        Ok(options)
    }

    pub fn with_video(mut self, video: VideoConfig) -> Self {
        self.video = video;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.launch_timeout.is_zero() {
            return Err(DisplayError::InvalidOptions("launch timeout must be non-zero".into()));
        }
        if self.display > self.max_display {
            return Err(DisplayError::InvalidOptions(format!(
                "display {} exceeds maximum display number {}",
                self.display, self.max_display
            )));
        }
        if self.xvfb_executable.trim().is_empty() {
            return Err(DisplayError::InvalidOptions("Xvfb executable must not be empty".into()));
        }
        if let Some(ext) = self.extensions.iter().find(|e| e.trim().is_empty() || e.contains(char::is_whitespace)) {
            return Err(DisplayError::InvalidOptions(format!("invalid extension name {:?}", ext)));
        }
        Ok(())
    }

    fn slot_request(&self) -> SlotRequest {
        SlotRequest {
            start: self.display,
            end: self.max_display,
            autopick: self.autopick,
            reuse: self.reuse,
            launch_timeout: self.launch_timeout,
        }
    }
}

/// OS-facing collaborators; swapped for fakes in tests.
#[derive(Clone)]
pub struct Backends {
    pub registry: Arc<dyn ProcessRegistry + Send + Sync>,
    pub launcher: Arc<dyn Launcher + Send + Sync>,
    pub environment: Arc<dyn EnvironmentBinding>,
    pub exit_hooks: Arc<dyn ExitHooks>,
    /// Resolves an executable name to a path
    pub locate: fn(&str) -> process::Result<PathBuf>,
}

impl Default for Backends {
    fn default() -> Self {
        Self {
            registry: Arc::new(UnixRegistry),
            launcher: Arc::new(SubprocessLauncher),
            environment: Arc::new(ProcessEnvironment),
            exit_hooks: Arc::new(ProcessExitHooks),
            locate: find_executable,
        }
    }
}

/// A headless X display this process is attached to
pub struct Headless {
    acquired: Acquired,
    options: DisplayOptions,
    lock_path: PathBuf,
    backends: Backends,
    /// DISPLAY as it was before `begin_use`; `Some` while in use
    saved_display: Option<Option<String>>,
    /// Cleared once torn down so the exit hook doesn't kill twice
    in_use: Arc<AtomicBool>,
    exit_guard: ExitGuard,
    video: Option<VideoRecorder>,
}

impl Headless {
    /// Acquire a display using the real OS.
    pub fn acquire(options: DisplayOptions) -> Result<Self> {
        Self::acquire_with(options, Backends::default())
    }

    /// Acquire a display: validate options, find Xvfb, then attach or launch.
    pub fn acquire_with(options: DisplayOptions, backends: Backends) -> Result<Self> {
        options.validate()?;
        let executable = (backends.locate)(&options.xvfb_executable)?;

        let xvfb = XvfbCommand {
            executable,
            dimensions: options.dimensions,
            extensions: options.extensions.clone(),
            lock_dir: options.lock_dir.clone(),
        };

        let acquired = SlotAcquirer::new(backends.registry.as_ref(), backends.launcher.as_ref(), &xvfb)
            .acquire(&options.slot_request())?;

        Ok(Self {
            lock_path: xvfb.lock_path(acquired.display()),
            acquired,
            exit_guard: ExitGuard::new(backends.exit_hooks.clone()),
            options,
            backends,
            saved_display: None,
            in_use: Arc::new(AtomicBool::new(false)),
            video: None,
        })
    }

    /// Acquire, switch to the display for the duration of `f`, then destroy it.
    pub fn run<F, T>(options: DisplayOptions, f: F) -> Result<T>
    where
        F: FnOnce(&mut Headless) -> T,
    {
        Self::run_with(options, Backends::default(), f)
    }

    /// [`Headless::run`] with explicit backends.
    pub fn run_with<F, T>(options: DisplayOptions, backends: Backends, f: F) -> Result<T>
    where
        F: FnOnce(&mut Headless) -> T,
    {
        let mut headless = Self::acquire_with(options, backends)?;
        headless.begin_use();
        let result = f(&mut headless);
        headless.end_use();
        Ok(result)
    }

    /// The display number
    pub fn display(&self) -> u32 {
        self.acquired.display()
    }

    /// Value clients put in DISPLAY, e.g. `:99`
    pub fn display_name(&self) -> String {
        format!(":{}", self.display())
    }

    pub fn dimensions(&self) -> Dimensions {
        self.options.dimensions
    }

    /// Whether this handle started the server (as opposed to reusing one)
    pub fn was_launched(&self) -> bool {
        self.acquired.was_launched()
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Current server pid, re-read from the lock file
    pub fn pid(&self) -> Option<u32> {
        self.backends.registry.running_pid(&self.lock_path).ok().flatten()
    }

    pub fn is_running(&self) -> bool {
        self.pid().is_some()
    }

    pub fn is_torn_down_at_exit(&self) -> bool {
        self.options.destroy_at_exit
    }

    /// Point DISPLAY at this server and arm teardown at exit.
    pub fn begin_use(&mut self) {
        let env = &self.backends.environment;
        if self.saved_display.is_none() {
            self.saved_display = Some(env.get(DISPLAY_VAR));
        }
        env.set(DISPLAY_VAR, Some(&self.display_name()));
        self.in_use.store(true, Ordering::SeqCst);
        debug!("DISPLAY set to {}", self.display_name());

        let registry = self.backends.registry.clone();
        let lock_path = self.lock_path.clone();
        let in_use = self.in_use.clone();
        let destroy = self.options.destroy_at_exit;
        self.exit_guard.arm(move || {
            if destroy && in_use.swap(false, Ordering::SeqCst) {
                registry.kill(
                    &lock_path,
                    KillOptions {
                        wait: false,
                        preserve_pid_file: true,
                    },
                );
            }
        });
    }

    /// Put DISPLAY back the way `begin_use` found it, leaving the server running.
    pub fn restore_environment(&mut self) {
        if let Some(previous) = self.saved_display.take() {
            self.backends.environment.set(DISPLAY_VAR, previous.as_deref());
            debug!("DISPLAY restored to {:?}", previous);
        }
    }

    /// Restore DISPLAY and terminate the server without waiting for it.
    pub fn end_use(&mut self) {
        self.teardown(false);
    }

    /// Restore DISPLAY, terminate the server and wait until it is gone.
    pub fn end_use_and_wait(&mut self) {
        self.teardown(true);
    }

    fn teardown(&mut self, wait: bool) {
        self.restore_environment();
        self.in_use.store(false, Ordering::SeqCst);

        if let Some(video) = &self.video {
            if video.capture_running() {
                video.stop_and_discard();
            }
        }

        info!("Destroying display {}", self.display_name());
        // Xvfb deletes its own lock file; removing it here could make the
        // display look free while the server is still shutting down.
        self.backends.registry.kill(
            &self.lock_path,
            KillOptions {
                wait,
                preserve_pid_file: true,
            },
        );
    }

    /// Screenshot of the root window
    pub fn take_screenshot(&self, path: &Path, tool: ScreenshotTool) -> capture::Result<()> {
        capture::take_screenshot(self.display(), path, tool)
    }

    /// Video recorder for this display, created on first use.
    pub fn video(&mut self) -> capture::Result<&mut VideoRecorder> {
        let recorder = match self.video.take() {
            Some(recorder) => recorder,
            None => VideoRecorder::new(
                self.display(),
                self.options.dimensions,
                &self.options.video,
                self.backends.registry.clone(),
                self.backends.exit_hooks.clone(),
            )?,
        };
        Ok(self.video.insert(recorder))
    }
}

impl std::fmt::Debug for Headless {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Headless")
            .field("display", &self.display())
            .field("dimensions", &self.options.dimensions)
            .field("launched", &self.was_launched())
            .field("in_use", &self.in_use.load(Ordering::SeqCst))
            .finish()
    }
}
