//! View-only x11vnc server attached to a headless display.

use crate::capture::Result;
use crate::config::VncConfig;
use crate::exit_guard::{ExitGuard, ExitHooks};
use crate::process::{find_executable, CommandSpec, KillOptions, ProcessRegistry};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct Vnc {
    display: u32,
    x11vnc_path: PathBuf,
    pid_file_path: PathBuf,
    log_file_path: PathBuf,
    registry: Arc<dyn ProcessRegistry + Send + Sync>,
    exit_guard: ExitGuard,
}

impl Vnc {
    pub fn new(
        display: u32,
        config: &VncConfig,
        registry: Arc<dyn ProcessRegistry + Send + Sync>,
        exit_hooks: Arc<dyn ExitHooks>,
    ) -> Result<Self> {
        let x11vnc_path = find_executable(&config.x11vnc_path)?;

        Ok(Self {
            display,
            x11vnc_path,
            pid_file_path: config
                .pid_file_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("/tmp/.headless_vnc_{}.pid", display))),
            log_file_path: config.log_file_path.clone(),
            registry,
            exit_guard: ExitGuard::new(exit_hooks),
        })
    }

    pub fn pid_file_path(&self) -> &Path {
        &self.pid_file_path
    }

    pub fn is_running(&self) -> bool {
        matches!(self.registry.running_pid(&self.pid_file_path), Ok(Some(_)))
    }

    pub fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.x11vnc_path)
            .args(["-display".to_string(), format!(":{}", self.display)])
            .args(["-N", "-nopw", "-viewonly", "-shared", "-forever", "-listen", "localhost"])
    }

    /// Start x11vnc unless one is already serving this pid file.
    pub fn start(&self) -> Result<()> {
        if self.is_running() {
            debug!("x11vnc for :{} already running", self.display);
            return Ok(());
        }

        let pid = self
            .registry
            .spawn_tracked(&self.command(), &self.pid_file_path, &self.log_file_path)?;
        info!("Serving display :{} over VNC (x11vnc pid {})", self.display, pid);

        let registry = self.registry.clone();
        let pid_file = self.pid_file_path.clone();
        self.exit_guard.arm(move || {
            registry.kill(&pid_file, KillOptions::wait());
        });
        Ok(())
    }

    pub fn stop(&self) {
        self.registry.kill(&self.pid_file_path, KillOptions::wait());
    }
}
