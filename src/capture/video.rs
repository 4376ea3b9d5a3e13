// ffmpeg x11grab video recording supervised through a pid file

use super::{CaptureError, Result};
use crate::config::VideoConfig;
use crate::display::Dimensions;
use crate::exit_guard::{ExitGuard, ExitHooks};
use crate::process::{find_executable, CommandSpec, KillOptions, ProcessRegistry};
use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Records a display to a temporary file until saved or discarded
pub struct VideoRecorder {
    display: u32,
    dimensions: Dimensions,
    ffmpeg_path: PathBuf,
    pid_file_path: PathBuf,
    tmp_file_path: PathBuf,
    log_file_path: PathBuf,
    codec: String,
    frame_rate: u32,
    devices: Vec<String>,
    extra: Vec<String>,
    registry: Arc<dyn ProcessRegistry + Send + Sync>,
    exit_guard: ExitGuard,
}

impl VideoRecorder {
    /// Fails when ffmpeg cannot be found.
    pub fn new(
        display: u32,
        dimensions: Dimensions,
        config: &VideoConfig,
        registry: Arc<dyn ProcessRegistry + Send + Sync>,
        exit_hooks: Arc<dyn ExitHooks>,
    ) -> Result<Self> {
        let ffmpeg_path = find_executable(&config.ffmpeg_path)?;

        Ok(Self {
            display,
            dimensions,
            ffmpeg_path,
            pid_file_path: config
                .pid_file_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("/tmp/.headless_ffmpeg_{}.pid", display))),
            tmp_file_path: config
                .tmp_file_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("/tmp/.headless_ffmpeg_{}.mov", display))),
            log_file_path: config.log_file_path.clone(),
            codec: config.codec.clone(),
            frame_rate: config.frame_rate,
            devices: config.devices.clone(),
            extra: config.extra.clone(),
            registry,
            exit_guard: ExitGuard::new(exit_hooks),
        })
    }

    pub fn pid_file_path(&self) -> &Path {
        &self.pid_file_path
    }

    pub fn tmp_file_path(&self) -> &Path {
        &self.tmp_file_path
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg_path
    }

    pub fn capture_running(&self) -> bool {
        matches!(self.registry.running_pid(&self.pid_file_path), Ok(Some(_)))
    }

    /// `ffmpeg -y -r RATE -s WxH -f x11grab -i :N [devices] -vcodec CODEC [extra] TMP`
    pub fn command(&self) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.ffmpeg_path)
            .arg("-y")
            .args(["-r".to_string(), self.frame_rate.to_string()])
            .args(["-s".to_string(), self.dimensions.resolution()])
            .args(["-f", "x11grab"])
            .args(["-i".to_string(), format!(":{}", self.display)]);

        for device in &self.devices {
            spec = spec.args(device.split_whitespace());
        }
        spec = spec.args(["-vcodec", self.codec.as_str()]);
        for option in &self.extra {
            spec = spec.args(option.split_whitespace());
        }

        spec.arg(&self.tmp_file_path)
    }

    /// Start recording; the recording is discarded at exit unless saved first.
    pub fn start_capture(&self) -> Result<()> {
        let pid = self
            .registry
            .spawn_tracked(&self.command(), &self.pid_file_path, &self.log_file_path)?;
        info!("Recording display :{} (ffmpeg pid {})", self.display, pid);

        let registry = self.registry.clone();
        let pid_file = self.pid_file_path.clone();
        let tmp_file = self.tmp_file_path.clone();
        self.exit_guard.arm(move || {
            discard(registry.as_ref(), &pid_file, &tmp_file);
        });
        Ok(())
    }

    /// Stop recording and move the result to `path`.
    pub fn stop_and_save(&self, path: &Path) -> Result<()> {
        self.registry.kill(&self.pid_file_path, KillOptions::wait());

        if !self.tmp_file_path.exists() {
            warn!("No recording found at {}", self.tmp_file_path.display());
            return Ok(());
        }

        let save_err = |source| CaptureError::Save {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(save_err)?;
            }
        }
        move_file(&self.tmp_file_path, path).map_err(save_err)?;

        info!("Saved recording of :{} to {}", self.display, path.display());
        Ok(())
    }

    /// Stop recording and delete the temporary file.
    pub fn stop_and_discard(&self) {
        discard(self.registry.as_ref(), &self.pid_file_path, &self.tmp_file_path);
    }
}

fn discard(registry: &(dyn ProcessRegistry + Send + Sync), pid_file: &Path, tmp_file: &Path) {
    registry.kill(pid_file, KillOptions::wait());
    match fs::remove_file(tmp_file) {
        Ok(()) => debug!("Discarded recording {}", tmp_file.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", tmp_file.display(), e),
    }
}

/// Rename, falling back to copy + delete across filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}
