//! Configuration management for headless-display

use crate::capture::ScreenshotTool;
use crate::display::{DisplayOptions, DEFAULT_DIMENSIONS, DEFAULT_LAUNCH_TIMEOUT, MAX_DISPLAY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Xvfb display configuration
    pub display: DisplayConfig,

    /// ffmpeg video capture configuration
    pub video: VideoConfig,

    /// x11vnc configuration
    pub vnc: VncConfig,

    /// Screenshot configuration
    pub screenshot: ScreenshotConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Display number to start from (99 when unset)
    pub display: Option<u32>,

    /// Scan forward for a free display; defaults to true unless `display` is set
    pub autopick: Option<bool>,

    /// Attach to an already running Xvfb instead of failing
    pub reuse: bool,

    /// Screen geometry, WIDTHxHEIGHTxDEPTH
    pub dimensions: String,

    /// Seconds to wait for Xvfb to write its lock file
    pub launch_timeout_secs: u64,

    /// Kill the display when the program exits
    pub destroy_at_exit: bool,

    /// X extensions to enable (`+extension NAME`)
    pub extensions: Vec<String>,

    /// Xvfb binary name or path
    pub xvfb_executable: String,

    /// Directory holding the `.X<N>-lock` files
    pub lock_dir: PathBuf,

    /// Last display number considered when autopicking
    pub max_display: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            display: None,
            autopick: None,
            reuse: true,
            dimensions: DEFAULT_DIMENSIONS.to_string(),
            launch_timeout_secs: DEFAULT_LAUNCH_TIMEOUT.as_secs(),
            destroy_at_exit: true,
            extensions: Vec::new(),
            xvfb_executable: "Xvfb".to_string(),
            lock_dir: PathBuf::from("/tmp"),
            max_display: MAX_DISPLAY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// ffmpeg binary name or path
    pub ffmpeg_path: String,

    /// Override for `/tmp/.headless_ffmpeg_<N>.pid`
    pub pid_file_path: Option<PathBuf>,

    /// Override for `/tmp/.headless_ffmpeg_<N>.mov`
    pub tmp_file_path: Option<PathBuf>,

    /// Where ffmpeg's stderr goes
    pub log_file_path: PathBuf,

    /// Video codec passed to `-vcodec`
    pub codec: String,

    /// Capture frame rate
    pub frame_rate: u32,

    /// Input device options, e.g. `-draw_mouse 0`
    pub devices: Vec<String>,

    /// Extra options placed before the output file
    pub extra: Vec<String>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            pid_file_path: None,
            tmp_file_path: None,
            log_file_path: PathBuf::from("/dev/null"),
            codec: "qtrle".to_string(),
            frame_rate: 30,
            devices: Vec::new(),
            extra: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VncConfig {
    /// x11vnc binary name or path
    pub x11vnc_path: String,

    /// Override for `/tmp/.headless_vnc_<N>.pid`
    pub pid_file_path: Option<PathBuf>,

    /// Where x11vnc's stderr goes
    pub log_file_path: PathBuf,
}

impl Default for VncConfig {
    fn default() -> Self {
        Self {
            x11vnc_path: "x11vnc".to_string(),
            pid_file_path: None,
            log_file_path: PathBuf::from("/dev/null"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenshotConfig {
    /// Tool used to grab the root window
    pub using: ScreenshotTool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level / env_logger filter
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        DisplayOptions::from_config(&self.display)?;

        if self.video.frame_rate == 0 {
            return Err("Video frame rate must be non-zero".into());
        }

        if self.video.codec.trim().is_empty() {
            return Err("Video codec must not be empty".into());
        }

        if self.logging.level.trim().is_empty() {
            return Err("Logging level must not be empty".into());
        }

        Ok(())
    }
}
