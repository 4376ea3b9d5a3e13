// Root-window screenshots via ImageMagick, xwd or GraphicsMagick

use super::{CaptureError, Result};
use crate::process::{find_executable, CommandSpec};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;

/// Screenshot tool selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotTool {
    #[default]
    ImageMagick,
    Xwd,
    #[serde(alias = "gm")]
    GraphicsMagick,
}

impl ScreenshotTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenshotTool::ImageMagick => "imagemagick",
            ScreenshotTool::Xwd => "xwd",
            ScreenshotTool::GraphicsMagick => "graphicsmagick",
        }
    }

    /// Executable the tool is invoked through
    pub fn executable(&self) -> &'static str {
        match self {
            ScreenshotTool::ImageMagick => "import",
            ScreenshotTool::Xwd => "xwd",
            ScreenshotTool::GraphicsMagick => "gm",
        }
    }

    /// Command that grabs the root window of display `n` into `path`
    pub fn command(&self, program: PathBuf, display: u32, path: &Path) -> CommandSpec {
        let target = format!("localhost:{}", display);
        let spec = CommandSpec::new(program);
        match self {
            ScreenshotTool::ImageMagick => spec
                .args(["-display", target.as_str(), "-window", "root"])
                .arg(path),
            ScreenshotTool::Xwd => spec
                .args(["-display", target.as_str(), "-silent", "-root", "-out"])
                .arg(path),
            ScreenshotTool::GraphicsMagick => spec
                .args(["import", "-display", target.as_str(), "-window", "root"])
                .arg(path),
        }
    }
}

impl fmt::Display for ScreenshotTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScreenshotTool {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "imagemagick" => Ok(ScreenshotTool::ImageMagick),
            "xwd" => Ok(ScreenshotTool::Xwd),
            "graphicsmagick" | "gm" => Ok(ScreenshotTool::GraphicsMagick),
            other => Err(CaptureError::UnknownTool(other.to_string())),
        }
    }
}

/// Capture the root window of display `n` into `path` and wait for the tool.
pub fn take_screenshot(display: u32, path: &Path, tool: ScreenshotTool) -> Result<()> {
    let program = find_executable(tool.executable())?;
    let spec = tool.command(program, display, path);

    debug!("Taking screenshot: {}", spec);
    let status = spec
        .to_command()
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| CaptureError::Process(e.into()))?;

    if !status.success() {
        return Err(CaptureError::CommandFailed {
            command: spec.to_string(),
            status: status.code(),
        });
    }

    info!("Saved screenshot of :{} to {}", display, path.display());
    Ok(())
}
