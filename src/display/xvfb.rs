// Xvfb command line and lock-file conventions

use super::{DisplayError, Result};
use crate::process::CommandSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Screen geometry: width x height x color depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Dimensions {
    /// `WIDTHxHEIGHT`, the form ffmpeg wants
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 1024,
            depth: 24,
        }
    }
}

impl FromStr for Dimensions {
    type Err = DisplayError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || DisplayError::InvalidOptions(format!("invalid dimensions {:?}, expected WxHxD", s));

        let parts: Vec<&str> = s.trim().split('x').collect();
        if parts.len() != 3 {
            return Err(invalid());
        }
        let mut values = [0u32; 3];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| invalid())?;
        }
        if values.contains(&0) {
            return Err(invalid());
        }

        Ok(Self {
            width: values[0],
            height: values[1],
            depth: values[2],
        })
    }
}

impl TryFrom<String> for Dimensions {
    type Error = DisplayError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Dimensions> for String {
    fn from(d: Dimensions) -> Self {
        d.to_string()
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

/// Lock file Xvfb creates for display `n` under `lock_dir`
pub fn lock_path(lock_dir: &Path, n: u32) -> PathBuf {
    lock_dir.join(format!(".X{}-lock", n))
}

/// Builds the Xvfb invocation for a given display number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XvfbCommand {
    pub executable: PathBuf,
    pub dimensions: Dimensions,
    pub extensions: Vec<String>,
    pub lock_dir: PathBuf,
}

impl XvfbCommand {
    pub fn lock_path(&self, n: u32) -> PathBuf {
        lock_path(&self.lock_dir, n)
    }

    /// `Xvfb :N -screen 0 WxHxD -ac [+extension NAME]...`
    pub fn for_display(&self, n: u32) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.executable)
            .arg(format!(":{}", n))
            .args(["-screen", "0"])
            .arg(self.dimensions.to_string())
            .arg("-ac");

        for ext in &self.extensions {
            spec = spec.arg("+extension").arg(ext);
        }

        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xvfb() -> XvfbCommand {
        XvfbCommand {
            executable: PathBuf::from("/usr/bin/Xvfb"),
            dimensions: Dimensions::default(),
            extensions: Vec::new(),
            lock_dir: PathBuf::from("/tmp"),
        }
    }

    #[test]
    fn parses_dimensions() {
        let d: Dimensions = "1024x768x16".parse().expect("parse");
        assert_eq!((d.width, d.height, d.depth), (1024, 768, 16));
        assert_eq!(d.resolution(), "1024x768");
        assert_eq!(d.to_string(), "1024x768x16");
    }

    #[test]
    fn rejects_bad_dimensions() {
        assert!("1024x768".parse::<Dimensions>().is_err());
        assert!("1024x0x24".parse::<Dimensions>().is_err());
        assert!("widexhighxdeep".parse::<Dimensions>().is_err());
        assert!("".parse::<Dimensions>().is_err());
    }

    #[test]
    fn command_targets_display_with_dimensions() {
        let mut cmd = xvfb();
        cmd.dimensions = "1280x1024x24".parse().expect("parse");
        assert_eq!(
            cmd.for_display(99).to_string(),
            "/usr/bin/Xvfb :99 -screen 0 1280x1024x24 -ac"
        );
    }

    #[test]
    fn extensions_are_appended() {
        let mut cmd = xvfb();
        cmd.extensions = vec!["RANDR".to_string(), "GLX".to_string()];
        assert_eq!(
            cmd.for_display(5).to_string(),
            "/usr/bin/Xvfb :5 -screen 0 1280x1024x24 -ac +extension RANDR +extension GLX"
        );
    }

    #[test]
    fn lock_path_follows_x_convention() {
        assert_eq!(xvfb().lock_path(99), PathBuf::from("/tmp/.X99-lock"));
    }
}
