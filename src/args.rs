use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;

use headless_display::config;
use headless_display::ScreenshotTool;

#[derive(Parser, Debug)]
#[command(name = "headless-display")]
#[command(version)]
#[command(about = "Run programs against a throwaway Xvfb display", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/headless-display.toml")]
    pub config: PathBuf,

    /// Verbose logging
    #[arg(short, long, action, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a display, run a command against it, then destroy the display
    Run {
        #[command(flatten)]
        display: DisplayArgs,

        /// Command to run, after `--`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<OsString>,
    },

    /// Start (or reuse) a display and leave it running
    Start {
        #[command(flatten)]
        display: DisplayArgs,
    },

    /// Stop the Xvfb server of a display
    Stop {
        #[arg(short, long)]
        display: u32,

        /// Wait until the server has exited
        #[arg(long, action)]
        wait: bool,
    },

    /// Report whether a display is running
    Status {
        #[arg(short, long)]
        display: u32,

        /// Print JSON instead of text
        #[arg(long, action)]
        json: bool,
    },

    /// Capture the root window of a display
    Screenshot {
        #[arg(short, long)]
        display: u32,

        /// Output image path
        path: PathBuf,

        /// imagemagick, xwd or graphicsmagick
        #[arg(long)]
        using: Option<ScreenshotTool>,
    },
}

/// Display options shared by `run` and `start`
#[derive(clap::Args, Debug, Default)]
pub struct DisplayArgs {
    /// Display number; disables autopick unless --autopick is given
    #[arg(short, long)]
    pub display: Option<u32>,

    /// Scan upward for a free display if the requested one is unavailable
    #[arg(long, action)]
    pub autopick: bool,

    /// Never attach to an already running server
    #[arg(long, action)]
    pub no_reuse: bool,

    /// Screen geometry, WIDTHxHEIGHTxDEPTH
    #[arg(long)]
    pub dimensions: Option<String>,

    /// Seconds to wait for Xvfb to come up
    #[arg(long)]
    pub launch_timeout: Option<u64>,

    /// X extension to enable (repeatable)
    #[arg(long = "extension")]
    pub extensions: Vec<String>,

    /// Keep the server running when this process exits
    #[arg(long, action)]
    pub keep: bool,
}

impl DisplayArgs {
    /// Apply command line overrides on top of the loaded config
    pub fn apply(&self, display: &mut config::DisplayConfig) {
        if let Some(n) = self.display {
            display.display = Some(n);
        }
        if self.autopick {
            display.autopick = Some(true);
        }
        if self.no_reuse {
            display.reuse = false;
        }
        if let Some(ref dims) = self.dimensions {
            display.dimensions = dims.clone();
        }
        if let Some(timeout) = self.launch_timeout {
            display.launch_timeout_secs = timeout;
        }
        if !self.extensions.is_empty() {
            display.extensions.extend(self.extensions.iter().cloned());
        }
        if self.keep {
            display.destroy_at_exit = false;
        }
    }
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }
}
