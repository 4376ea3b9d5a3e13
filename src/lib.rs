//! headless-display - Headless X display management
//!
//! Picks a free X display number, launches (or attaches to) an Xvfb server on
//! it, points `DISPLAY` at it and tears it down again, optionally at process
//! exit. Screenshots, ffmpeg recordings and a view-only VNC server can be
//! attached to the running display.

pub mod capture;
pub mod config;
pub mod display;
pub mod env;
pub mod exit_guard;
pub mod process;
pub mod vnc;

#[cfg(test)]
mod testing;

// Re-exports
pub use capture::{take_screenshot, CaptureError, ScreenshotTool, VideoRecorder};
pub use config::Config;
pub use display::{Dimensions, DisplayError, DisplayOptions, Headless};
pub use vnc::Vnc;
