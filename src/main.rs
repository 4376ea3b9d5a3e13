//! headless-display - Main entry point
//!
//! Runs a command against a throwaway Xvfb display, or manages displays
//! left running by `start`.

mod args;

use args::{Args, Command};
use clap::Parser;
use headless_display::config::Config;
use headless_display::display::{lock_path, Backends};
use headless_display::env::MemoryEnvironment;
use headless_display::process::{KillOptions, ProcessRegistry, UnixRegistry};
use headless_display::{take_screenshot, DisplayOptions, Headless};
use log::{debug, error, info, warn};
use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    let loaded = args.load_config();
    let mut config = match &loaded {
        Ok(cfg) => cfg.clone(),
        Err(_) => Config::default(),
    };

    // HEADLESS_LOG wins, then --verbose, then the config file
    let log_level = if args.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("HEADLESS_LOG").unwrap_or(log_level))
        .init();

    match loaded {
        Ok(_) => debug!("Loaded configuration from {:?}", args.config),
        Err(e) => warn!("Failed to load config: {}, using defaults", e),
    }

    match args.command {
        Command::Run { display, command } => {
            display.apply(&mut config.display);
            let options = display_options(&config)?;
            let code = run_command(options, command).await?;
            std::process::exit(code);
        }
        Command::Start { display } => {
            display.apply(&mut config.display);
            let options = display_options(&config)?;
            let headless = Headless::acquire(options)?;
            info!(
                "Display {} is {}",
                headless.display_name(),
                if headless.was_launched() { "running" } else { "already running" }
            );
            println!("{}", headless.display());
        }
        Command::Stop { display, wait } => {
            let lock = lock_path(&config.display.lock_dir, display);
            UnixRegistry.kill(
                &lock,
                KillOptions {
                    wait,
                    preserve_pid_file: true,
                },
            );
            info!("Stopped display :{}", display);
        }
        Command::Status { display, json } => {
            let lock = lock_path(&config.display.lock_dir, display);
            let pid = UnixRegistry.running_pid(&lock)?;
            if json {
                let status = serde_json::json!({
                    "display": display,
                    "running": pid.is_some(),
                    "pid": pid,
                    "lock_file": lock,
                });
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                match pid {
                    Some(pid) => println!(":{} running (pid {})", display, pid),
                    None => println!(":{} not running", display),
                }
            }
        }
        Command::Screenshot { display, path, using } => {
            let tool = using.unwrap_or(config.screenshot.using);
            take_screenshot(display, &path, tool)?;
        }
    }

    Ok(())
}

/// Validate the merged configuration and resolve display options
fn display_options(config: &Config) -> Result<DisplayOptions, Box<dyn std::error::Error>> {
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }
    Ok(DisplayOptions::from_config(&config.display)?.with_video(config.video.clone()))
}

/// Run `command` with DISPLAY pointing at a fresh display; returns its exit code.
async fn run_command(options: DisplayOptions, command: Vec<OsString>) -> Result<i32, Box<dyn std::error::Error>> {
    let mut headless = Headless::acquire_with(options, command_backends())?;
    headless.begin_use();
    info!("Using display: {}", headless.display_name());

    let Some((program, rest)) = command.split_first() else {
        headless.end_use();
        return Err("no command given".into());
    };

    let mut child = match tokio::process::Command::new(program)
        .args(rest)
        .env("DISPLAY", headless.display_name())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            headless.end_use_and_wait();
            return Err(format!("failed to run {:?}: {}", program, e).into());
        }
    };

    let mut terminate = unix_signal(SignalKind::terminate())?;

    let code = tokio::select! {
        status = child.wait() => {
            let status = status?;
            debug!("{:?} finished with {}", program, status);
            exit_code(status)
        }
        _ = signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            let _ = child.start_kill();
            let _ = child.wait().await;
            128 + libc::SIGINT
        }
        _ = terminate.recv() => {
            info!("Shutdown signal received");
            let _ = child.start_kill();
            let _ = child.wait().await;
            128 + libc::SIGTERM
        }
    };

    headless.end_use_and_wait();
    Ok(code)
}

/// Backends for `run`: DISPLAY goes to the child explicitly, so the
/// process environment is never written while tokio threads are running.
fn command_backends() -> Backends {
    Backends {
        environment: Arc::new(MemoryEnvironment::new()),
        ..Backends::default()
    }
}

/// Shell convention: signal deaths map to 128 + signal number
fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(sig)) => 128 + sig,
        (None, None) => 1,
    }
}
