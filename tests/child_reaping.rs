//! Servers we start and then abandon or stop must not linger as zombies.
//!
//! Kept in its own test binary so no other test's children show up in the
//! zombie scan.
#![cfg(target_os = "linux")]

mod common;

use common::{dead_pid, zombie_children, Sandbox, FAKE_XVFB};
use headless_display::process::pidfile;
use std::thread;
use std::time::{Duration, Instant};

fn settle<F: Fn() -> bool>(done: F) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(5) {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    done()
}

#[test]
fn abandoned_and_stopped_servers_are_collected() {
    let sandbox = Sandbox::new();
    let script = sandbox.install("Xvfb", FAKE_XVFB);
    assert_eq!(zombie_children(), Vec::<u32>::new());

    // :70 looks free but its server cannot claim the lock, so it loses
    pidfile::write_pid(&sandbox.lock(70), dead_pid()).expect("stale lock");
    let mut headless = sandbox.acquire(sandbox.options(&script, 70)).expect("acquire");
    assert_eq!(headless.display(), 71);
    assert_eq!(zombie_children(), Vec::<u32>::new(), "lost launch left behind");

    // No-wait teardown still collects the server once it exits
    headless.begin_use();
    headless.end_use();
    assert!(settle(|| !headless.is_running()));
    assert!(settle(|| zombie_children().is_empty()), "stopped server left behind: {:?}", zombie_children());

    // A server that dies without removing its lock leaves the display free
    let crashed = sandbox.acquire(sandbox.options(&script, 80)).expect("acquire");
    let pid = crashed.pid().expect("pid");
    unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
    assert!(settle(|| !crashed.is_running()), "dead server still reported running");
    assert!(sandbox.lock(80).exists());
    assert_eq!(zombie_children(), Vec::<u32>::new());

    // the stale lock keeps the fake server from claiming :80 itself
    let mut again = sandbox.acquire(sandbox.options(&script, 80)).expect("acquire");
    assert_eq!(again.display(), 81);
    again.end_use_and_wait();
    assert_eq!(zombie_children(), Vec::<u32>::new());
}
