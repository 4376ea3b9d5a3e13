// In-memory process registry and launcher for exercising the display logic

use crate::process::{CommandSpec, KillOptions, Launcher, ProcessError, ProcessRegistry, Result, RunningProcess};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What a fake Xvfb does while it is being polled
#[derive(Debug, Clone)]
pub enum Script {
    /// Writes its own pid into the lock file on the `polls`-th poll
    Registers { polls: usize },
    /// Prints `text` on stderr and exits
    Says(String),
    /// Another process grabs the lock file right after we spawn
    Usurped { other: u32 },
    /// Never does anything
    Hangs,
    /// Exits silently
    Dies,
}

#[derive(Default)]
struct World {
    lock_dir: PathBuf,
    pid_files: HashMap<PathBuf, u32>,
    alive: HashSet<u32>,
    mine: HashSet<u32>,
    inaccessible: HashSet<PathBuf>,
    scripts: VecDeque<Script>,
    launched: Vec<CommandSpec>,
    kills: Vec<(PathBuf, KillOptions)>,
    /// Launched pids that were terminated and collected
    collected: Vec<u32>,
    next_pid: u32,
}

/// Shared fake OS state
#[derive(Clone)]
pub struct FakeSystem {
    world: Arc<Mutex<World>>,
}

impl FakeSystem {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        let world = World {
            lock_dir: lock_dir.into(),
            ..World::default()
        };
        Self {
            world: Arc::new(Mutex::new(world)),
        }
    }

    pub fn registry(&self) -> FakeRegistry {
        FakeRegistry {
            world: self.world.clone(),
        }
    }

    pub fn launcher(&self) -> FakeLauncher {
        FakeLauncher {
            world: self.world.clone(),
        }
    }

    pub fn lock_path(&self, n: u32) -> PathBuf {
        crate::display::lock_path(&self.world.lock().lock_dir, n)
    }

    /// A live Xvfb `pid` holds display `n`
    pub fn occupy(&self, n: u32, pid: u32, mine: bool) {
        let lock = self.lock_path(n);
        let mut world = self.world.lock();
        world.pid_files.insert(lock, pid);
        world.alive.insert(pid);
        if mine {
            world.mine.insert(pid);
        }
    }

    /// Lock file for `n` names a process that no longer exists
    pub fn stale(&self, n: u32, pid: u32) {
        let lock = self.lock_path(n);
        self.world.lock().pid_files.insert(lock, pid);
    }

    pub fn make_inaccessible(&self, n: u32) {
        let lock = self.lock_path(n);
        self.world.lock().inaccessible.insert(lock);
    }

    /// The process dies on its own, leaving its lock file behind
    pub fn crash(&self, pid: u32) {
        self.world.lock().alive.remove(&pid);
    }

    pub fn script(&self, script: Script) {
        self.world.lock().scripts.push_back(script);
    }

    pub fn launches(&self) -> Vec<String> {
        self.world.lock().launched.iter().map(|s| s.to_string()).collect()
    }

    pub fn kills(&self) -> Vec<(PathBuf, KillOptions)> {
        self.world.lock().kills.clone()
    }

    pub fn collected(&self) -> Vec<u32> {
        self.world.lock().collected.clone()
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.world.lock().alive.contains(&pid)
    }
}

pub struct FakeRegistry {
    world: Arc<Mutex<World>>,
}

impl ProcessRegistry for FakeRegistry {
    fn read_pid(&self, path: &Path) -> Result<Option<u32>> {
        let world = self.world.lock();
        if world.inaccessible.contains(path) {
            return Err(ProcessError::PermissionDenied(path.display().to_string()));
        }
        Ok(world.pid_files.get(path).copied())
    }

    fn is_alive(&self, pid: u32) -> Result<bool> {
        Ok(self.world.lock().alive.contains(&pid))
    }

    fn is_mine(&self, pid: u32) -> bool {
        self.world.lock().mine.contains(&pid)
    }

    fn kill(&self, pid_file: &Path, options: KillOptions) {
        let mut world = self.world.lock();
        world.kills.push((pid_file.to_path_buf(), options));
        if let Some(pid) = world.pid_files.get(pid_file).copied() {
            world.alive.remove(&pid);
            // Xvfb cleans up its own lock file on SIGTERM
            world.pid_files.remove(pid_file);
        }
    }

    fn spawn_tracked(&self, spec: &CommandSpec, pid_file: &Path, _log_file: &Path) -> Result<u32> {
        let mut world = self.world.lock();
        world.launched.push(spec.clone());
        world.next_pid += 1;
        let pid = 7000 + world.next_pid;
        world.alive.insert(pid);
        world.mine.insert(pid);
        world.pid_files.insert(pid_file.to_path_buf(), pid);
        Ok(pid)
    }
}

pub struct FakeLauncher {
    world: Arc<Mutex<World>>,
}

impl Launcher for FakeLauncher {
    fn launch(&self, spec: &CommandSpec) -> Result<Box<dyn RunningProcess>> {
        let mut world = self.world.lock();
        world.launched.push(spec.clone());
        world.next_pid += 1;
        let pid = 5000 + world.next_pid;
        world.alive.insert(pid);
        world.mine.insert(pid);
        let script = world
            .scripts
            .pop_front()
            .unwrap_or(Script::Registers { polls: 1 });

        let display: u32 = spec
            .args
            .first()
            .and_then(|a| a.to_str())
            .and_then(|a| a.trim_start_matches(':').parse().ok())
            .expect("Xvfb command starts with :N");
        let lock = crate::display::lock_path(&world.lock_dir, display);

        if let Script::Usurped { other } = script {
            world.pid_files.insert(lock.clone(), other);
            world.alive.insert(other);
        }

        Ok(Box::new(FakeProcess {
            world: self.world.clone(),
            pid,
            lock,
            script,
            polls: 0,
            exited: false,
        }))
    }
}

struct FakeProcess {
    world: Arc<Mutex<World>>,
    pid: u32,
    lock: PathBuf,
    script: Script,
    polls: usize,
    exited: bool,
}

impl RunningProcess for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn read_diagnostics(&mut self) -> String {
        self.polls += 1;
        match &self.script {
            Script::Registers { polls } if self.polls >= *polls => {
                self.world.lock().pid_files.insert(self.lock.clone(), self.pid);
                String::new()
            }
            Script::Says(text) if !self.exited => {
                self.exited = true;
                self.world.lock().alive.remove(&self.pid);
                text.clone()
            }
            Script::Dies => {
                self.exited = true;
                self.world.lock().alive.remove(&self.pid);
                String::new()
            }
            _ => String::new(),
        }
    }

    fn has_exited(&mut self) -> bool {
        self.exited
    }

    fn terminate(&mut self) {
        self.exited = true;
        let mut world = self.world.lock();
        world.alive.remove(&self.pid);
        world.collected.push(self.pid);
    }
}
