//! Environment variable bindings used to point X clients at a display.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::env;

/// Variable X clients read to find their server
pub const DISPLAY_VAR: &str = "DISPLAY";

/// Get/set access to a process-wide environment.
pub trait EnvironmentBinding: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Set `key`, or unset it when `value` is `None`.
    fn set(&self, key: &str, value: Option<&str>);
}

/// The real process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

impl EnvironmentBinding for ProcessEnvironment {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn set(&self, key: &str, value: Option<&str>) {
        match value {
            Some(value) => env::set_var(key, value),
            None => env::remove_var(key),
        }
    }
}

/// In-memory environment, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryEnvironment {
    vars: Mutex<HashMap<String, String>>,
}

impl MemoryEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(key: &str, value: &str) -> Self {
        let env = Self::new();
        env.set(key, Some(value));
        env
    }
}

impl EnvironmentBinding for MemoryEnvironment {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Option<&str>) {
        let mut vars = self.vars.lock();
        match value {
            Some(value) => {
                vars.insert(key.to_string(), value.to_string());
            }
            None => {
                vars.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_environment_set_and_unset() {
        let env = MemoryEnvironment::with_var(DISPLAY_VAR, ":0");
        assert_eq!(env.get(DISPLAY_VAR).as_deref(), Some(":0"));

        env.set(DISPLAY_VAR, Some(":99"));
        assert_eq!(env.get(DISPLAY_VAR).as_deref(), Some(":99"));

        env.set(DISPLAY_VAR, None);
        assert_eq!(env.get(DISPLAY_VAR), None);
    }

    #[test]
    fn process_environment_round_trips() {
        let key = "HEADLESS_DISPLAY_ENV_TEST";
        let env = ProcessEnvironment;
        env.set(key, Some("value"));
        assert_eq!(env.get(key).as_deref(), Some("value"));
        env.set(key, None);
        assert_eq!(env.get(key), None);
    }
}
