//! Configuration for the state store.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::retry::RetryConfig;

/// Where the checkpoint lives and how hard to fight for its lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Primary state file path.
    #[serde(default = "default_state_path")]
    pub path: PathBuf,

    /// Retry tuning for acquiring the exclusive lock.
    #[serde(default = "default_lock_retry")]
    pub lock_retry: RetryConfig,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("fanout-state.json")
}

fn default_lock_retry() -> RetryConfig {
    RetryConfig {
        base_delay_secs: 1,
        max_attempts: 5,
        max_backoff_secs: 10,
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
            lock_retry: default_lock_retry(),
        }
    }
}

impl StateConfig {
    /// Config for a state file at `path` with default lock tuning.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Sets the lock retry tuning.
    pub fn with_lock_retry(mut self, retry: RetryConfig) -> Self {
        self.lock_retry = retry;
        self
    }
}
