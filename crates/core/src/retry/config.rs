//! Retry tuning.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Initial delay between retries in seconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,

    /// Maximum attempts, including the first (0 = unlimited).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Maximum delay between retries in seconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_base_delay() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_max_backoff() -> u64 {
    60
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: default_base_delay(),
            max_attempts: default_max_attempts(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl RetryConfig {
    /// Sets the base delay.
    pub fn with_base_delay(mut self, secs: u64) -> Self {
        self.base_delay_secs = secs;
        self
    }

    /// Sets the attempt cap (0 = unlimited).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the backoff ceiling.
    pub fn with_max_backoff(mut self, secs: u64) -> Self {
        self.max_backoff_secs = secs;
        self
    }

    /// A config that never sleeps, for tests and tight loops.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            base_delay_secs: 0,
            max_attempts,
            max_backoff_secs: 0,
        }
    }

    pub(crate) fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }

    pub(crate) fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}
