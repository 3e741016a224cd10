//! Retry executor implementation.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use super::config::RetryConfig;
use super::error::RetryError;
use crate::context::RunContext;

/// Something that can block the current thread for a while.
pub trait Sleeper: Send + Sync {
    /// Blocks for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Sleeps on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Result of a retried operation that did not fail terminally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// The operation succeeded.
    Completed(T),
    /// The target path did not exist; nothing was done.
    Skipped,
}

impl<T> RetryOutcome<T> {
    /// Returns the value if the operation completed.
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Skipped => None,
        }
    }
}

/// Computes the delay before retry number `attempt` (1-based).
///
/// `min(base * 2^(attempt - 1), max)`, saturating instead of overflowing.
pub fn backoff_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(Duration::MAX).min(max)
}

/// Runs fallible I/O operations with exponential backoff.
#[derive(Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
    jitter: bool,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("config", &self.config)
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl RetryExecutor {
    /// Creates an executor that sleeps on the current thread.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(ThreadSleeper),
            jitter: false,
        }
    }

    /// Replaces the sleeper.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Scales every delay by a random factor in `[0.5, 1.0]`.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// The tuning this executor runs with.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let delay = backoff_delay(self.config.base_delay(), attempt, self.config.max_backoff());
        if self.jitter && !delay.is_zero() {
            delay.mul_f64(rand::rng().random_range(0.5..=1.0))
        } else {
            delay
        }
    }

    /// Runs `operation` until it succeeds, hits a missing path, or runs out of attempts.
    ///
    /// `NotFound` is logged as a warning on `ctx` and reported as
    /// [`RetryOutcome::Skipped`]. Any other error is retried; once
    /// `max_attempts` is reached (never, when it is 0) the last error is
    /// returned as [`RetryError::Exhausted`].
    pub fn execute<T, F>(
        &self,
        ctx: &mut RunContext,
        description: &str,
        mut operation: F,
    ) -> Result<RetryOutcome<T>, RetryError>
    where
        F: FnMut() -> io::Result<T>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match operation() {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{} succeeded after {} attempts", description, attempt);
                    }
                    return Ok(RetryOutcome::Completed(value));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    ctx.warn(format!("{}: path not found, skipping ({})", description, e));
                    return Ok(RetryOutcome::Skipped);
                }
                Err(e) => {
                    let limit = self.config.max_attempts;
                    if limit != 0 && attempt >= limit {
                        return Err(RetryError::Exhausted {
                            description: description.to_string(),
                            attempts: attempt,
                            last_error: e.to_string(),
                            source: e,
                        });
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}): {}; retrying in {:?}",
                        description, attempt, e, delay
                    );
                    self.sleeper.sleep(delay);
                }
            }
        }
    }
}
