//! Retry/backoff executor used for every filesystem mutation.
//!
//! Operations are retried with exponential backoff capped at a ceiling.
//! A "not found" failure is never retried: the target vanished, so the
//! operation is reported as skipped and the caller moves on.
//!
//! # Example
//!
//! ```ignore
//! use fanout_core::retry::{RetryConfig, RetryExecutor, RetryOutcome};
//!
//! let executor = RetryExecutor::new(RetryConfig::default());
//! match executor.execute(&mut ctx, "delete old.jpg", || std::fs::remove_file("old.jpg"))? {
//!     RetryOutcome::Completed(()) => println!("deleted"),
//!     RetryOutcome::Skipped => println!("already gone"),
//! }
//! ```

mod config;
mod error;
mod executor;

pub use config::RetryConfig;
pub use error::RetryError;
pub use executor::{backoff_delay, RetryExecutor, RetryOutcome, Sleeper, ThreadSleeper};
