//! Error types for the retry module.

use thiserror::Error;

/// Terminal failure of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError {
    /// Every allowed attempt failed.
    #[error("{description} failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        description: String,
        attempts: u32,
        last_error: String,
        #[source]
        source: std::io::Error,
    },
}

impl RetryError {
    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// Kind of the last underlying I/O error.
    pub fn kind(&self) -> std::io::ErrorKind {
        match self {
            Self::Exhausted { source, .. } => source.kind(),
        }
    }
}
