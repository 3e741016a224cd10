//! Error types for the state store.

use std::path::PathBuf;
use thiserror::Error;

use crate::retry::RetryError;

/// Errors that can occur while persisting state.
///
/// Bad content is never an error; it is recovered from during load.
#[derive(Debug, Error)]
pub enum StateError {
    /// Another run holds the state file lock.
    #[error("state file {path} is locked by another run")]
    Locked {
        path: PathBuf,
        #[source]
        source: RetryError,
    },

    /// A path needed for the operation disappeared.
    #[error("state path vanished: {path}")]
    Vanished { path: PathBuf },

    /// Failed to serialize the record.
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A file operation failed after all retries.
    #[error(transparent)]
    Io(#[from] RetryError),
}
