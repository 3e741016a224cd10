//! Error types for the placer module.

use std::path::PathBuf;
use thiserror::Error;

use crate::retry::RetryError;

/// Errors that can occur during file placement.
///
/// Per-file failures are counted and logged by the placer and do not abort a
/// batch; these errors surface from setup steps and from single-file helpers.
#[derive(Debug, Error)]
pub enum PlacerError {
    /// The target root does not exist or cannot be resolved.
    #[error("Invalid target root {path}")]
    InvalidRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No emergency folder could be created.
    #[error("Failed to create emergency folder under {root}")]
    EmergencyFolderFailed {
        root: PathBuf,
        #[source]
        source: RetryError,
    },

    /// No collision-free destination name could be produced.
    #[error("No free destination name in {dir} after {attempts} attempts")]
    NamesExhausted { dir: PathBuf, attempts: u32 },

    /// The copy has a different length than its source.
    #[error("Size mismatch for {path}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// Checksum verification failed.
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// A retried file operation gave up.
    #[error(transparent)]
    Retry(#[from] RetryError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
