//! Crash-safe persisted checkpoint state.
//!
//! The state file is a JSON [`CheckpointRecord`] accompanied by two sidecars:
//! `<file>.bak` (the previous good snapshot) and `<file>.sha256` (checksum of
//! the current snapshot). Writes go to a temp file that is renamed into
//! place, so a crash leaves either the old or the new snapshot, never a torn
//! one. Loading never fails on bad content: a corrupt snapshot falls back to
//! the backup, and if that is unusable too the corrupt file is quarantined and
//! an empty record is returned.
//!
//! The primary file is exclusively locked for the whole run so a second
//! invocation against the same state path fails fast instead of corrupting it.

mod config;
mod error;
mod lock;
mod store;
mod types;

pub use config::StateConfig;
pub use error::StateError;
pub use lock::StateLock;
pub use store::{LoadSource, StateStore};
pub use types::CheckpointRecord;
