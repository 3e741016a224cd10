//! Deferred deletion of copied originals.
//!
//! When the delete mode is `EndOfScript`, originals are not removed right
//! after their copy succeeds. Instead an entry is queued with the file's size
//! and modification time, and the queue is drained once the whole run is
//! done. An entry is only acted on if it belongs to the current session and
//! the file on disk still matches what was captured at queue time.

mod queue;
mod types;

pub use queue::DeletionQueue;
pub use types::{DeletionEntry, DrainReport, DrainVerdict};
