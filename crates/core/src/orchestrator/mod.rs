//! Distribution orchestrator.
//!
//! The orchestrator drives a run through its phases and checkpoints after each:
//! - **Prepare**: target created, partial copies from a crash swept
//! - **Copy**: source files placed in batches, originals disposed per delete mode
//! - **Organize**: redistribution plus the optional consolidate/rebalance/randomize pass
//! - **Finish**: count reconciliation, deferred deletions, state cleanup

mod config;
mod phase;
mod runner;
mod types;

pub use config::{DeleteMode, DeletionGate, DistributionConfig, DistributionMode};
pub use phase::Phase;
pub use runner::Distributor;
pub use types::{DeletionStatus, OrchestratorError, RunSummary};
