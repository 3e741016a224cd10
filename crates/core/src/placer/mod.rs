//! Placer module for copying and moving files into target subfolders.
//!
//! The [`FsPlacer`] owns the folder-choice RNG, the destination name source
//! and a [`RetryExecutor`](crate::retry::RetryExecutor) that wraps every
//! mutating file system call.
//!
//! # Features
//!
//! - Weighted random folder choice, favouring folders with more headroom
//! - Destinations planned per batch, so an interrupted batch resumes in place
//! - Copy to a hidden partial file, verify, then rename into place
//! - Optional SHA-256 verification of every copy
//! - Emergency folder creation when no target folder is usable
//! - Rebalancing, consolidation and randomization of an existing target
//!
//! # Example
//!
//! ```ignore
//! use fanout_core::placer::{Disposal, FsPlacer, PlacerConfig};
//! use fanout_core::retry::{RetryConfig, RetryExecutor};
//!
//! let mut placer = FsPlacer::new(PlacerConfig::default(), RetryExecutor::new(RetryConfig::default()));
//! let mut folders = placer.prepare_folders(&target, &subfolders, 20_000, &mut ctx)?;
//! let plan = placer.plan(&sources, &mut folders, &mut ctx);
//! let report = placer.execute_plan(&plan.copies, &mut folders, &mut Disposal::Recycle, &mut ctx);
//! println!("Placed {} files ({} bytes)", report.placed, report.bytes);
//! ```

mod config;
mod consolidate;
mod error;
mod folders;
mod fs_placer;
mod naming;
mod randomize;
mod rebalance;
mod types;

pub use config::PlacerConfig;
pub use consolidate::{keepers_needed, select_keepers};
pub use error::PlacerError;
pub use folders::{
    count_files, is_partial, list_files, list_subfolders, next_folder_name, partial_path,
    FolderSet, FolderSlot, PARTIAL_SUFFIX,
};
pub use fs_placer::FsPlacer;
pub use naming::{preserve_or_rename, unique_destination, NameProvider, RandomNameProvider};
pub use randomize::round_robin;
pub use rebalance::{plan_rebalance, tolerance_bounds, PlannedMove, RebalancePlan};
pub use types::{
    ConsolidationReport, CopyPlan, Disposal, PlacementReport, PlannedCopy, RandomizeReport,
    RebalanceOutcome, RebalanceReport,
};
