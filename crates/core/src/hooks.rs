//! External cleanup programs run after a completed distribution.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, ExitStatus};
use tracing::{info, warn};

/// Placeholder replaced with the target root in hook arguments.
pub const TARGET_PLACEHOLDER: &str = "{target}";

/// Commands for the duplicate-file and empty-folder cleanup collaborators.
///
/// Each command is an argv list; an empty list disables the step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default)]
    pub duplicate_files: Vec<String>,

    #[serde(default)]
    pub empty_folders: Vec<String>,
}

/// How one hook ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookOutcome {
    pub name: &'static str,
    pub status: HookStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookStatus {
    Succeeded,
    Failed(Option<i32>),
    NotStarted(String),
}

impl HookOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == HookStatus::Succeeded
    }
}

fn run_hook(name: &'static str, argv: &[String], target: &Path) -> Option<HookOutcome> {
    let (program, args) = argv.split_first()?;
    let target = target.to_string_lossy();
    let args: Vec<String> = args
        .iter()
        .map(|a| a.replace(TARGET_PLACEHOLDER, &target))
        .collect();

    info!("Running {} cleanup: {} {}", name, program, args.join(" "));
    let status = match Command::new(program).args(&args).status() {
        Ok(status) => classify(status),
        Err(e) => HookStatus::NotStarted(e.to_string()),
    };

    match &status {
        HookStatus::Succeeded => info!("{} cleanup finished", name),
        HookStatus::Failed(code) => warn!("{} cleanup exited with {:?}", name, code),
        HookStatus::NotStarted(e) => warn!("{} cleanup could not start: {}", name, e),
    }
    Some(HookOutcome { name, status })
}

fn classify(status: ExitStatus) -> HookStatus {
    if status.success() {
        HookStatus::Succeeded
    } else {
        HookStatus::Failed(status.code())
    }
}

/// Runs the configured cleanup programs against `target`, duplicates first.
pub fn run_post_hooks(config: &CleanupConfig, target: &Path) -> Vec<HookOutcome> {
    [
        run_hook("duplicate-file", &config.duplicate_files, target),
        run_hook("empty-folder", &config.empty_folders, target),
    ]
    .into_iter()
    .flatten()
    .collect()
}
