//! Distribution run driver.
//!
//! Drives the phase sequence for one invocation:
//! - Loads the checkpoint and reconciles it with the current parameters
//! - Runs every phase after the recorded one, saving after each
//! - Reconciles file counts, drains deferred deletions, clears the state

use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::config::DeleteMode;
use super::phase::Phase;
use super::types::{DeletionStatus, OrchestratorError, RunSummary};
use crate::config::{validate_config, Config};
use crate::context::RunContext;
use crate::deletion::{DeletionQueue, DrainReport};
use crate::placer::{
    is_partial, keepers_needed, list_files, list_subfolders, Disposal, FolderSet, FsPlacer,
    PlacementReport,
};
use crate::retry::{RetryExecutor, RetryOutcome};
use crate::state::{CheckpointRecord, LoadSource, StateStore};

/// Runs distributions described by a [`Config`].
pub struct Distributor {
    config: Config,
    executor: RetryExecutor,
    placer: FsPlacer,
}

impl Distributor {
    /// Creates a distributor with a placer built from the config.
    pub fn new(config: Config) -> Self {
        let executor = RetryExecutor::new(config.retry.clone());
        let placer = FsPlacer::new(config.placer.clone(), executor.clone());
        Self {
            config,
            executor,
            placer,
        }
    }

    /// Replaces the placer (seeded RNG, custom names).
    pub fn with_placer(mut self, placer: FsPlacer) -> Self {
        self.placer = placer;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs every remaining phase, then finishes the run.
    pub fn run(&mut self) -> Result<RunSummary, OrchestratorError> {
        self.run_through(Phase::Randomized)
    }

    /// Runs remaining phases up to and including `stop`.
    ///
    /// If a scheduled phase lies beyond `stop` the state is left in place and
    /// the summary reports the run as not completed; the next invocation
    /// resumes from the last recorded phase.
    pub fn run_through(&mut self, stop: Phase) -> Result<RunSummary, OrchestratorError> {
        validate_config(&self.config)?;
        let source = &self.config.distribution.source_folder;
        if !source.is_dir() {
            return Err(OrchestratorError::SourceMissing(source.clone()));
        }

        let mut ctx = RunContext::new(Uuid::new_v4().to_string());
        let mut store = StateStore::open(&self.config.state, self.executor.clone(), &mut ctx)?;
        let (record, loaded_from) = store.load_with_source(&mut ctx)?;
        match &loaded_from {
            LoadSource::Fresh => debug!("No previous state at {}", store.path().display()),
            LoadSource::Primary => debug!("Loaded state from {}", store.path().display()),
            LoadSource::Backup => info!("Recovered state from {}", store.backup_path().display()),
            LoadSource::Quarantined { moved_to } => {
                warn!("Unrecoverable state moved to {}", moved_to.display())
            }
        }

        let queue = DeletionQueue::new(ctx.session_id());
        let summary = RunSummary::new(ctx.session_id().to_string(), record.checkpoint);
        let mut run = Run {
            config: &self.config,
            executor: &self.executor,
            placer: &mut self.placer,
            store,
            record,
            queue,
            ctx,
            summary,
        };

        run.reconcile()?;
        run.save()?;

        let mode = self.config.distribution.mode();
        for phase in Phase::remaining(run.record.checkpoint, mode) {
            if phase > stop {
                info!("Stopping before phase {}", phase);
                return Ok(run.stop());
            }
            info!("Starting phase {}", phase);
            run.execute(phase)?;
            run.record.checkpoint = phase;
            run.save()?;
            run.summary.last_phase = phase;
            info!("Completed phase {}", phase);
        }

        run.finish()
    }
}

/// State of one invocation.
struct Run<'a> {
    config: &'a Config,
    executor: &'a RetryExecutor,
    placer: &'a mut FsPlacer,
    store: StateStore,
    record: CheckpointRecord,
    queue: DeletionQueue,
    ctx: RunContext,
    summary: RunSummary,
}

fn ensure_same<T: PartialEq + Debug>(
    field: &'static str,
    persisted: Option<&T>,
    requested: &T,
) -> Result<(), OrchestratorError> {
    match persisted {
        Some(persisted) if persisted != requested => Err(OrchestratorError::RestartMismatch {
            field,
            persisted: format!("{:?}", persisted),
            requested: format!("{:?}", requested),
        }),
        _ => Ok(()),
    }
}

/// Every regular file under `root`, partial copies included.
fn walk_files(root: &Path, ctx: &mut RunContext) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => ctx.warn(format!("Skipping unreadable entry: {}", e)),
        }
    }
    files
}

fn count_tree(root: &Path, ctx: &mut RunContext) -> u64 {
    walk_files(root, ctx)
        .iter()
        .filter(|p| !is_partial(p))
        .count() as u64
}

fn slot_paths(folders: &FolderSet) -> Vec<PathBuf> {
    folders.slots().iter().map(|s| s.path.clone()).collect()
}

impl Run<'_> {
    fn target(&self) -> &Path {
        &self.config.distribution.target_folder
    }

    fn limit(&self) -> usize {
        self.config.distribution.files_per_folder
    }

    /// Adopts or initializes the run identity and checks the parameters.
    fn reconcile(&mut self) -> Result<(), OrchestratorError> {
        let run = &self.config.distribution;

        if self.record.is_fresh() {
            self.record.session_id = Some(self.ctx.session_id().to_string());
            self.record.source_folder = Some(run.source_folder.clone());
            self.record.delete_mode = Some(run.delete_mode);
            self.record.max_files_to_copy = Some(run.max_files_to_copy);
            info!("Starting session {}", self.ctx.session_id());
        } else {
            ensure_same(
                "sourceFolder",
                self.record.source_folder.as_ref(),
                &run.source_folder,
            )?;
            ensure_same(
                "deleteMode",
                self.record.delete_mode.as_ref(),
                &run.delete_mode,
            )?;
            ensure_same(
                "maxFilesToCopy",
                self.record.max_files_to_copy.as_ref(),
                &run.max_files_to_copy,
            )?;

            self.record
                .source_folder
                .get_or_insert_with(|| run.source_folder.clone());
            self.record.delete_mode.get_or_insert(run.delete_mode);
            self.record
                .max_files_to_copy
                .get_or_insert(run.max_files_to_copy);

            match self.record.session_id.clone() {
                Some(session) => self.ctx.set_session_id(session),
                None => self.record.session_id = Some(self.ctx.session_id().to_string()),
            }
            self.ctx
                .merge_prior(self.record.warnings_so_far, self.record.errors_so_far);
            info!(
                "Resuming session {} after {} ({} warnings, {} errors so far)",
                self.ctx.session_id(),
                self.record.checkpoint,
                self.record.warnings_so_far,
                self.record.errors_so_far
            );
        }

        self.queue = DeletionQueue::import(
            self.ctx.session_id(),
            std::mem::take(&mut self.record.deletion_queue),
        );
        self.summary.session_id = self.ctx.session_id().to_string();
        Ok(())
    }

    /// Persists the record with the current counters and queue.
    fn save(&mut self) -> Result<(), OrchestratorError> {
        self.record.warnings_so_far = self.ctx.total_warnings();
        self.record.errors_so_far = self.ctx.total_errors();
        self.record.deletion_queue = self.queue.export();
        self.store.save(&self.record, &mut self.ctx)?;
        Ok(())
    }

    fn execute(&mut self, phase: Phase) -> Result<(), OrchestratorError> {
        match phase {
            Phase::Init => Ok(()),
            Phase::RenamePrep => self.prepare_target(),
            Phase::Enumerate => self.enumerate(),
            Phase::SubfoldersReady => self.create_subfolders(),
            Phase::SourceCopied => self.copy_from_source(),
            Phase::TargetRedistributed => self.redistribute(),
            Phase::Consolidated => self.consolidate(),
            Phase::Rebalanced => self.rebalance(),
            Phase::Randomized => self.randomize(),
        }
    }

    fn prepare_target(&mut self) -> Result<(), OrchestratorError> {
        let config = self.config;
        let target = &config.distribution.target_folder;
        let description = format!("create target {}", target.display());
        self.executor
            .execute(&mut self.ctx, &description, || fs::create_dir_all(target))?;

        let mut swept = 0;
        for partial in walk_files(target, &mut self.ctx)
            .into_iter()
            .filter(|p| is_partial(p))
        {
            let description = format!("remove partial copy {}", partial.display());
            match self
                .executor
                .execute(&mut self.ctx, &description, || fs::remove_file(&partial))
            {
                Ok(RetryOutcome::Completed(())) => swept += 1,
                Ok(RetryOutcome::Skipped) => {}
                Err(e) => self.ctx.error(e),
            }
        }
        if swept > 0 {
            info!("Removed {} partial copies from an interrupted run", swept);
        }
        Ok(())
    }

    fn enumerate(&mut self) -> Result<(), OrchestratorError> {
        let config = self.config;
        let run = &config.distribution;

        let mut files: Vec<PathBuf> = walk_files(&run.source_folder, &mut self.ctx)
            .into_iter()
            .filter(|p| !is_partial(p))
            .collect();
        files.sort();
        let found = files.len();
        if run.max_files_to_copy > 0 {
            files.truncate(usize::try_from(run.max_files_to_copy).unwrap_or(usize::MAX));
        }

        let in_target = count_tree(&run.target_folder, &mut self.ctx);
        info!(
            "Selected {} of {} source files; {} files already in target",
            files.len(),
            found,
            in_target
        );

        self.record.initial_source_count = Some(files.len() as u64);
        self.record.initial_target_count = Some(in_target);
        self.record.source_files = files;
        Ok(())
    }

    fn expected_total(&self) -> u64 {
        self.record.initial_source_count.unwrap_or(0) + self.record.initial_target_count.unwrap_or(0)
    }

    fn create_subfolders(&mut self) -> Result<(), OrchestratorError> {
        let config = self.config;
        let target = &config.distribution.target_folder;
        let limit = self.limit();
        let total = usize::try_from(self.expected_total()).unwrap_or(usize::MAX);
        let needed = keepers_needed(total, limit);

        let existing = list_subfolders(target)?;
        let mut folders = self
            .placer
            .prepare_folders(target, &existing, limit, &mut self.ctx)?;
        let before = folders.len();
        while folders.len() < needed {
            self.placer.create_folder(&mut folders, limit, &mut self.ctx)?;
        }
        info!(
            "{} target folders ready for {} files ({} created)",
            folders.len(),
            total,
            folders.len() - before
        );

        self.record.target_subfolders = slot_paths(&folders);
        Ok(())
    }

    fn copy_from_source(&mut self) -> Result<(), OrchestratorError> {
        let config = self.config;
        let target = &config.distribution.target_folder;
        let limit = self.limit();
        let mode = config.distribution.delete_mode;

        let candidates = self.record.target_subfolders.clone();
        let mut folders = self
            .placer
            .prepare_folders(target, &candidates, limit, &mut self.ctx)?;

        // A batch cut short keeps its destinations, so no file is copied twice.
        let interrupted = self.placer.reserve(
            std::mem::take(&mut self.record.planned_copies),
            &mut folders,
        );
        let resumed: HashSet<PathBuf> = interrupted.iter().map(|c| c.source.clone()).collect();
        if !interrupted.is_empty() {
            info!("Finishing {} copies of an interrupted batch", interrupted.len());
            let mut disposal = Disposal::for_mode(mode, &mut self.queue);
            let report =
                self.placer
                    .execute_plan(&interrupted, &mut folders, &mut disposal, &mut self.ctx);
            self.summary.copied.absorb(&report);
            self.record.target_subfolders = slot_paths(&folders);
            self.save()?;
        }

        let pending: Vec<PathBuf> = self
            .record
            .source_files
            .iter()
            .filter(|f| !resumed.contains(*f) && !self.queue.contains(f) && f.is_file())
            .cloned()
            .collect();
        let done = self.record.source_files.len() - pending.len();
        if done > 0 {
            info!("{} selected files already handled by an earlier attempt", done);
        }

        let batch = config.placer.checkpoint_batch_size.max(1);
        for chunk in pending.chunks(batch) {
            let plan = self.placer.plan(chunk, &mut folders, &mut self.ctx);
            self.summary.copied.requested += plan.unassigned;
            self.summary.copied.failed += plan.unassigned;
            self.record.planned_copies = plan.copies;
            self.record.target_subfolders = slot_paths(&folders);
            self.save()?;

            let copies = std::mem::take(&mut self.record.planned_copies);
            let mut disposal = Disposal::for_mode(mode, &mut self.queue);
            let report = self
                .placer
                .execute_plan(&copies, &mut folders, &mut disposal, &mut self.ctx);
            self.summary.copied.absorb(&report);
            self.record.target_subfolders = slot_paths(&folders);
            self.save()?;
        }
        Ok(())
    }

    fn redistribute(&mut self) -> Result<(), OrchestratorError> {
        let config = self.config;
        let target = &config.distribution.target_folder;
        let limit = self.limit();

        let existing = list_subfolders(target)?;
        let mut folders = self
            .placer
            .prepare_folders(target, &existing, limit, &mut self.ctx)?;
        let mut movers = list_files(folders.root())?;
        let total = folders.total_files() + movers.len();
        while folders.len() < keepers_needed(total, limit) {
            self.placer.create_folder(&mut folders, limit, &mut self.ctx)?;
        }

        for index in 0..folders.len() {
            let slot = folders.slot(index);
            if slot.count <= limit {
                continue;
            }
            let surplus = slot.count - limit;
            let dir = slot.path.clone();
            match list_files(&dir) {
                Ok(mut files) => {
                    files.shuffle(self.placer.rng());
                    files.truncate(surplus);
                    movers.extend(files);
                }
                Err(e) => self
                    .ctx
                    .warn(format!("Cannot list {}: {}", dir.display(), e)),
            }
        }

        let report = if movers.is_empty() {
            PlacementReport::default()
        } else {
            info!("Redistributing {} files within the target", movers.len());
            self.placer.relocate(&movers, &mut folders, &mut self.ctx)
        };
        self.summary.redistributed = Some(report);
        self.record.target_subfolders = slot_paths(&folders);
        Ok(())
    }

    fn current_folders(&mut self) -> Result<FolderSet, OrchestratorError> {
        let config = self.config;
        let target = &config.distribution.target_folder;
        let limit = self.limit();
        let existing = list_subfolders(target)?;
        Ok(self
            .placer
            .prepare_folders(target, &existing, limit, &mut self.ctx)?)
    }

    fn consolidate(&mut self) -> Result<(), OrchestratorError> {
        let folders = self.current_folders()?;
        let stray = list_files(folders.root())?;
        let limit = self.limit();
        let report = self
            .placer
            .consolidate(&folders, &stray, limit, &mut self.ctx);
        self.summary.consolidation = Some(report);
        self.record.target_subfolders = list_subfolders(self.target())?;
        Ok(())
    }

    fn rebalance(&mut self) -> Result<(), OrchestratorError> {
        let mut folders = self.current_folders()?;
        let tolerance = self.config.distribution.rebalance_tolerance_pct;
        let report = self.placer.rebalance(&mut folders, tolerance, &mut self.ctx);
        self.summary.rebalance = Some(report);
        Ok(())
    }

    fn randomize(&mut self) -> Result<(), OrchestratorError> {
        let mut folders = self.current_folders()?;
        let report = self.placer.randomize(&mut folders, &mut self.ctx);
        self.summary.randomize = Some(report);
        Ok(())
    }

    /// Summary for a run halted before its last phase.
    fn stop(mut self) -> RunSummary {
        self.summary.completed = false;
        self.summary.warnings = self.ctx.total_warnings();
        self.summary.errors = self.ctx.total_errors();
        self.summary
    }

    /// Compares the target file count with what the run started from.
    fn reconcile_counts(&mut self) {
        let expected = self.expected_total();
        let config = self.config;
        let actual = count_tree(&config.distribution.target_folder, &mut self.ctx);
        self.summary.expected_files = Some(expected);
        self.summary.final_files = Some(actual);
        if actual == expected {
            info!("Target holds {} files as expected", actual);
        } else {
            self.summary.discrepancy = true;
            self.ctx.warn(format!(
                "File count discrepancy: expected {} files in target, found {}",
                expected, actual
            ));
        }
    }

    /// Drains the deferred queue if the gate permits. Returns whether state must be kept.
    fn drain_deferred(&mut self) -> bool {
        let run = &self.config.distribution;
        if run.delete_mode != DeleteMode::EndOfScript {
            self.summary.deletion = Some(DeletionStatus::NotDeferred);
            return false;
        }
        if self.queue.is_empty() {
            self.summary.deletion = Some(DeletionStatus::Drained(DrainReport::default()));
            return false;
        }

        let gate = run.end_of_script_deletion_condition;
        let (warnings, errors) = (self.ctx.total_warnings(), self.ctx.total_errors());
        if !gate.permits(warnings, errors) {
            warn!(
                "Skipping deletion of {} queued originals: {:?} not met ({} warnings, {} errors)",
                self.queue.len(),
                gate,
                warnings,
                errors
            );
            self.summary.deletion = Some(DeletionStatus::GateNotMet {
                queued: self.queue.len(),
            });
            return true;
        }

        let report = self.queue.execute(self.executor, &mut self.ctx);
        self.summary.deletion = Some(DeletionStatus::Drained(report));
        !self.queue.is_empty()
    }

    /// Final reconciliation, deferred deletion and state cleanup.
    fn finish(mut self) -> Result<RunSummary, OrchestratorError> {
        self.summary.completed = true;
        self.reconcile_counts();
        let keep_state = self.drain_deferred();

        if keep_state {
            self.save()?;
            info!(
                "Keeping state at {} with {} queued deletions",
                self.store.path().display(),
                self.queue.len()
            );
        } else {
            let Run {
                store,
                mut ctx,
                mut summary,
                ..
            } = self;
            store.clear(&mut ctx)?;
            summary.state_cleared = true;
            summary.warnings = ctx.total_warnings();
            summary.errors = ctx.total_errors();
            return Ok(summary);
        }

        self.summary.warnings = self.ctx.total_warnings();
        self.summary.errors = self.ctx.total_errors();
        Ok(self.summary)
    }
}
