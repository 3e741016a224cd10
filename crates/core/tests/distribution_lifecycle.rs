//! Distribution lifecycle integration tests.
//!
//! These tests drive complete runs against temporary trees:
//! init -> enumerate -> copy -> redistribute -> optional pass -> finish

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;
use walkdir::WalkDir;

use fanout_core::{
    orchestrator::{DeleteMode, DeletionGate, DistributionConfig, DistributionMode},
    placer::{
        list_files, list_subfolders, partial_path, FsPlacer, PlacerConfig, PlannedCopy,
        RandomNameProvider, RebalanceOutcome,
    },
    state::StateError,
    Config, DeletionStatus, Distributor, OrchestratorError, Phase, RetryConfig, RetryExecutor,
    RunContext, StateConfig, StateStore,
};

/// Temporary source, target and state locations.
struct TestHarness {
    source: PathBuf,
    target: PathBuf,
    state: PathBuf,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let source = temp_dir.path().join("source");
        let target = temp_dir.path().join("target");
        fs::create_dir_all(&source).expect("Failed to create source");
        Self {
            source,
            target,
            state: temp_dir.path().join("state").join("fanout.json"),
            _temp_dir: temp_dir,
        }
    }

    /// Writes `count` distinct files spread over a few nested source folders.
    fn seed_source(&self, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let dir = self.source.join(format!("album{}", i % 3));
                fs::create_dir_all(&dir).unwrap();
                let path = dir.join(format!("photo{:04}.jpg", i));
                fs::write(&path, format!("photo {} contents", i)).unwrap();
                path
            })
            .collect()
    }

    /// Creates numbered target folders holding `counts[i]` files each.
    fn seed_target(&self, counts: &[usize]) {
        for (i, count) in counts.iter().enumerate() {
            let dir = self.target.join((i + 1).to_string());
            fs::create_dir_all(&dir).unwrap();
            for j in 0..*count {
                fs::write(dir.join(format!("t{}_{}.png", i, j)), format!("{}-{}", i, j)).unwrap();
            }
        }
    }

    fn config(&self, limit: usize, mode: DeleteMode) -> Config {
        let mut config = Config::new(
            DistributionConfig::new(&self.source, &self.target)
                .with_files_per_folder(limit)
                .with_delete_mode(mode),
        );
        config.retry = RetryConfig::immediate(2);
        config.state = StateConfig::at(&self.state).with_lock_retry(RetryConfig::immediate(1));
        config.placer = PlacerConfig::default()
            .with_batch_size(7)
            .with_checksum_verification(true);
        config
    }

    fn distributor(&self, config: Config, seed: u64) -> Distributor {
        let placer = FsPlacer::new(
            config.placer.clone(),
            RetryExecutor::new(config.retry.clone()),
        )
        .with_rng(StdRng::seed_from_u64(seed))
        .with_name_provider(Box::new(RandomNameProvider::seeded(seed)));
        Distributor::new(config).with_placer(placer)
    }

    fn folder_counts(&self) -> Vec<usize> {
        list_subfolders(&self.target)
            .unwrap()
            .iter()
            .map(|dir| list_files(dir).unwrap().len())
            .collect()
    }

    fn files_under(root: &Path) -> usize {
        WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }
}

#[test]
fn test_every_folder_respects_the_limit() {
    let harness = TestHarness::new();
    harness.seed_source(53);
    harness.seed_target(&[3]);
    fs::write(harness.target.join("loose.gif"), b"loose").unwrap();

    let config = harness.config(10, DeleteMode::Immediate);
    let summary = harness.distributor(config, 1).run().unwrap();

    assert!(summary.completed);
    assert!(summary.state_cleared);
    assert!(!summary.discrepancy);
    assert_eq!(summary.copied.placed, 53);
    assert_eq!(summary.expected_files, Some(57));
    assert_eq!(summary.final_files, Some(57));

    let counts = harness.folder_counts();
    assert_eq!(counts.iter().sum::<usize>(), 57);
    assert!(counts.iter().all(|&c| c <= 10), "counts: {:?}", counts);
    assert!(list_files(&harness.target).unwrap().is_empty());
    assert_eq!(TestHarness::files_under(&harness.source), 0);
    assert!(!harness.state.exists());
}

#[test]
fn test_resume_after_abandoned_run_is_idempotent() {
    let harness = TestHarness::new();
    harness.seed_source(20);
    let config = harness.config(6, DeleteMode::Immediate);

    let first = harness
        .distributor(config.clone(), 2)
        .run_through(Phase::SubfoldersReady)
        .unwrap();
    assert!(!first.completed);
    assert!(harness.state.exists());
    assert_eq!(first.copied.placed, 0);

    let second = harness.distributor(config.clone(), 3).run().unwrap();
    assert!(second.completed);
    assert_eq!(second.session_id, first.session_id);
    assert_eq!(second.resumed_from, Phase::SubfoldersReady);
    assert_eq!(second.copied.placed, 20);

    // Nothing is left to do on a third invocation.
    let third = harness.distributor(config, 4).run().unwrap();
    assert_eq!(third.copied.placed, 0);
    assert_eq!(harness.folder_counts().iter().sum::<usize>(), 20);
}

#[test]
fn test_copies_interrupted_mid_batch_are_not_repeated() {
    let harness = TestHarness::new();
    let originals = harness.seed_source(10);
    let config = harness.config(5, DeleteMode::EndOfScript);

    harness
        .distributor(config.clone(), 17)
        .run_through(Phase::SubfoldersReady)
        .unwrap();

    // Recreate what a kill leaves behind: the batch plan is saved, nine
    // copies have landed and the tenth is a partial file.
    {
        let mut ctx = RunContext::new("killed");
        let mut store = StateStore::open(
            &config.state,
            RetryExecutor::new(RetryConfig::immediate(1)),
            &mut ctx,
        )
        .unwrap();
        let mut record = store.load(&mut ctx).unwrap();
        assert_eq!(record.target_subfolders.len(), 2);
        record.planned_copies = originals
            .iter()
            .enumerate()
            .map(|(i, source)| PlannedCopy {
                source: source.clone(),
                destination: record.target_subfolders[i % 2].join(format!("copy{}.jpg", i)),
            })
            .collect();
        store.save(&record, &mut ctx).unwrap();

        for copy in &record.planned_copies[..9] {
            fs::copy(&copy.source, &copy.destination).unwrap();
        }
        let last = &record.planned_copies[9];
        fs::write(partial_path(&last.destination), b"photo").unwrap();
    }

    let summary = harness.distributor(config, 18).run().unwrap();

    assert!(summary.completed);
    assert_eq!(summary.copied.placed, 10);
    assert_eq!(TestHarness::files_under(&harness.target), 10);
    assert_eq!(harness.folder_counts(), vec![5, 5]);
    assert_eq!(summary.final_files, Some(10));
    assert!(!summary.discrepancy);
    match summary.deletion {
        Some(DeletionStatus::Drained(report)) => assert_eq!(report.deleted, 10),
        other => panic!("unexpected deletion status: {:?}", other),
    }
    assert!(originals.iter().all(|p| !p.exists()));
}

#[test]
fn test_overfull_target_folder_is_drained_to_the_limit() {
    let harness = TestHarness::new();
    harness.seed_target(&[25, 1]);
    let config = harness.config(10, DeleteMode::Immediate);

    let summary = harness.distributor(config, 19).run().unwrap();

    assert!(summary.completed);
    let moved = summary.redistributed.expect("redistribution report");
    assert_eq!(moved.placed, 15);
    assert_eq!(moved.failed, 0);

    let counts = harness.folder_counts();
    assert_eq!(counts.len(), 3, "counts: {:?}", counts);
    assert_eq!(counts[0], 10);
    assert!(counts.iter().all(|&c| c <= 10), "counts: {:?}", counts);
    assert_eq!(counts.iter().sum::<usize>(), 26);
    assert!(!summary.discrepancy);
}

#[test]
fn test_deferred_deletion_removes_originals_at_the_end() {
    let harness = TestHarness::new();
    let originals = harness.seed_source(12);
    let config = harness.config(5, DeleteMode::EndOfScript);

    let summary = harness.distributor(config, 5).run().unwrap();

    match summary.deletion {
        Some(DeletionStatus::Drained(report)) => {
            assert_eq!(report.deleted, 12);
            assert_eq!(report.retained(), 0);
        }
        other => panic!("unexpected deletion status: {:?}", other),
    }
    assert!(originals.iter().all(|p| !p.exists()));
    assert!(summary.state_cleared);
}

#[test]
fn test_modified_original_is_never_deleted() {
    let harness = TestHarness::new();
    let originals = harness.seed_source(8);
    let config = harness.config(5, DeleteMode::EndOfScript);

    harness
        .distributor(config.clone(), 6)
        .run_through(Phase::SourceCopied)
        .unwrap();
    assert!(originals.iter().all(|p| p.exists()));

    fs::write(&originals[3], b"edited after it was copied").unwrap();

    let summary = harness.distributor(config, 7).run().unwrap();
    match summary.deletion {
        Some(DeletionStatus::Drained(report)) => {
            assert_eq!(report.deleted, 7);
            assert_eq!(report.modified, 1);
        }
        other => panic!("unexpected deletion status: {:?}", other),
    }
    assert!(originals[3].exists());
    assert_eq!(TestHarness::files_under(&harness.source), 1);
}

#[test]
fn test_unmet_gate_keeps_queue_for_a_later_run() {
    let harness = TestHarness::new();
    let originals = harness.seed_source(6);
    let config = harness.config(4, DeleteMode::EndOfScript);

    harness
        .distributor(config.clone(), 8)
        .run_through(Phase::Enumerate)
        .unwrap();
    // Vanishes between enumeration and copy; the count check flags it.
    fs::remove_file(&originals[0]).unwrap();

    let summary = harness.distributor(config.clone(), 9).run().unwrap();
    assert!(summary.completed);
    assert!(summary.discrepancy);
    assert_eq!(summary.copied.placed, 5);
    assert_eq!(summary.errors, 0);
    assert!(summary.warnings >= 1);
    assert_eq!(summary.deletion, Some(DeletionStatus::GateNotMet { queued: 5 }));
    assert!(!summary.state_cleared);
    assert!(harness.state.exists());
    assert!(originals[1..].iter().all(|p| p.exists()));

    let mut relaxed = config;
    relaxed.distribution = relaxed
        .distribution
        .with_deletion_gate(DeletionGate::WarningsOnly);
    let summary = harness.distributor(relaxed, 10).run().unwrap();
    match summary.deletion {
        Some(DeletionStatus::Drained(report)) => assert_eq!(report.deleted, 5),
        other => panic!("unexpected deletion status: {:?}", other),
    }
    assert!(summary.state_cleared);
    assert!(originals.iter().all(|p| !p.exists()));
}

#[test]
fn test_restart_with_other_source_is_rejected() {
    let harness = TestHarness::new();
    harness.seed_source(3);
    let config = harness.config(5, DeleteMode::Immediate);
    harness
        .distributor(config.clone(), 11)
        .run_through(Phase::RenamePrep)
        .unwrap();

    let other = harness.source.with_file_name("other-source");
    fs::create_dir_all(&other).unwrap();
    let mut changed = config;
    changed.distribution.source_folder = other;

    let err = harness.distributor(changed, 12).run().unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::RestartMismatch {
            field: "sourceFolder",
            ..
        }
    ));
    assert!(harness.state.exists());
}

#[test]
fn test_second_run_is_locked_out() {
    let harness = TestHarness::new();
    harness.seed_source(2);
    let config = harness.config(5, DeleteMode::Immediate);

    let mut ctx = RunContext::new("holder");
    let _held = StateStore::open(
        &config.state,
        RetryExecutor::new(RetryConfig::immediate(1)),
        &mut ctx,
    )
    .unwrap();

    let err = harness.distributor(config, 13).run().unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::State(StateError::Locked { .. })
    ));
    assert_eq!(TestHarness::files_under(&harness.source), 2);
}

#[test]
fn test_rebalance_brings_folders_into_band() {
    let harness = TestHarness::new();
    harness.seed_target(&[12, 2, 4]);
    let mut config = harness.config(20, DeleteMode::Immediate);
    config.distribution = config
        .distribution
        .with_mode(DistributionMode::RebalanceToAverage)
        .with_tolerance(10.0);

    let summary = harness.distributor(config, 14).run().unwrap();

    let report = summary.rebalance.expect("rebalance report");
    assert_eq!((report.lower, report.upper), (5, 7));
    assert_eq!(report.moved, 4);
    // Surplus 5 against deficit 4: folder 1 cannot get below 8.
    assert_eq!(report.outcome, RebalanceOutcome::PartiallyBalanced);
    assert_eq!(harness.folder_counts(), vec![8, 5, 5]);
    assert!(summary.warnings >= 1);
    assert!(!summary.discrepancy);
}

#[test]
fn test_consolidate_packs_into_fewest_folders() {
    let harness = TestHarness::new();
    harness.seed_target(&[2, 2, 2, 1]);
    harness.seed_source(3);
    let mut config = harness.config(5, DeleteMode::Immediate);
    config.distribution = config
        .distribution
        .with_mode(DistributionMode::ConsolidateToMinimum);

    let summary = harness.distributor(config, 15).run().unwrap();

    let report = summary.consolidation.expect("consolidation report");
    assert_eq!(report.keepers, 2);
    let counts = harness.folder_counts();
    assert_eq!(counts.len(), 2, "counts: {:?}", counts);
    assert_eq!(counts.iter().sum::<usize>(), 10);
    assert!(counts.iter().all(|&c| c <= 5));
    assert_eq!(summary.final_files, Some(10));
}

#[test]
fn test_randomize_spreads_files_evenly() {
    let harness = TestHarness::new();
    harness.seed_target(&[9, 0, 1, 0]);
    let mut config = harness.config(10, DeleteMode::Immediate);
    config.distribution = config
        .distribution
        .with_mode(DistributionMode::RandomizeDistribution);

    let summary = harness.distributor(config, 16).run().unwrap();

    let report = summary.randomize.expect("randomize report");
    assert_eq!(report.total, 10);
    let mut counts = harness.folder_counts();
    counts.sort_unstable();
    assert_eq!(counts, vec![2, 2, 3, 3]);
}
