//! Atomic, checksummed state file with backup and quarantine.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use super::config::StateConfig;
use super::error::StateError;
use super::lock::StateLock;
use super::types::CheckpointRecord;
use crate::context::RunContext;
use crate::retry::{RetryExecutor, RetryOutcome};

/// Where a loaded record came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    /// No usable state existed; the record is empty.
    Fresh,
    /// The primary file was intact.
    Primary,
    /// The primary was missing or corrupt and the backup was promoted.
    Backup,
    /// Nothing was recoverable; the corrupt primary was moved aside.
    Quarantined { moved_to: PathBuf },
}

/// Primary file plus its sidecars.
#[derive(Debug, Clone)]
struct StatePaths {
    primary: PathBuf,
    backup: PathBuf,
    checksum: PathBuf,
}

impl StatePaths {
    fn new(primary: &Path) -> Self {
        Self {
            primary: primary.to_path_buf(),
            backup: with_suffix(primary, "bak"),
            checksum: with_suffix(primary, "sha256"),
        }
    }

    fn quarantine(&self) -> PathBuf {
        with_suffix(
            &self.primary,
            &format!("corrupt-{}", Utc::now().format("%Y%m%d%H%M%S")),
        )
    }
}

/// Result of reading one snapshot file.
enum Snapshot {
    Missing,
    Valid {
        record: CheckpointRecord,
        bytes: Vec<u8>,
    },
    Corrupt(String),
}

/// Durable checkpoint store owning the run's state-file lock.
#[derive(Debug)]
pub struct StateStore {
    paths: StatePaths,
    lock: StateLock,
    executor: RetryExecutor,
}

impl StateStore {
    /// Opens the store and takes the exclusive lock.
    ///
    /// Fails with [`StateError::Locked`] if another run holds it.
    pub fn open(
        config: &StateConfig,
        executor: RetryExecutor,
        ctx: &mut RunContext,
    ) -> Result<Self, StateError> {
        let lock_executor = RetryExecutor::new(config.lock_retry.clone());
        let lock = StateLock::acquire(&config.path, lock_executor, ctx)?;
        Ok(Self {
            paths: StatePaths::new(&config.path),
            lock,
            executor,
        })
    }

    /// Primary state file path.
    pub fn path(&self) -> &Path {
        &self.paths.primary
    }

    /// Backup sidecar path.
    pub fn backup_path(&self) -> &Path {
        &self.paths.backup
    }

    /// Checksum sidecar path.
    pub fn checksum_path(&self) -> &Path {
        &self.paths.checksum
    }

    /// Loads the latest recoverable record.
    ///
    /// Bad content never fails the call; only losing the lock does.
    pub fn load(&mut self, ctx: &mut RunContext) -> Result<CheckpointRecord, StateError> {
        self.load_with_source(ctx).map(|(record, _)| record)
    }

    /// Like [`load`](Self::load), also reporting where the record came from.
    pub fn load_with_source(
        &mut self,
        ctx: &mut RunContext,
    ) -> Result<(CheckpointRecord, LoadSource), StateError> {
        let paths = &self.paths;
        let executor = &self.executor;
        self.lock
            .suspended(ctx, |ctx| recover(paths, executor, ctx))?
    }

    /// Persists `record` atomically, keeping the previous snapshot as backup.
    pub fn save(
        &mut self,
        record: &CheckpointRecord,
        ctx: &mut RunContext,
    ) -> Result<(), StateError> {
        let mut record = record.clone();
        record.saved_at = Some(Utc::now());
        let bytes = serde_json::to_vec_pretty(&record)?;
        let checksum = digest(&bytes);

        let paths = &self.paths;
        let executor = &self.executor;
        self.lock
            .suspended(ctx, |ctx| persist(paths, executor, ctx, &bytes, &checksum))??;

        debug!(
            "Saved checkpoint {} to {}",
            record.checkpoint,
            self.paths.primary.display()
        );
        Ok(())
    }

    /// Releases the lock and removes the state file and its sidecars.
    pub fn clear(self, ctx: &mut RunContext) -> Result<(), StateError> {
        let Self {
            paths,
            lock,
            executor,
        } = self;
        lock.unlock();

        for path in [&paths.checksum, &paths.backup, &paths.primary] {
            if path.exists() {
                let description = format!("remove {}", path.display());
                executor.execute(ctx, &description, || fs::remove_file(path))?;
            }
        }
        info!("Cleared state file {}", paths.primary.display());
        Ok(())
    }
}

fn recover(
    paths: &StatePaths,
    executor: &RetryExecutor,
    ctx: &mut RunContext,
) -> Result<(CheckpointRecord, LoadSource), StateError> {
    let corrupt = match read_snapshot(&paths.primary, Some(&paths.checksum)) {
        Snapshot::Valid { record, .. } => return Ok((record, LoadSource::Primary)),
        Snapshot::Missing => false,
        Snapshot::Corrupt(reason) => {
            ctx.warn(format!(
                "State file {} is corrupt: {}",
                paths.primary.display(),
                reason
            ));
            true
        }
    };

    match read_snapshot(&paths.backup, None) {
        Snapshot::Valid { record, bytes } => {
            write_atomic(executor, ctx, &paths.primary, &bytes)?;
            write_atomic(executor, ctx, &paths.checksum, digest(&bytes).as_bytes())?;
            ctx.warn(format!(
                "Recovered checkpoint {} from backup {}",
                record.checkpoint,
                paths.backup.display()
            ));
            return Ok((record, LoadSource::Backup));
        }
        Snapshot::Corrupt(reason) => {
            warn!(
                "Backup state file {} is unusable: {}",
                paths.backup.display(),
                reason
            );
        }
        Snapshot::Missing => {}
    }

    if !corrupt {
        return Ok((CheckpointRecord::default(), LoadSource::Fresh));
    }

    let moved_to = paths.quarantine();
    let description = format!("quarantine {}", paths.primary.display());
    executor.execute(ctx, &description, || fs::rename(&paths.primary, &moved_to))?;
    if paths.checksum.exists() {
        let description = format!("remove {}", paths.checksum.display());
        executor.execute(ctx, &description, || fs::remove_file(&paths.checksum))?;
    }
    error!(
        "No recoverable state; corrupt file moved to {}. Starting from checkpoint 0, previous progress is discarded",
        moved_to.display()
    );
    Ok((CheckpointRecord::default(), LoadSource::Quarantined { moved_to }))
}

fn persist(
    paths: &StatePaths,
    executor: &RetryExecutor,
    ctx: &mut RunContext,
    bytes: &[u8],
    checksum: &str,
) -> Result<(), StateError> {
    let temp = temp_path(&paths.primary);
    let description = format!("write {}", temp.display());
    required(
        executor.execute(ctx, &description, || write_synced(&temp, bytes))?,
        &temp,
    )?;

    let has_previous = fs::metadata(&paths.primary)
        .map(|m| m.len() > 0)
        .unwrap_or(false);
    if has_previous {
        let description = format!("back up {}", paths.primary.display());
        executor.execute(ctx, &description, || {
            fs::copy(&paths.primary, &paths.backup)
        })?;
    }

    // A primary without a checksum is trusted if it parses; a stale checksum
    // next to a fresh primary would not be.
    if paths.checksum.exists() {
        let description = format!("remove {}", paths.checksum.display());
        executor.execute(ctx, &description, || fs::remove_file(&paths.checksum))?;
    }

    let description = format!("replace {}", paths.primary.display());
    required(
        executor.execute(ctx, &description, || fs::rename(&temp, &paths.primary))?,
        &paths.primary,
    )?;

    write_atomic(executor, ctx, &paths.checksum, checksum.as_bytes())?;
    sync_parent(&paths.primary);
    Ok(())
}

fn read_snapshot(path: &Path, checksum: Option<&Path>) -> Snapshot {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Snapshot::Missing,
        Err(e) => return Snapshot::Corrupt(format!("unreadable: {}", e)),
    };
    // The lock creates the primary empty; that is "no state", not corruption.
    if bytes.is_empty() {
        return Snapshot::Missing;
    }

    if let Some(checksum_path) = checksum {
        match fs::read_to_string(checksum_path) {
            Ok(expected) => {
                let actual = digest(&bytes);
                if expected.trim() != actual {
                    return Snapshot::Corrupt(format!(
                        "checksum mismatch (expected {}, got {})",
                        expected.trim(),
                        actual
                    ));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Snapshot::Corrupt(format!("checksum unreadable: {}", e)),
        }
    }

    match serde_json::from_slice(&bytes) {
        Ok(record) => Snapshot::Valid { record, bytes },
        Err(e) => Snapshot::Corrupt(format!("invalid JSON: {}", e)),
    }
}

fn write_atomic(
    executor: &RetryExecutor,
    ctx: &mut RunContext,
    path: &Path,
    bytes: &[u8],
) -> Result<(), StateError> {
    let temp = temp_path(path);
    let description = format!("write {}", temp.display());
    required(
        executor.execute(ctx, &description, || write_synced(&temp, bytes))?,
        &temp,
    )?;
    let description = format!("replace {}", path.display());
    required(
        executor.execute(ctx, &description, || fs::rename(&temp, path))?,
        path,
    )
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn sync_parent(path: &Path) {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

fn required<T>(outcome: RetryOutcome<T>, path: &Path) -> Result<T, StateError> {
    outcome.completed().ok_or_else(|| StateError::Vanished {
        path: path.to_path_buf(),
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state");
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
