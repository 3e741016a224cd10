//! Exclusive lock on the primary state file.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::StateError;
use crate::context::RunContext;
use crate::retry::{RetryExecutor, RetryOutcome};

/// Holds an exclusive `fs2` lock on the state file for the whole run.
///
/// The lock is released only inside [`StateLock::suspended`], which is what
/// the store uses around its own reads and writes, and when dropped.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
    file: Option<File>,
    executor: RetryExecutor,
}

impl StateLock {
    /// Acquires the lock, retrying with jittered backoff.
    pub fn acquire(
        path: &Path,
        executor: RetryExecutor,
        ctx: &mut RunContext,
    ) -> Result<Self, StateError> {
        let mut lock = Self {
            path: path.to_path_buf(),
            file: None,
            executor: executor.with_jitter(),
        };
        lock.lock(ctx)?;
        Ok(lock)
    }

    /// Path of the locked file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the lock is currently held.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    fn lock(&mut self, ctx: &mut RunContext) -> Result<(), StateError> {
        if self.file.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            let parent = parent.to_path_buf();
            let description = format!("create {}", parent.display());
            self.executor
                .execute(ctx, &description, || fs::create_dir_all(&parent))?;
        }

        let path = self.path.clone();
        let description = format!("lock {}", path.display());
        let outcome = self
            .executor
            .execute(ctx, &description, || open_locked(&path))
            .map_err(|source| StateError::Locked {
                path: self.path.clone(),
                source,
            })?;

        match outcome {
            RetryOutcome::Completed(file) => {
                debug!("Acquired state lock on {}", self.path.display());
                self.file = Some(file);
                Ok(())
            }
            RetryOutcome::Skipped => Err(StateError::Vanished {
                path: self.path.clone(),
            }),
        }
    }

    fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = fs2::FileExt::unlock(&file);
            debug!("Released state lock on {}", self.path.display());
        }
    }

    /// Runs `work` with the lock released, then takes it back.
    ///
    /// This is the only window in which the state file is unlocked during a
    /// run; the store uses it to replace or recover the file.
    pub fn suspended<T>(
        &mut self,
        ctx: &mut RunContext,
        work: impl FnOnce(&mut RunContext) -> T,
    ) -> Result<T, StateError> {
        self.release();
        let result = work(ctx);
        self.lock(ctx)?;
        Ok(result)
    }

    /// Releases the lock for good.
    pub fn unlock(mut self) {
        self.release();
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn open_locked(path: &Path) -> io::Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    lock_opened(file, path)
}

/// Locks an already opened `file` and checks it is still the one at `path`.
fn lock_opened(file: File, path: &Path) -> io::Result<File> {
    // Fully qualified to avoid std's inherent File::try_lock_exclusive.
    fs2::FileExt::try_lock_exclusive(&file)?;
    // The store replaces the file by rename; a lock on the old inode
    // excludes nobody.
    if !is_same_file(&file, path)? {
        let _ = fs2::FileExt::unlock(&file);
        return Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            "state file was replaced while locking",
        ));
    }
    Ok(file)
}

/// Whether `file` is still the file found at `path`.
#[cfg(unix)]
fn is_same_file(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    let current = fs::metadata(path)?;
    Ok(held.dev() == current.dev() && held.ino() == current.ino())
}

#[cfg(not(unix))]
fn is_same_file(_file: &File, _path: &Path) -> io::Result<bool> {
    // Renaming over an open file fails on Windows.
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryConfig;
    use tempfile::TempDir;

    fn executor() -> RetryExecutor {
        RetryExecutor::new(RetryConfig::immediate(2))
    }

    #[test]
    fn test_second_lock_fails_fast() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        let mut ctx = RunContext::new("s");

        let first = StateLock::acquire(&path, executor(), &mut ctx).unwrap();
        assert!(first.is_held());

        let second = StateLock::acquire(&path, executor(), &mut ctx);
        assert!(matches!(second, Err(StateError::Locked { .. })));

        drop(first);
        assert!(StateLock::acquire(&path, executor(), &mut ctx).is_ok());
    }

    #[test]
    fn test_suspended_window_releases_lock() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/state.json");
        let mut ctx = RunContext::new("s");

        let mut lock = StateLock::acquire(&path, executor(), &mut ctx).unwrap();
        let path_inside = path.clone();
        let acquired_inside = lock
            .suspended(&mut ctx, |ctx| {
                StateLock::acquire(&path_inside, executor(), ctx).is_ok()
            })
            .unwrap();

        assert!(acquired_inside);
        assert!(lock.is_held());
    }

    #[cfg(unix)]
    #[test]
    fn test_replaced_file_is_detected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        let held = open_locked(&path).unwrap();
        assert!(is_same_file(&held, &path).unwrap());

        let replacement = temp.path().join("state.json.tmp");
        fs::write(&replacement, b"{}").unwrap();
        fs::rename(&replacement, &path).unwrap();

        assert!(!is_same_file(&held, &path).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_on_a_replaced_file_is_refused() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        let mut ctx = RunContext::new("s");

        let mut lock = StateLock::acquire(&path, executor(), &mut ctx).unwrap();
        // Another process opens the file during the unlocked window, just
        // before the store renames a new snapshot over it.
        let stale = lock
            .suspended(&mut ctx, |_| {
                let stale = File::open(&path).unwrap();
                let tmp = path.with_extension("tmp");
                fs::write(&tmp, b"{}").unwrap();
                fs::rename(&tmp, &path).unwrap();
                stale
            })
            .unwrap();
        assert!(lock.is_held());

        let err = lock_opened(stale, &path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(matches!(
            StateLock::acquire(&path, executor(), &mut ctx),
            Err(StateError::Locked { .. })
        ));
    }
}
