//! Crash-safe mutation of persisted library files.
//!
//! A [`WriteGuard`] takes an advisory lock next to its target, keeps a backup
//! of the target's durable content and restores it unless the guard is
//! committed. A backup found on acquisition means the previous holder died
//! mid-write; it is restored before anything else happens.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, error, warn};

use crate::error::SpiceError;
use crate::store::{LibraryPaths, copy_file_atomic};

/// Exclusive OS advisory lock on a lock file. Released on drop or process exit.
#[derive(Debug)]
pub struct AdvisoryLock {
    file: File,
    path: Utf8PathBuf,
}

impl AdvisoryLock {
    pub fn acquire(path: &Utf8Path) -> Result<Self, SpiceError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| SpiceError::Filesystem(err.to_string()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path.as_std_path())
            .map_err(|err| SpiceError::Filesystem(format!("open lock {path}: {err}")))?;
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(SpiceError::GuardConflict(path.to_string()));
            }
            Err(TryLockError::Error(err)) => {
                return Err(SpiceError::Filesystem(format!("lock {path}: {err}")));
            }
        }
        file.set_len(0)
            .and_then(|_| writeln!(file, "{}", std::process::id()))
            .map_err(|err| SpiceError::Filesystem(err.to_string()))?;
        debug!(lock = %path, "advisory lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            warn!(lock = %self.path, error = %err, "failed to release advisory lock");
        }
    }
}

#[derive(Debug)]
pub struct WriteGuard {
    target: Utf8PathBuf,
    backup: Utf8PathBuf,
    had_original: bool,
    committed: bool,
    // Dropped after the restore in `Drop::drop` has run.
    _lock: AdvisoryLock,
}

impl WriteGuard {
    /// Guards `target`; lock and backup files live in `dir`.
    pub fn acquire(target: &Utf8Path, dir: &Utf8Path) -> Result<Self, SpiceError> {
        let name = target
            .file_name()
            .ok_or_else(|| SpiceError::Filesystem(format!("invalid guard target {target}")))?;
        let lock = AdvisoryLock::acquire(&dir.join(format!(".{name}.lock")))?;
        let backup = dir.join(format!(".{name}.bak"));
        restore_stale_backup(target, &backup)?;

        let had_original = target.as_std_path().exists();
        if had_original {
            copy_file_atomic(target, &backup)?;
        }
        Ok(Self {
            target: target.to_path_buf(),
            backup,
            had_original,
            committed: false,
            _lock: lock,
        })
    }

    /// Runs `f` under a guard; commits on `Ok`, restores on `Err` or panic.
    pub fn run<T, F>(target: &Utf8Path, dir: &Utf8Path, f: F) -> Result<T, SpiceError>
    where
        F: FnOnce(&mut WriteGuard) -> Result<T, SpiceError>,
    {
        let mut guard = Self::acquire(target, dir)?;
        let value = f(&mut guard)?;
        guard.commit()?;
        Ok(value)
    }

    pub fn target(&self) -> &Utf8Path {
        &self.target
    }

    /// Accepts the target's current content as the new rollback point.
    pub fn checkpoint(&mut self) -> Result<(), SpiceError> {
        if self.target.as_std_path().exists() {
            copy_file_atomic(&self.target, &self.backup)?;
            self.had_original = true;
        }
        Ok(())
    }

    pub fn commit(mut self) -> Result<(), SpiceError> {
        if self.backup.as_std_path().exists() {
            fs::remove_file(self.backup.as_std_path())
                .map_err(|err| SpiceError::Filesystem(err.to_string()))?;
        }
        self.committed = true;
        Ok(())
    }

    fn restore(&self) -> std::io::Result<()> {
        if self.had_original {
            fs::rename(self.backup.as_std_path(), self.target.as_std_path())
        } else if self.target.as_std_path().exists() {
            fs::remove_file(self.target.as_std_path())
        } else {
            Ok(())
        }
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match self.restore() {
            Ok(()) => warn!(target = %self.target, "write aborted; original content restored"),
            Err(err) => error!(target = %self.target, error = %err, "failed to restore backup"),
        }
    }
}

/// Library files written under a [`WriteGuard`]; each may have a stale backup.
const GUARDED_FILES: [&str; 6] = [
    "transcript_info",
    "transcript_seq",
    "fas_scores",
    "transcript_fasta",
    "transcript_pairings",
    "transcript_ids",
];

/// Rolls back every guarded library file whose writer died before commit.
/// Must run before any reader trusts the stores. Fails with `GuardConflict`
/// if a live writer still holds one of the files.
pub fn recover_stale_backups(paths: &LibraryPaths) -> Result<Vec<Utf8PathBuf>, SpiceError> {
    let mut restored = Vec::new();
    for name in GUARDED_FILES {
        let target = paths.get(name)?;
        let (Some(dir), Some(file)) = (target.parent(), target.file_name()) else {
            continue;
        };
        let backup = dir.join(format!(".{file}.bak"));
        if !backup.as_std_path().exists() {
            continue;
        }
        let _lock = AdvisoryLock::acquire(&dir.join(format!(".{file}.lock")))?;
        if restore_stale_backup(&target, &backup)? {
            restored.push(target);
        }
    }
    Ok(restored)
}

fn restore_stale_backup(target: &Utf8Path, backup: &Utf8Path) -> Result<bool, SpiceError> {
    if !backup.as_std_path().exists() {
        return Ok(false);
    }
    warn!(target = %target, "stale backup found; restoring interrupted write");
    fs::rename(backup.as_std_path(), target.as_std_path())
        .map_err(|err| SpiceError::Filesystem(err.to_string()))?;
    Ok(true)
}

/// Guards several files as one unit: all commit together or all roll back.
#[derive(Debug, Default)]
pub struct GuardSet {
    guards: Vec<WriteGuard>,
}

impl GuardSet {
    pub fn acquire(targets: &[Utf8PathBuf]) -> Result<Self, SpiceError> {
        let mut guards = Vec::with_capacity(targets.len());
        for target in targets {
            let dir = target
                .parent()
                .ok_or_else(|| SpiceError::Filesystem(format!("invalid guard target {target}")))?;
            guards.push(WriteGuard::acquire(target, dir)?);
        }
        Ok(Self { guards })
    }

    pub fn checkpoint(&mut self) -> Result<(), SpiceError> {
        self.guards.iter_mut().try_for_each(WriteGuard::checkpoint)
    }

    pub fn commit(self) -> Result<(), SpiceError> {
        self.guards.into_iter().try_for_each(WriteGuard::commit)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn setup() -> (tempfile::TempDir, Utf8PathBuf, Utf8PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let target = dir.join("sequences.json");
        fs::write(target.as_std_path(), b"{\"G1\":{}}").unwrap();
        (temp, dir, target)
    }

    #[test]
    fn failure_restores_original_bytes() {
        let (_temp, dir, target) = setup();
        let result: Result<(), SpiceError> = WriteGuard::run(&target, &dir, |guard| {
            fs::write(guard.target().as_std_path(), b"partial").unwrap();
            Err(SpiceError::TransientProvider("simulated".to_string()))
        });
        assert_matches!(result, Err(SpiceError::TransientProvider(_)));
        assert_eq!(fs::read(target.as_std_path()).unwrap(), b"{\"G1\":{}}");
        assert!(!dir.join(".sequences.json.bak").as_std_path().exists());
    }

    #[test]
    fn commit_keeps_new_content() {
        let (_temp, dir, target) = setup();
        WriteGuard::run(&target, &dir, |guard| {
            fs::write(guard.target().as_std_path(), b"done").unwrap();
            Ok(())
        })
        .unwrap();
        assert_eq!(fs::read(target.as_std_path()).unwrap(), b"done");
    }

    #[test]
    fn second_acquisition_conflicts() {
        let (_temp, dir, target) = setup();
        let _held = WriteGuard::acquire(&target, &dir).unwrap();
        let err = WriteGuard::acquire(&target, &dir).unwrap_err();
        assert_matches!(err, SpiceError::GuardConflict(_));
    }

    #[test]
    fn checkpoint_moves_rollback_point() {
        let (_temp, dir, target) = setup();
        {
            let mut guard = WriteGuard::acquire(&target, &dir).unwrap();
            fs::write(target.as_std_path(), b"checkpointed").unwrap();
            guard.checkpoint().unwrap();
            fs::write(target.as_std_path(), b"lost").unwrap();
        }
        assert_eq!(fs::read(target.as_std_path()).unwrap(), b"checkpointed");
    }

    #[test]
    fn stale_backup_is_restored_on_acquire() {
        let (_temp, dir, target) = setup();
        fs::write(dir.join(".sequences.json.bak").as_std_path(), b"durable").unwrap();
        fs::write(target.as_std_path(), b"half-written").unwrap();
        let guard = WriteGuard::acquire(&target, &dir).unwrap();
        assert_eq!(fs::read(target.as_std_path()).unwrap(), b"durable");
        guard.commit().unwrap();
    }

    #[test]
    fn library_backups_are_recovered() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("lib")).unwrap();
        let paths = LibraryPaths::create(root).unwrap();
        let info = paths.transcript_info().unwrap();
        let dir = info.parent().unwrap().to_path_buf();
        fs::write(info.as_std_path(), b"half-written").unwrap();
        fs::write(dir.join(".transcript_info.json.bak").as_std_path(), b"{}").unwrap();

        let restored = recover_stale_backups(&paths).unwrap();
        assert_eq!(restored, vec![info.clone()]);
        assert_eq!(fs::read(info.as_std_path()).unwrap(), b"{}");
        assert!(recover_stale_backups(&paths).unwrap().is_empty());
    }

    #[test]
    fn live_writer_blocks_recovery() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("lib")).unwrap();
        let paths = LibraryPaths::create(root).unwrap();
        let fasta = paths.get("transcript_fasta").unwrap();
        let dir = fasta.parent().unwrap().to_path_buf();
        fs::write(fasta.as_std_path(), b">old").unwrap();
        let _writer = WriteGuard::acquire(&fasta, &dir).unwrap();

        let err = recover_stale_backups(&paths).unwrap_err();
        assert_matches!(err, SpiceError::GuardConflict(_));
    }

    #[test]
    fn new_file_is_removed_on_failure() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let target = dir.join("fresh.fasta");
        let _ = WriteGuard::run(&target, &dir, |guard| -> Result<(), SpiceError> {
            fs::write(guard.target().as_std_path(), b">x").unwrap();
            Err(SpiceError::Format("boom".to_string()))
        });
        assert!(!target.as_std_path().exists());
    }
}
