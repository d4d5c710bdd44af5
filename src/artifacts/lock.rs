//! Cross-invocation run lock.
//!
//! The lock is a plain file created with create-new semantics, holding the
//! owner's PID. [`RunLock`] removes it on drop, so every exit path of a run
//! (including early returns and panics) releases it.

use crate::errors::RunError;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

pub const LOCK_FILE_NAME: &str = ".gauntlet-run.lock";

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock in `dir`, creating the directory if needed.
    pub fn acquire(dir: &Path) -> Result<Self, RunError> {
        std::fs::create_dir_all(dir).map_err(|source| RunError::Artifact {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(LOCK_FILE_NAME);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let owner = std::fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(RunError::LockConflict { path, owner });
            }
            Err(source) => return Err(RunError::Artifact { path, source }),
        };

        let lock = Self { path };
        write!(file, "{}", std::process::id()).map_err(|source| RunError::Artifact {
            path: lock.path.clone(),
            source,
        })?;
        tracing::debug!(path = %lock.path.display(), "Acquired run lock");
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), "Failed to remove run lock: {}", e);
        }
    }
}

pub fn is_locked(dir: &Path) -> bool {
    dir.join(LOCK_FILE_NAME).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_writes_pid_and_releases_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("gauntlet_logs");

        let lock = RunLock::acquire(&logs).unwrap();
        let content = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content, std::process::id().to_string());
        assert!(is_locked(&logs));

        drop(lock);
        assert!(!is_locked(&logs));
    }

    #[test]
    fn test_second_acquire_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let _held = RunLock::acquire(dir.path()).unwrap();

        match RunLock::acquire(dir.path()) {
            Err(RunError::LockConflict { owner, .. }) => {
                assert_eq!(owner, std::process::id().to_string())
            }
            other => panic!("Expected LockConflict, got {:?}", other),
        }
        // The failed attempt must not have removed the holder's lock.
        assert!(is_locked(dir.path()));
    }

    #[test]
    fn test_stale_lock_from_other_process_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LOCK_FILE_NAME), "99999").unwrap();

        let err = RunLock::acquire(dir.path()).unwrap_err();
        assert!(err.to_string().contains("99999"));
    }

    #[test]
    fn test_lock_released_on_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let result = std::panic::catch_unwind(|| {
            let _lock = RunLock::acquire(&path).unwrap();
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!is_locked(dir.path()));
    }
}
