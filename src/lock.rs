//! Single-instance lock + startup checks (C8)
//!
//! PID lock file, external-tool presence checks, path validation.

use std::fs;
use std::path::Path;
use std::process;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another instance is already running (lock file present at {0:?})")]
    AlreadyRunning(std::path::PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Holds the single-instance PID lock for the lifetime of a run. Removes
/// the lock file on drop, whatever the reason for exit (normal return,
/// early `?`, or panic unwind).
pub struct LockGuard {
    path: std::path::PathBuf,
}

impl LockGuard {
    pub fn acquire(lock_file: &Path) -> Result<Self, LockError> {
        if lock_file.exists() {
            return Err(LockError::AlreadyRunning(lock_file.to_path_buf()));
        }
        if let Some(parent) = lock_file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(lock_file, process::id().to_string())?;
        info!("acquired lock file {:?} (pid {})", lock_file, process::id());
        Ok(Self { path: lock_file.to_path_buf() })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        fs::remove_file(&self.path).ok();
    }
}

#[derive(Debug, Error)]
#[error("required external tool not found on PATH: {0}")]
pub struct MissingToolError(pub String);

/// Checks that a command is resolvable on `PATH` by invoking it with no
/// arguments that could have side effects (`--version`-style probes are
/// scanner-specific, so callers pass the exact probe args).
pub fn tool_present(command: &str, probe_args: &[&str]) -> bool {
    process::Command::new(command)
        .args(probe_args)
        .output()
        .is_ok()
}

pub fn require_tool(command: &str, probe_args: &[&str]) -> Result<(), MissingToolError> {
    if tool_present(command, probe_args) {
        Ok(())
    } else {
        Err(MissingToolError(command.to_string()))
    }
}

/// Validates that `path` exists and is a directory, creating it if it is
/// absent (SOURCE/DESTINATION/QUARANTINE are expected to pre-exist in
/// practice, but an absent DESTINATION/QUARANTINE is a normal first-run
/// condition, not a configuration error).
pub fn validate_directory(path: &Path) -> Result<(), std::io::Error> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_guard_blocks_second_acquisition() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("shuttle.lock");
        let guard = LockGuard::acquire(&lock_path).unwrap();

        let second = LockGuard::acquire(&lock_path);
        assert!(matches!(second, Err(LockError::AlreadyRunning(_))));

        drop(guard);
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_lock_guard_removed_on_drop() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("shuttle.lock");
        {
            let _guard = LockGuard::acquire(&lock_path).unwrap();
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_validate_directory_creates_missing() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("quarantine");
        validate_directory(&target).unwrap();
        assert!(target.is_dir());
    }
}
