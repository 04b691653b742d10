//! Post-scan router (C5)
//!
//! Given a verdict, performs clean-path move or suspect-path archive
//! (encrypt + remove), with integrity re-check.

use chrono::Local;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::files;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("integrity check failed for {path}")]
    IntegrityMismatch { path: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

/// Moves a clean file from quarantine to destination, optionally verifying
/// and removing the source afterward.
pub fn handle_clean_file(
    quarantine_path: &Path,
    source_path: &Path,
    destination_path: &Path,
    delete_source_files: bool,
) -> Result<(), RouterError> {
    files::copy_temp_then_rename(quarantine_path, destination_path)
        .map_err(|e| RouterError::Other(format!("copy to destination failed: {}", e)))?;

    if delete_source_files {
        let verify = files::verify_integrity(source_path, destination_path)
            .map_err(|e| RouterError::Other(format!("integrity check errored: {}", e)))?;
        if verify.equal {
            if let Err(e) = std::fs::remove_file(source_path) {
                warn!("failed to remove source file {:?}: {}", source_path, e);
            }
        } else {
            error!("integrity check failed, source file not deleted: {:?}", source_path);
            return Err(RouterError::IntegrityMismatch {
                path: source_path.display().to_string(),
            });
        }
    }
    Ok(())
}

pub struct SuspectContext<'a> {
    pub quarantine_path: &'a Path,
    pub source_path: &'a Path,
    pub hazard_archive_path: Option<&'a Path>,
    pub key_file_path: Option<&'a Path>,
    pub delete_source_files: bool,
    pub scanner_handling_suspect_file: bool,
    pub quarantine_hash: &'a str,
}

/// Handles a suspect verdict. When the configured scanner is expected to
/// remove the file itself, waits briefly and checks before falling back to
/// internal archiving.
pub fn handle_suspect_scan_result(ctx: &SuspectContext) -> Result<(), RouterError> {
    let mut scanner_handled = false;

    if ctx.scanner_handling_suspect_file {
        warn!("threats found in {:?}, letting scanner handle it", ctx.quarantine_path);
        sleep(Duration::from_millis(500));
        if !ctx.quarantine_path.exists() {
            info!("scanner removed the suspect file: {:?}", ctx.quarantine_path);
            scanner_handled = true;
        } else {
            warn!(
                "scanner did not remove suspect file {:?}, handling internally",
                ctx.quarantine_path
            );
        }
    }

    if scanner_handled {
        handle_suspect_source_file(
            ctx.source_path,
            ctx.quarantine_hash,
            ctx.hazard_archive_path,
            ctx.key_file_path,
        )
    } else {
        warn!("threats found in {:?}, handling internally", ctx.quarantine_path);
        handle_suspect_quarantine_file_and_delete_source(
            ctx.quarantine_path,
            ctx.source_path,
            ctx.hazard_archive_path,
            ctx.key_file_path,
            ctx.delete_source_files,
        )
    }
}

/// After the scanner itself has removed the quarantine copy, checks whether
/// the still-present source file matches the known-bad hash and archives
/// it too if so.
fn handle_suspect_source_file(
    source_path: &Path,
    quarantine_hash: &str,
    hazard_archive_path: Option<&Path>,
    key_file_path: Option<&Path>,
) -> Result<(), RouterError> {
    if !source_path.exists() {
        return Ok(());
    }
    let source_hash = files::hash_file(source_path)
        .map_err(|e| RouterError::Other(format!("failed to hash source file: {}", e)))?;

    if source_hash == quarantine_hash {
        error!("hash match for source file {:?}, archiving source file", source_path);
        handle_suspect_file(source_path, hazard_archive_path, key_file_path)?;
    } else {
        error!("hash mismatch for source file {:?}, not archiving source file", source_path);
    }
    Ok(())
}

/// Internal handling of a quarantine file confirmed suspect: re-verifies
/// integrity against the source, archives (if hazard+key configured), and
/// optionally removes the source.
fn handle_suspect_quarantine_file_and_delete_source(
    quarantine_path: &Path,
    source_path: &Path,
    hazard_archive_path: Option<&Path>,
    key_file_path: Option<&Path>,
    delete_source_files: bool,
) -> Result<(), RouterError> {
    match (hazard_archive_path, key_file_path) {
        (Some(_), Some(_)) => {
            let verify = files::verify_integrity(source_path, quarantine_path)
                .map_err(|e| RouterError::Other(format!("integrity check errored: {}", e)))?;
            if !verify.equal {
                error!("integrity check failed before archiving: {:?}", quarantine_path);
                return Err(RouterError::IntegrityMismatch {
                    path: quarantine_path.display().to_string(),
                });
            }
            error!("malware detected in {:?} with hash value {}", quarantine_path, verify.hash_a);

            handle_suspect_file(quarantine_path, hazard_archive_path, key_file_path)?;

            if delete_source_files {
                if let Err(e) = std::fs::remove_file(source_path) {
                    error!("failed to remove source file after archiving: {:?}: {}", source_path, e);
                    return Err(RouterError::Io(e));
                }
            }
            Ok(())
        }
        _ => {
            warn!(
                "no hazard archive path or encryption key file provided, deleting infected file: {:?}",
                quarantine_path
            );
            std::fs::remove_file(quarantine_path)?;
            if delete_source_files {
                std::fs::remove_file(source_path)?;
            }
            Ok(())
        }
    }
}

/// Encrypts a suspect file into the hazard archive and removes the
/// original on success. This is the shared archiving step used both for
/// the quarantine copy and, separately, for a matching source file.
fn handle_suspect_file(
    suspect_path: &Path,
    hazard_archive_path: Option<&Path>,
    key_file_path: Option<&Path>,
) -> Result<(), RouterError> {
    if !suspect_path.exists() {
        return Err(RouterError::Other(format!(
            "cannot archive non-existent file: {:?}",
            suspect_path
        )));
    }
    let (hazard_dir, key_file) = match (hazard_archive_path, key_file_path) {
        (Some(h), Some(k)) => (h, k),
        _ => {
            warn!(
                "no hazard archive path or encryption key file provided, cannot archive suspect file: {:?}",
                suspect_path
            );
            return Err(RouterError::Other("hazard archiving not configured".to_string()));
        }
    };

    std::fs::create_dir_all(hazard_dir)
        .map_err(|e| RouterError::Other(format!("failed to create hazard archive directory: {}", e)))?;

    let basename = suspect_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let archive_name = format!("hazard_{}_{}.gpg", basename, Local::now().format("%Y%m%d%H%M%S"));
    let archive_path = hazard_dir.join(archive_name);

    files::encrypt_to_recipient(suspect_path, &archive_path, key_file)
        .map_err(|e| RouterError::Other(format!("failed to encrypt file: {}", e)))?;

    info!("successfully encrypted suspect file to: {:?}", archive_path);

    if let Ok(archive_hash) = files::hash_file(&archive_path) {
        info!("suspect file archive {:?} has hash value: {}", archive_path, archive_hash);
    }

    std::fs::remove_file(suspect_path)
        .map_err(|e| RouterError::Other(format!("failed to remove file after archiving: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_handle_clean_file_without_delete() {
        let dir = tempdir().unwrap();
        let quarantine = dir.path().join("q.txt");
        let source = dir.path().join("s.txt");
        let destination = dir.path().join("dest").join("d.txt");
        fs::write(&quarantine, b"payload").unwrap();
        fs::write(&source, b"payload").unwrap();

        handle_clean_file(&quarantine, &source, &destination, false).unwrap();

        assert!(destination.exists());
        assert!(source.exists());
    }

    #[test]
    fn test_handle_clean_file_deletes_source_on_match() {
        let dir = tempdir().unwrap();
        let quarantine = dir.path().join("q.txt");
        let source = dir.path().join("s.txt");
        let destination = dir.path().join("d.txt");
        fs::write(&quarantine, b"payload").unwrap();
        fs::write(&source, b"payload").unwrap();

        handle_clean_file(&quarantine, &source, &destination, true).unwrap();

        assert!(destination.exists());
        assert!(!source.exists());
    }

    #[test]
    fn test_handle_clean_file_keeps_source_on_mismatch() {
        let dir = tempdir().unwrap();
        let quarantine = dir.path().join("q.txt");
        let source = dir.path().join("s.txt");
        let destination = dir.path().join("d.txt");
        fs::write(&quarantine, b"payload-a").unwrap();
        fs::write(&source, b"payload-b").unwrap();

        let result = handle_clean_file(&quarantine, &source, &destination, true);

        assert!(result.is_err());
        assert!(source.exists());
    }

    #[test]
    fn test_suspect_without_hazard_config_removes_quarantine_only() {
        let dir = tempdir().unwrap();
        let quarantine = dir.path().join("q.bin");
        let source = dir.path().join("s.bin");
        fs::write(&quarantine, b"EICAR").unwrap();
        fs::write(&source, b"EICAR").unwrap();

        let ctx = SuspectContext {
            quarantine_path: &quarantine,
            source_path: &source,
            hazard_archive_path: None,
            key_file_path: None,
            delete_source_files: false,
            scanner_handling_suspect_file: false,
            quarantine_hash: "irrelevant",
        };
        handle_suspect_scan_result(&ctx).unwrap();

        assert!(!quarantine.exists());
        assert!(source.exists());
    }
}
