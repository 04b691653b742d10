//! Orchestrator (C7)
//!
//! Wires every other component together for a single run: lock, startup
//! gate, intake walk, worker-pool scan/route dispatch, cleanup, notify.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::files;
use crate::ledger::Ledger;
use crate::lock::{self, LockGuard};
use crate::notifier::Notifier;
use crate::pool;
use crate::router::{self, SuspectContext};
use crate::scanners::{self, DefenderAdapter, ClamAvAdapter};
use crate::throttle::{self, FreeSpace, Limits, Totals};
use crate::tracker::Tracker;
use crate::types::{FileTask, Outcome, RunConfig, ScanVerdict};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("another instance is already running")]
    AlreadyRunning,
    #[error("required external tool missing: {0}")]
    MissingTool(String),
    #[error("defender version ledger check failed: {0}")]
    LedgerGate(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Summary returned on a completed (possibly early-stopped) run.
pub struct RunSummary {
    pub files_succeeded: u64,
    pub files_suspect: u64,
    pub files_failed: u64,
    pub stopped_early: bool,
    pub stop_reason: Option<String>,
}

pub fn run(config: &RunConfig, notifier: &Notifier, defender_adapter: &DefenderAdapter) -> Result<RunSummary, OrchestratorError> {
    let _lock = LockGuard::acquire(&config.lock_file).map_err(|e| match e {
        lock::LockError::AlreadyRunning(_) => OrchestratorError::AlreadyRunning,
        other => OrchestratorError::Other(other.into()),
    })?;

    probe_required_tools(config, defender_adapter)?;

    lock::validate_directory(&config.source_path).context("validating source path")?;
    lock::validate_directory(&config.destination_path).context("validating destination path")?;
    lock::validate_directory(&config.quarantine_path).context("validating quarantine path")?;

    if let Some(ledger_path) = &config.defender_ledger_path {
        check_defender_ledger(ledger_path, defender_adapter)?;
    }

    let mut tracker = Tracker::new(&config.daily_processing_tracker_logs_path)
        .context("initializing daily processing tracker")?;

    let run_totals = Totals { files: 0, volume_mb: 0.0 };
    let (tasks, stop_reason) = intake_walk(config, &mut tracker, run_totals)?;

    let tracker = Mutex::new(tracker);
    let clam_adapter = ClamAvAdapter::new("clamdscan");

    let results = pool::run_bounded(tasks, config.max_scan_threads, |task| {
        process_task(config, defender_adapter, &clam_adapter, &tracker, task)
    });

    let results = match results {
        Ok(r) => r,
        Err(e) => {
            error!("worker pool failed: {}", e);
            notifier.notify_error("shuttle run failed", "worker pool reported a fatal error", Some(&e.to_string()));
            return Err(OrchestratorError::Other(e.into()));
        }
    };

    let mut succeeded = 0u64;
    let mut suspect = 0u64;
    let mut failed = 0u64;
    for outcome in &results {
        match outcome {
            Outcome::Success => succeeded += 1,
            Outcome::Suspect => suspect += 1,
            Outcome::Failed | Outcome::Unknown => failed += 1,
        }
    }

    if let Err(e) = files::remove_empty_directories(&config.quarantine_path, true) {
        warn!("failed to clean up quarantine directory: {}", e);
    }
    if config.delete_source_files {
        if let Err(e) = files::remove_empty_directories(&config.source_path, true) {
            warn!("failed to clean up empty source subdirectories: {}", e);
        }
    }

    {
        let mut tracker = tracker.lock().expect("tracker mutex poisoned");
        tracker.close().context("finalizing daily processing tracker")?;
    }

    let stopped_early = stop_reason.is_some();
    let should_notify_summary = config.notify_summary || failed > 0 || stopped_early;
    if should_notify_summary {
        let title = format!(
            "shuttle run complete: {} succeeded, {} suspect, {} failed",
            succeeded, suspect, failed
        );
        let mut body = format!(
            "Succeeded: {}\nSuspect: {}\nFailed: {}\n",
            succeeded, suspect, failed
        );
        if let Some(reason) = &stop_reason {
            body.push_str(&format!("\nIntake walk stopped early: {}\n", reason));
        }
        notifier.notify_summary(&title, &body);
    }

    Ok(RunSummary {
        files_succeeded: succeeded,
        files_suspect: suspect,
        files_failed: failed,
        stopped_early,
        stop_reason,
    })
}

fn probe_required_tools(config: &RunConfig, defender_adapter: &DefenderAdapter) -> Result<(), OrchestratorError> {
    if !config.on_demand_defender && !config.on_demand_clam_av {
        return Err(OrchestratorError::Other(anyhow::anyhow!(
            "at least one of on_demand_defender / on_demand_clam_av must be enabled"
        )));
    }
    if config.on_demand_defender {
        lock::require_tool(&defender_adapter.command, &["health"])
            .map_err(|e| OrchestratorError::MissingTool(e.0))?;
    }
    if config.on_demand_clam_av {
        lock::require_tool("clamdscan", &["--version"]).map_err(|e| OrchestratorError::MissingTool(e.0))?;
    }
    if config.hazard_archive_path.is_some() && !lock::tool_present("lsof", &["-v"]) {
        warn!("lsof not found on PATH; open-file checks will always report closed");
    }
    Ok(())
}

fn check_defender_ledger(ledger_path: &Path, defender_adapter: &DefenderAdapter) -> Result<(), OrchestratorError> {
    let ledger = Ledger::load(ledger_path)
        .map_err(|e| OrchestratorError::LedgerGate(e.to_string()))?;

    let output = std::process::Command::new(&defender_adapter.command)
        .arg("version")
        .output()
        .map_err(|e| OrchestratorError::LedgerGate(format!("failed to invoke {}: {}", defender_adapter.command, e)))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detected = crate::ledger::parse_mdatp_version(&stdout)
        .ok_or_else(|| OrchestratorError::LedgerGate("could not parse defender version".to_string()))?;

    if !ledger.is_version_tested(&detected) {
        return Err(OrchestratorError::LedgerGate(format!(
            "defender version {} is not listed as tested/pass",
            detected
        )));
    }
    info!("defender version {} passed ledger gate", detected);
    Ok(())
}

/// Bottom-up walk of SOURCE; returns the admitted task batch plus, if the
/// walk was stopped early by a throttle stop condition, a human-readable
/// reason.
fn intake_walk(
    config: &RunConfig,
    tracker: &mut Tracker,
    mut run_totals: Totals,
) -> Result<(Vec<FileTask>, Option<String>), OrchestratorError> {
    let mut tasks = Vec::new();
    let mut stop_reason = None;

    let run_limits = Limits {
        max_files: config.throttle_max_file_count_per_run,
        max_volume_mb: config.throttle_max_file_volume_per_run_mb,
    };
    let daily_limits = Limits {
        max_files: config.throttle_max_file_count_per_day,
        max_volume_mb: config.throttle_max_file_volume_per_day_mb,
    };

    'walk: for entry in WalkDir::new(&config.source_path).contents_first(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("failed to read directory entry during intake walk: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let source_path = entry.path().to_path_buf();

        let name = entry.file_name().to_string_lossy().to_string();
        if !files::is_name_safe(&name, false) {
            warn!("skipping unsafe filename: {:?}", source_path);
            continue;
        }

        if !config.skip_stability_check && !files::is_file_stable(&source_path, 5) {
            continue;
        }
        if files::is_file_open(&source_path) {
            continue;
        }

        let relative_path = match source_path.strip_prefix(&config.source_path) {
            Ok(p) => p.to_path_buf(),
            Err(_) => source_path.clone(),
        };
        let quarantine_path = config.quarantine_path.join(&relative_path);
        let destination_path = config.destination_path.join(&relative_path);

        let size_bytes = match std::fs::metadata(&source_path) {
            Ok(m) => m.len(),
            Err(_) => continue,
        };
        let size_mb = size_bytes as f64 / (1024.0 * 1024.0);

        if config.throttle {
            let free_space = resolve_free_space(config);
            let decision = throttle::can_process(
                size_mb,
                &free_space,
                config.throttle_free_space_mb as f64,
                tracker.pending_volume_mb(),
                &Totals {
                    files: tracker.daily_files_processed() + tracker.pending_files(),
                    volume_mb: tracker.daily_volume_processed_mb() + tracker.pending_volume_mb(),
                },
                &daily_limits,
                &run_totals,
                &run_limits,
                false,
            );
            if decision.is_stop_condition() {
                stop_reason = decision.message.clone().or_else(|| Some(format!("{:?}", decision.reasons)));
                info!("intake walk stopped: {:?}", stop_reason);
                break 'walk;
            }
        }

        if let Err(e) = files::copy_temp_then_rename(&source_path, &quarantine_path) {
            warn!("failed to copy {:?} to quarantine: {}", source_path, e);
            continue;
        }

        let hash = match files::hash_file(&quarantine_path) {
            Ok(h) => h,
            Err(e) => {
                warn!("failed to hash quarantined copy of {:?}: {}", source_path, e);
                continue;
            }
        };

        if let Err(e) = tracker.add_pending(
            &quarantine_path.display().to_string(),
            &source_path.display().to_string(),
            size_mb,
            &hash,
        ) {
            warn!("failed to register pending record for {:?}: {}", source_path, e);
            continue;
        }

        run_totals.files += 1;
        run_totals.volume_mb += size_mb;

        tasks.push(FileTask {
            source_path,
            relative_path,
            quarantine_path,
            destination_path,
            size_bytes,
            size_mb,
            hash,
            state: crate::types::FileState::Quarantined,
            verdict: None,
            error: None,
        });
    }

    Ok((tasks, stop_reason))
}

fn resolve_free_space(config: &RunConfig) -> FreeSpace {
    FreeSpace {
        quarantine_mb: config
            .mock_free_space_quarantine_mb
            .or(config.mock_free_space_mb)
            .unwrap_or_else(|| throttle::free_space_mb(&config.quarantine_path)),
        destination_mb: config
            .mock_free_space_destination_mb
            .or(config.mock_free_space_mb)
            .unwrap_or_else(|| throttle::free_space_mb(&config.destination_path)),
        hazard_mb: config
            .mock_free_space_hazard_mb
            .or(config.mock_free_space_mb)
            .unwrap_or_else(|| {
                config
                    .hazard_archive_path
                    .as_deref()
                    .map(throttle::free_space_mb)
                    .unwrap_or(f64::MAX)
            }),
    }
}

/// Runs on a worker: scan (Defender first, then ClamAV unless already
/// Suspect), route the verdict, commit the tracker record. Returns the
/// outcome for run-level counting.
fn process_task(
    config: &RunConfig,
    defender_adapter: &DefenderAdapter,
    clam_adapter: &ClamAvAdapter,
    tracker: &Mutex<Tracker>,
    task: FileTask,
) -> Outcome {
    let verdict = scan_task(config, defender_adapter, clam_adapter, &task);

    let outcome = match verdict {
        ScanVerdict::Clean => route_clean(config, &task),
        ScanVerdict::Suspect => route_suspect(config, &task),
        ScanVerdict::NotFound => {
            let resolved = scanners::resolve_defender_notfound(config.defender_handles_suspect_files);
            if resolved == ScanVerdict::Suspect {
                route_suspect(config, &task)
            } else {
                Outcome::Failed
            }
        }
        ScanVerdict::ScanFailed => Outcome::Failed,
    };

    let error_message = match outcome {
        Outcome::Failed => Some("scan or routing failed".to_string()),
        _ => None,
    };

    let mut tracker = tracker.lock().expect("tracker mutex poisoned");
    if let Err(e) = tracker.complete(&task.hash, outcome, error_message) {
        error!("failed to commit tracker record for {:?}: {}", task.source_path, e);
    }

    outcome
}

fn scan_task(
    config: &RunConfig,
    defender_adapter: &DefenderAdapter,
    clam_adapter: &ClamAvAdapter,
    task: &FileTask,
) -> ScanVerdict {
    if config.on_demand_defender {
        let result = defender_adapter.scan(&task.quarantine_path);
        info!(
            "defender scan of {:?}: {:?} ({} ms)",
            task.quarantine_path, result.verdict, result.elapsed_ms
        );
        if result.verdict != ScanVerdict::Clean {
            return result.verdict;
        }
    }
    if config.on_demand_clam_av {
        let result = clam_adapter.scan(&task.quarantine_path);
        info!(
            "clamav scan of {:?}: {:?} ({} ms)",
            task.quarantine_path, result.verdict, result.elapsed_ms
        );
        return result.verdict;
    }
    ScanVerdict::Clean
}

fn route_clean(config: &RunConfig, task: &FileTask) -> Outcome {
    match router::handle_clean_file(
        &task.quarantine_path,
        &task.source_path,
        &task.destination_path,
        config.delete_source_files,
    ) {
        Ok(()) => Outcome::Success,
        Err(e) => {
            error!("failed to route clean file {:?}: {}", task.source_path, e);
            Outcome::Failed
        }
    }
}

fn route_suspect(config: &RunConfig, task: &FileTask) -> Outcome {
    let ctx = SuspectContext {
        quarantine_path: &task.quarantine_path,
        source_path: &task.source_path,
        hazard_archive_path: config.hazard_archive_path.as_deref(),
        key_file_path: config.hazard_encryption_key_path.as_deref(),
        delete_source_files: config.delete_source_files,
        scanner_handling_suspect_file: config.defender_handles_suspect_files,
        quarantine_hash: &task.hash,
    };
    match router::handle_suspect_scan_result(&ctx) {
        Ok(()) => Outcome::Suspect,
        Err(e) => {
            error!("failed to route suspect file {:?}: {}", task.source_path, e);
            Outcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn base_config(dir: &std::path::Path) -> RunConfig {
        RunConfig {
            source_path: dir.join("source"),
            destination_path: dir.join("destination"),
            quarantine_path: dir.join("quarantine"),
            hazard_archive_path: None,
            hazard_encryption_key_path: None,
            delete_source_files: false,
            max_scan_threads: 1,
            on_demand_defender: true,
            on_demand_clam_av: false,
            defender_handles_suspect_files: false,
            throttle: true,
            throttle_free_space_mb: 0,
            throttle_max_file_count_per_day: 0,
            throttle_max_file_volume_per_day_mb: 50.0,
            throttle_max_file_count_per_run: 0,
            throttle_max_file_volume_per_run_mb: 0.0,
            daily_processing_tracker_logs_path: dir.join("tracker"),
            skip_stability_check: true,
            mock_free_space_mb: Some(1_000_000.0),
            mock_free_space_quarantine_mb: None,
            mock_free_space_destination_mb: None,
            mock_free_space_hazard_mb: None,
            lock_file: dir.join("shuttle.lock"),
            defender_ledger_path: None,
            recipient_email: None,
            recipient_email_error: None,
            recipient_email_summary: None,
            recipient_email_hazard: None,
            smtp_server: None,
            smtp_port: 25,
            smtp_username: None,
            smtp_password: None,
            smtp_use_tls: false,
            notify_summary: false,
            log_path: None,
            log_level: "info".to_string(),
        }
    }

    /// Scenario 3 (§8): 10 files of 5 MB each, daily volume limit 50 MB,
    /// 40 MB already recorded as processed today. Only 2 of the 10 files
    /// have remaining daily headroom (40 + 5 + 5 = 50), so the walk must
    /// stop after admitting exactly 2 — not all 10.
    #[test]
    fn test_daily_volume_throttle_with_existing_log_admits_only_remaining_headroom() {
        let dir = tempdir().unwrap();
        let config = base_config(dir.path());
        std::fs::create_dir_all(&config.source_path).unwrap();
        std::fs::create_dir_all(&config.quarantine_path).unwrap();

        let five_mb = vec![0u8; 5 * 1024 * 1024];
        for i in 0..10 {
            std::fs::write(config.source_path.join(format!("file{}.bin", i)), &five_mb).unwrap();
        }

        let mut tracker = Tracker::new(&config.daily_processing_tracker_logs_path).unwrap();
        tracker.add_pending("/prior/a", "/prior/a", 20.0, "prior-hash-a").unwrap();
        tracker.complete("prior-hash-a", Outcome::Success, None).unwrap();
        tracker.add_pending("/prior/b", "/prior/b", 20.0, "prior-hash-b").unwrap();
        tracker.complete("prior-hash-b", Outcome::Success, None).unwrap();
        assert_eq!(tracker.daily_volume_processed_mb(), 40.0);

        let run_totals = Totals { files: 0, volume_mb: 0.0 };
        let (tasks, stop_reason) = intake_walk(&config, &mut tracker, run_totals).unwrap();

        assert_eq!(tasks.len(), 2);
        assert!(stop_reason.is_some());
        assert_eq!(tracker.daily_volume_processed_mb(), 40.0);
        assert_eq!(tracker.pending_volume_mb(), 10.0);
    }
}
