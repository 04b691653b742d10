use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Runtime configuration for a single shuttle run, resolved from CLI flags,
/// settings file, and built-in defaults (see `config.rs`). Immutable once built.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub quarantine_path: PathBuf,

    pub hazard_archive_path: Option<PathBuf>,
    pub hazard_encryption_key_path: Option<PathBuf>,

    pub delete_source_files: bool,
    pub max_scan_threads: usize,

    pub on_demand_defender: bool,
    pub on_demand_clam_av: bool,
    pub defender_handles_suspect_files: bool,

    pub throttle: bool,
    pub throttle_free_space_mb: u64,
    pub throttle_max_file_count_per_day: u64,
    pub throttle_max_file_volume_per_day_mb: f64,
    pub throttle_max_file_count_per_run: u64,
    pub throttle_max_file_volume_per_run_mb: f64,

    pub daily_processing_tracker_logs_path: PathBuf,

    pub skip_stability_check: bool,
    pub mock_free_space_mb: Option<f64>,
    pub mock_free_space_quarantine_mb: Option<f64>,
    pub mock_free_space_destination_mb: Option<f64>,
    pub mock_free_space_hazard_mb: Option<f64>,

    pub lock_file: PathBuf,
    pub defender_ledger_path: Option<PathBuf>,

    pub recipient_email: Option<String>,
    pub recipient_email_error: Option<String>,
    pub recipient_email_summary: Option<String>,
    pub recipient_email_hazard: Option<String>,
    pub smtp_server: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_use_tls: bool,
    pub notify_summary: bool,

    pub log_path: Option<PathBuf>,
    pub log_level: String,
}

/// One row per candidate file discovered during the intake walk.
#[derive(Debug, Clone)]
pub struct FileTask {
    pub source_path: PathBuf,
    pub relative_path: PathBuf,
    pub quarantine_path: PathBuf,
    pub destination_path: PathBuf,
    pub size_bytes: u64,
    pub size_mb: f64,
    pub hash: String,
    pub state: FileState,
    pub verdict: Option<ScanVerdict>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Discovered,
    Quarantined,
    Scanning,
    Clean,
    Suspect,
    Failed,
    Completed,
}

/// A scanner's classification of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    Suspect,
    NotFound,
    ScanFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Suspect,
    Failed,
    Unknown,
}

/// Tracker entry keyed by the post-copy quarantine hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub quarantine_time: DateTime<Utc>,
    pub process_time: Option<DateTime<Utc>>,
    pub file_path: String,
    pub source_path: String,
    pub size_mb: f64,
    pub status: RecordStatus,
    pub outcome: Option<Outcome>,
    pub error: Option<String>,
}

/// Rolling per-day counters, persisted across runs on the same calendar day.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DailyTotals {
    pub files_processed: u64,
    pub volume_processed_mb: f64,
}

/// One entry in the Defender-version allow-list ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub version: String,
    pub test_result: String,
}
