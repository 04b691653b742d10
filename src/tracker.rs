//! Daily processing tracker (C4)
//!
//! Lifecycle ledger keyed by file hash; pending/completed counters; atomic
//! YAML persistence; run summary.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::types::{FileRecord, Outcome, RecordStatus};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("a record for hash {0} already exists")]
    DuplicateHash(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Metrics {
    successful_files: u64,
    successful_volume_mb: f64,
    failed_files: u64,
    failed_volume_mb: f64,
    suspect_files: u64,
    suspect_volume_mb: f64,
    pending_files: u64,
    pending_volume_mb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Totals {
    files_processed: u64,
    volume_processed_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedState {
    start_time: DateTime<Utc>,
    totals: Totals,
    metrics: Metrics,
}

/// Per-day lifecycle ledger. One instance is constructed per run and keeps
/// the day's `throttle_<date>.yaml` file consistent on every `complete`.
pub struct Tracker {
    logs_path: PathBuf,
    date: chrono::NaiveDate,
    run_start_time: DateTime<Utc>,
    file_records: HashMap<String, FileRecord>,
    metrics: Metrics,
    daily_totals: Totals,
}

impl Tracker {
    /// Loads (or initializes) today's tracker file under `logs_path`.
    pub fn new(logs_path: &Path) -> Result<Self, TrackerError> {
        fs::create_dir_all(logs_path)?;
        let date = Local::now().date_naive();
        let tracking_file = Self::tracking_file_path(logs_path, date);

        let (daily_totals, metrics) = if tracking_file.exists() {
            let text = fs::read_to_string(&tracking_file)?;
            match serde_yaml::from_str::<PersistedState>(&text) {
                Ok(state) => (state.totals, Metrics::default()),
                Err(_) => (Totals::default(), Metrics::default()),
            }
        } else {
            (Totals::default(), Metrics::default())
        };
        let _ = metrics;

        Ok(Self {
            logs_path: logs_path.to_path_buf(),
            date,
            run_start_time: Utc::now(),
            file_records: HashMap::new(),
            metrics: Metrics::default(),
            daily_totals,
        })
    }

    fn tracking_file_path(logs_path: &Path, date: chrono::NaiveDate) -> PathBuf {
        logs_path.join(format!("throttle_{}.yaml", date.format("%Y-%m-%d")))
    }

    pub fn daily_files_processed(&self) -> u64 {
        self.daily_totals.files_processed
    }

    pub fn daily_volume_processed_mb(&self) -> f64 {
        self.daily_totals.volume_processed_mb
    }

    pub fn pending_volume_mb(&self) -> f64 {
        self.metrics.pending_volume_mb
    }

    pub fn pending_files(&self) -> u64 {
        self.metrics.pending_files
    }

    /// Creates a pending `FileRecord` keyed by `hash`. Rejects a hash that
    /// is already known (pending or completed) — see DESIGN.md's
    /// hash-collision decision.
    pub fn add_pending(
        &mut self,
        file_path: &str,
        source_path: &str,
        size_mb: f64,
        hash: &str,
    ) -> Result<(), TrackerError> {
        if self.file_records.contains_key(hash) {
            return Err(TrackerError::DuplicateHash(hash.to_string()));
        }
        self.file_records.insert(
            hash.to_string(),
            FileRecord {
                quarantine_time: Utc::now(),
                process_time: None,
                file_path: file_path.to_string(),
                source_path: source_path.to_string(),
                size_mb,
                status: RecordStatus::Pending,
                outcome: None,
                error: None,
            },
        );
        self.metrics.pending_files += 1;
        self.metrics.pending_volume_mb += size_mb;
        Ok(())
    }

    /// Transitions a pending record to completed with the given outcome.
    /// Returns `false` if the hash is unknown.
    pub fn complete(
        &mut self,
        hash: &str,
        outcome: Outcome,
        error: Option<String>,
    ) -> Result<bool, TrackerError> {
        let size_mb = match self.file_records.get_mut(hash) {
            Some(record) if record.status == RecordStatus::Pending => {
                record.status = RecordStatus::Completed;
                record.outcome = Some(outcome);
                record.error = error;
                record.process_time = Some(Utc::now());
                record.size_mb
            }
            _ => return Ok(false),
        };

        self.metrics.pending_files = self.metrics.pending_files.saturating_sub(1);
        self.metrics.pending_volume_mb = (self.metrics.pending_volume_mb - size_mb).max(0.0);

        match outcome {
            Outcome::Success => {
                self.metrics.successful_files += 1;
                self.metrics.successful_volume_mb += size_mb;
            }
            Outcome::Suspect => {
                self.metrics.suspect_files += 1;
                self.metrics.suspect_volume_mb += size_mb;
            }
            Outcome::Failed | Outcome::Unknown => {
                self.metrics.failed_files += 1;
                self.metrics.failed_volume_mb += size_mb;
            }
        }

        self.daily_totals.files_processed += 1;
        self.daily_totals.volume_processed_mb += size_mb;
        self.save_daily_totals()?;
        Ok(true)
    }

    fn save_daily_totals(&self) -> Result<(), TrackerError> {
        let state = PersistedState {
            start_time: self.run_start_time,
            totals: self.daily_totals.clone(),
            metrics: self.metrics.clone(),
        };
        let yaml = serde_yaml::to_string(&state)?;
        let target = Self::tracking_file_path(&self.logs_path, self.date);
        write_atomic(&target, &yaml)
    }

    /// Forcibly completes any remaining pending records as `unknown`,
    /// writes the run summary, and persists daily totals one final time.
    pub fn close(&mut self) -> Result<(), TrackerError> {
        let stranded: Vec<String> = self
            .file_records
            .iter()
            .filter(|(_, r)| r.status == RecordStatus::Pending)
            .map(|(h, _)| h.clone())
            .collect();

        for hash in stranded {
            self.complete(
                &hash,
                Outcome::Unknown,
                Some("Process terminated before completion".to_string()),
            )?;
        }

        self.save_run_summary()?;
        self.save_daily_totals()?;
        Ok(())
    }

    fn save_run_summary(&self) -> Result<(), TrackerError> {
        let now = Local::now();
        let path = self.logs_path.join(format!(
            "summary_{}_{}.yaml",
            self.date.format("%Y-%m-%d"),
            now.format("%H%M%S")
        ));
        let state = PersistedState {
            start_time: self.run_start_time,
            totals: self.daily_totals.clone(),
            metrics: self.metrics.clone(),
        };
        let yaml = serde_yaml::to_string(&state)?;
        fs::write(&path, yaml)?;
        Ok(())
    }

    /// Writes every currently-held `FileRecord` (pending and completed) to
    /// an `export_<date>_<hhmmss>.yaml` file for operator diagnostics.
    pub fn export_to_yaml(&self) -> Result<PathBuf, TrackerError> {
        let now = Local::now();
        let path = self.logs_path.join(format!(
            "export_{}_{}.yaml",
            self.date.format("%Y-%m-%d"),
            now.format("%H%M%S")
        ));
        let yaml = serde_yaml::to_string(&self.file_records)?;
        fs::write(&path, yaml)?;
        Ok(path)
    }
}

/// Writes `content` to a sibling `.tmp` file, then renames it over `path`
/// (atomic replace on POSIX). The temp file is removed on any error.
fn write_atomic(path: &Path, content: &str) -> Result<(), TrackerError> {
    let tmp = path.with_extension("tmp");
    let result = fs::write(&tmp, content)
        .map_err(TrackerError::from)
        .and_then(|_| fs::rename(&tmp, path).map_err(TrackerError::from));
    if result.is_err() && tmp.exists() {
        fs::remove_file(&tmp).ok();
    }
    result
}
