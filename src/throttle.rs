//! Throttler (C3)
//!
//! Pure decision function: "may this file enter the pipeline?" given
//! current space, pending reservations, daily totals, per-run totals.

use std::fs;
use std::path::Path;
use sysinfo::Disks;

/// Free space in MB for a directory, creating it first if missing.
/// Returns `0.0` on any stat error (matches the source's fail-closed
/// behavior rather than propagating an I/O error up through the throttle
/// decision, which must never panic mid-walk).
pub fn free_space_mb(directory: &Path) -> f64 {
    if !directory.exists() && fs::create_dir_all(directory).is_err() {
        return 0.0;
    }
    let canonical = fs::canonicalize(directory).unwrap_or_else(|_| directory.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    let mut best_match: Option<(usize, u64)> = None;
    for disk in disks.list() {
        let mount_point = disk.mount_point();
        if canonical.starts_with(mount_point) {
            let len = mount_point.as_os_str().len();
            if best_match.map(|(best_len, _)| len > best_len).unwrap_or(true) {
                best_match = Some((len, disk.available_space()));
            }
        }
    }

    match best_match {
        Some((_, bytes)) => bytes as f64 / (1024.0 * 1024.0),
        None => 0.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonCode {
    QuarantineSpace,
    DestinationSpace,
    HazardSpace,
    DiskError,
    DailyLimit,
    RunLimit,
}

#[derive(Debug, Clone, Default)]
pub struct Decision {
    pub admit: bool,
    pub reasons: Vec<ReasonCode>,
    pub quarantine_ok: bool,
    pub destination_ok: bool,
    pub hazard_ok: bool,
    pub disk_error: bool,
    pub daily_limit_hit: bool,
    pub run_limit_hit: bool,
    pub message: Option<String>,
}

impl Decision {
    /// True iff this decision should break the intake walk rather than
    /// merely skip the current file: every throttle failure is stop-class.
    pub fn is_stop_condition(&self) -> bool {
        !self.admit
    }
}

pub struct FreeSpace {
    pub quarantine_mb: f64,
    pub destination_mb: f64,
    pub hazard_mb: f64,
}

pub struct Totals {
    pub files: u64,
    pub volume_mb: f64,
}

pub struct Limits {
    pub max_files: u64,
    pub max_volume_mb: f64,
}

impl Limits {
    fn file_count_ok(&self, totals_files: u64) -> bool {
        self.max_files == 0 || totals_files + 1 <= self.max_files
    }

    fn volume_ok(&self, totals_volume_mb: f64, added_mb: f64) -> bool {
        self.max_volume_mb == 0.0 || totals_volume_mb + added_mb <= self.max_volume_mb
    }
}

/// Pure admission-control decision. `disk_error` short-circuits everything
/// else to a stop condition, since a stat failure means the directories'
/// real state cannot be trusted.
#[allow(clippy::too_many_arguments)]
pub fn can_process(
    size_mb: f64,
    free_space: &FreeSpace,
    min_free_space_mb: f64,
    pending_volume_mb: f64,
    daily_totals: &Totals,
    daily_limits: &Limits,
    run_totals: &Totals,
    run_limits: &Limits,
    disk_error: bool,
) -> Decision {
    let mut decision = Decision {
        quarantine_ok: true,
        destination_ok: true,
        hazard_ok: true,
        ..Default::default()
    };

    if disk_error {
        decision.disk_error = true;
        decision.admit = false;
        decision.reasons.push(ReasonCode::DiskError);
        decision.message = Some("error checking disk space".to_string());
        return decision;
    }

    let quarantine_required = size_mb + min_free_space_mb;
    if free_space.quarantine_mb < quarantine_required {
        decision.quarantine_ok = false;
        decision.reasons.push(ReasonCode::QuarantineSpace);
    }

    let destination_required = size_mb + min_free_space_mb + pending_volume_mb;
    if free_space.destination_mb < destination_required {
        decision.destination_ok = false;
        decision.reasons.push(ReasonCode::DestinationSpace);
    }

    let hazard_required = size_mb + min_free_space_mb + pending_volume_mb;
    if free_space.hazard_mb < hazard_required {
        decision.hazard_ok = false;
        decision.reasons.push(ReasonCode::HazardSpace);
    }

    if !daily_limits.file_count_ok(daily_totals.files)
        || !daily_limits.volume_ok(daily_totals.volume_mb, size_mb)
    {
        decision.daily_limit_hit = true;
        decision.reasons.push(ReasonCode::DailyLimit);
        decision.message = Some(format!(
            "daily limit exceeded (files={}, volume_mb={:.2})",
            daily_totals.files, daily_totals.volume_mb
        ));
    }

    if !run_limits.file_count_ok(run_totals.files)
        || !run_limits.volume_ok(run_totals.volume_mb, size_mb)
    {
        decision.run_limit_hit = true;
        decision.reasons.push(ReasonCode::RunLimit);
    }

    decision.admit = decision.quarantine_ok
        && decision.destination_ok
        && decision.hazard_ok
        && !decision.disk_error
        && !decision.daily_limit_hit
        && !decision.run_limit_hit;

    decision
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unlimited() -> Limits {
        Limits { max_files: 0, max_volume_mb: 0.0 }
    }

    fn plentiful_space() -> FreeSpace {
        FreeSpace { quarantine_mb: 10_000.0, destination_mb: 10_000.0, hazard_mb: 10_000.0 }
    }

    #[test]
    fn test_min_free_space_zero_never_throttles() {
        let decision = can_process(
            5.0,
            &plentiful_space(),
            0.0,
            0.0,
            &Totals { files: 0, volume_mb: 0.0 },
            &unlimited(),
            &Totals { files: 0, volume_mb: 0.0 },
            &unlimited(),
            false,
        );
        assert!(decision.admit);
    }

    #[test]
    fn test_daily_limit_zero_means_unlimited() {
        let decision = can_process(
            5.0,
            &plentiful_space(),
            0.0,
            0.0,
            &Totals { files: 1_000_000, volume_mb: 1_000_000.0 },
            &unlimited(),
            &Totals { files: 0, volume_mb: 0.0 },
            &unlimited(),
            false,
        );
        assert!(decision.admit);
    }

    #[test]
    fn test_exact_remaining_daily_volume_is_admitted() {
        let daily_limits = Limits { max_files: 0, max_volume_mb: 50.0 };
        let decision = can_process(
            10.0,
            &plentiful_space(),
            0.0,
            0.0,
            &Totals { files: 0, volume_mb: 40.0 },
            &daily_limits,
            &Totals { files: 0, volume_mb: 0.0 },
            &unlimited(),
            false,
        );
        assert!(decision.admit);
    }

    #[test]
    fn test_one_byte_larger_than_remaining_volume_is_refused() {
        let daily_limits = Limits { max_files: 0, max_volume_mb: 50.0 };
        let decision = can_process(
            10.000001,
            &plentiful_space(),
            0.0,
            0.0,
            &Totals { files: 0, volume_mb: 40.0 },
            &daily_limits,
            &Totals { files: 0, volume_mb: 0.0 },
            &unlimited(),
            false,
        );
        assert!(!decision.admit);
        assert!(decision.daily_limit_hit);
    }

    #[test]
    fn test_disk_error_is_stop_condition() {
        let decision = can_process(
            1.0,
            &plentiful_space(),
            0.0,
            0.0,
            &Totals { files: 0, volume_mb: 0.0 },
            &unlimited(),
            &Totals { files: 0, volume_mb: 0.0 },
            &unlimited(),
            true,
        );
        assert!(!decision.admit);
        assert!(decision.is_stop_condition());
    }

    #[test]
    fn test_hazard_only_shortage_blocks_admission() {
        let free_space = FreeSpace { quarantine_mb: 10_000.0, destination_mb: 10_000.0, hazard_mb: 0.1 };
        let decision = can_process(
            1.0,
            &free_space,
            0.0,
            0.0,
            &Totals { files: 0, volume_mb: 0.0 },
            &unlimited(),
            &Totals { files: 0, volume_mb: 0.0 },
            &unlimited(),
            false,
        );
        assert!(!decision.admit);
        assert!(!decision.hazard_ok);
        assert!(decision.quarantine_ok);
        assert!(decision.destination_ok);
    }
}
