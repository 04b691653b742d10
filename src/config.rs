//! Configuration (C9)
//!
//! Three-layer resolver: CLI flag > settings-file value > built-in default.
//! The settings file is a minimal INI dialect (`[section]` headers,
//! `key = value` lines, `#`/`;` comments) — hand-rolled in the style of
//! this crate's other small line-oriented parsers rather than pulling in
//! an `ini` crate for a handful of fields.

use anyhow::{bail, Result};
use clap::Parser;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::types::RunConfig;

#[derive(Parser, Debug)]
#[command(name = "shuttle", version, about = "File intake sanitizer: scan, route, and archive untrusted files")]
pub struct Cli {
    #[arg(long)]
    pub source_path: Option<PathBuf>,
    #[arg(long)]
    pub destination_path: Option<PathBuf>,
    #[arg(long)]
    pub quarantine_path: Option<PathBuf>,

    #[arg(long)]
    pub hazard_archive_path: Option<PathBuf>,
    #[arg(long)]
    pub hazard_encryption_key_path: Option<PathBuf>,

    #[arg(long)]
    pub delete_source_files_after_copying: bool,
    #[arg(long)]
    pub max_scan_threads: Option<usize>,

    #[arg(long)]
    pub on_demand_defender: bool,
    #[arg(long)]
    pub on_demand_clam_av: bool,
    #[arg(long)]
    pub defender_handles_suspect_files: bool,

    #[arg(long)]
    pub throttle: bool,
    #[arg(long)]
    pub throttle_free_space_mb: Option<u64>,
    #[arg(long)]
    pub throttle_max_file_count_per_day: Option<u64>,
    #[arg(long)]
    pub throttle_max_file_volume_per_day_mb: Option<f64>,
    #[arg(long)]
    pub throttle_max_file_count_per_run: Option<u64>,
    #[arg(long)]
    pub throttle_max_file_volume_per_run_mb: Option<f64>,

    #[arg(long)]
    pub daily_processing_tracker_logs_path: Option<PathBuf>,

    #[arg(long)]
    pub skip_stability_check: bool,
    #[arg(long)]
    pub mock_free_space_mb: Option<f64>,
    #[arg(long)]
    pub mock_free_space_quarantine_mb: Option<f64>,
    #[arg(long)]
    pub mock_free_space_destination_mb: Option<f64>,
    #[arg(long)]
    pub mock_free_space_hazard_mb: Option<f64>,

    #[arg(long)]
    pub lock_file: Option<PathBuf>,
    #[arg(long)]
    pub defender_ledger_path: Option<PathBuf>,

    #[arg(long)]
    pub recipient_email: Option<String>,
    #[arg(long)]
    pub recipient_email_error: Option<String>,
    #[arg(long)]
    pub recipient_email_summary: Option<String>,
    #[arg(long)]
    pub recipient_email_hazard: Option<String>,
    #[arg(long)]
    pub smtp_server: Option<String>,
    #[arg(long)]
    pub smtp_port: Option<u16>,
    #[arg(long)]
    pub smtp_username: Option<String>,
    #[arg(long)]
    pub smtp_password: Option<String>,
    #[arg(long)]
    pub smtp_use_tls: bool,
    #[arg(long)]
    pub notify_summary: bool,
    #[arg(long)]
    pub log_path: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,

    #[arg(long)]
    pub config_file: Option<PathBuf>,
}

/// A parsed `[section] key = value` settings file.
#[derive(Debug, Default)]
struct SettingsFile {
    sections: HashMap<String, HashMap<String, String>>,
}

impl SettingsFile {
    fn parse(text: &str) -> Self {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current = String::from("default");
        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                current = line[1..line.len() - 1].trim().to_string();
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                sections
                    .entry(current.clone())
                    .or_default()
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Self { sections }
    }

    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section)?.get(key).map(|s| s.as_str())
    }
}

fn load_settings_file() -> SettingsFile {
    let candidates = search_paths();
    for path in candidates {
        if path.exists() {
            if let Ok(text) = fs::read_to_string(&path) {
                return SettingsFile::parse(&text);
            }
        }
    }
    SettingsFile::default()
}

fn search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(explicit) = env::var("SHUTTLE_CONFIG_PATH") {
        paths.push(PathBuf::from(explicit));
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/shuttle/config.conf"));
        paths.push(home.join(".shuttle/config.conf"));
        paths.push(home.join(".shuttle/settings.ini"));
    }
    paths.push(PathBuf::from("/etc/shuttle/config.conf"));
    paths.push(PathBuf::from("/usr/local/etc/shuttle/config.conf"));
    paths
}

fn setting_str(
    cli_value: &Option<String>,
    file: &SettingsFile,
    section: &str,
    key: &str,
) -> Option<String> {
    cli_value.clone().or_else(|| file.get(section, key).map(|s| s.to_string()))
}

fn setting_path(
    cli_value: &Option<PathBuf>,
    file: &SettingsFile,
    section: &str,
    key: &str,
) -> Option<PathBuf> {
    cli_value.clone().or_else(|| file.get(section, key).map(PathBuf::from))
}

fn setting_u64(cli_value: Option<u64>, file: &SettingsFile, section: &str, key: &str, default: u64) -> u64 {
    cli_value
        .or_else(|| file.get(section, key).and_then(|s| s.parse().ok()))
        .unwrap_or(default)
}

fn setting_f64(cli_value: Option<f64>, file: &SettingsFile, section: &str, key: &str, default: f64) -> f64 {
    cli_value
        .or_else(|| file.get(section, key).and_then(|s| s.parse().ok()))
        .unwrap_or(default)
}

fn setting_bool(cli_value: bool, file: &SettingsFile, section: &str, key: &str) -> bool {
    cli_value || file.get(section, key).map(|s| s == "true" || s == "1").unwrap_or(false)
}

/// Resolves the fully-typed `RunConfig` from CLI flags, settings file, and
/// defaults. Required paths raise a configuration error if unresolved.
pub fn resolve(cli: &Cli) -> Result<RunConfig> {
    let file = load_settings_file();

    let source_path = setting_path(&cli.source_path, &file, "paths", "source_path");
    let destination_path = setting_path(&cli.destination_path, &file, "paths", "destination_path");
    let quarantine_path = setting_path(&cli.quarantine_path, &file, "paths", "quarantine_path");
    let tracker_logs_path = setting_path(
        &cli.daily_processing_tracker_logs_path,
        &file,
        "paths",
        "daily_processing_tracker_logs_path",
    );

    let (source_path, destination_path, quarantine_path) = match (source_path, destination_path, quarantine_path) {
        (Some(s), Some(d), Some(q)) => (s, d, q),
        (None, _, _) => bail!("source path is required"),
        (_, None, _) => bail!("destination path is required"),
        (_, _, None) => bail!("quarantine path is required"),
    };

    let tracker_logs_path = match tracker_logs_path {
        Some(p) => p,
        None => bail!("output path for daily processing tracker is required"),
    };

    let lock_file = setting_path(&cli.lock_file, &file, "paths", "lock_path")
        .unwrap_or_else(|| PathBuf::from("/tmp/shuttle.lock"));

    Ok(RunConfig {
        source_path,
        destination_path,
        quarantine_path,
        hazard_archive_path: setting_path(&cli.hazard_archive_path, &file, "paths", "hazard_archive_path"),
        hazard_encryption_key_path: setting_path(
            &cli.hazard_encryption_key_path,
            &file,
            "paths",
            "hazard_encryption_key_path",
        ),
        delete_source_files: setting_bool(
            cli.delete_source_files_after_copying,
            &file,
            "settings",
            "delete_source_files_after_copying",
        ),
        max_scan_threads: setting_u64(cli.max_scan_threads.map(|v| v as u64), &file, "settings", "max_scan_threads", 1)
            as usize,
        on_demand_defender: setting_bool(cli.on_demand_defender, &file, "settings", "on_demand_defender"),
        on_demand_clam_av: setting_bool(cli.on_demand_clam_av, &file, "settings", "on_demand_clam_av"),
        defender_handles_suspect_files: setting_bool(
            cli.defender_handles_suspect_files,
            &file,
            "settings",
            "defender_handles_suspect_files",
        ),
        throttle: setting_bool(cli.throttle, &file, "settings", "throttle"),
        throttle_free_space_mb: setting_u64(
            cli.throttle_free_space_mb,
            &file,
            "settings",
            "throttle_free_space_mb",
            10_000,
        ),
        throttle_max_file_count_per_day: setting_u64(
            cli.throttle_max_file_count_per_day,
            &file,
            "settings",
            "throttle_max_file_count_per_day",
            0,
        ),
        throttle_max_file_volume_per_day_mb: setting_f64(
            cli.throttle_max_file_volume_per_day_mb,
            &file,
            "settings",
            "throttle_max_file_volume_per_day_mb",
            0.0,
        ),
        throttle_max_file_count_per_run: setting_u64(
            cli.throttle_max_file_count_per_run,
            &file,
            "settings",
            "throttle_max_file_count_per_run",
            1000,
        ),
        throttle_max_file_volume_per_run_mb: setting_f64(
            cli.throttle_max_file_volume_per_run_mb,
            &file,
            "settings",
            "throttle_max_file_volume_per_run_mb",
            1024.0,
        ),
        daily_processing_tracker_logs_path: tracker_logs_path,
        skip_stability_check: cli.skip_stability_check,
        mock_free_space_mb: cli.mock_free_space_mb,
        mock_free_space_quarantine_mb: cli.mock_free_space_quarantine_mb,
        mock_free_space_destination_mb: cli.mock_free_space_destination_mb,
        mock_free_space_hazard_mb: cli.mock_free_space_hazard_mb,
        lock_file,
        defender_ledger_path: setting_path(&cli.defender_ledger_path, &file, "paths", "defender_ledger_path"),
        recipient_email: setting_str(&cli.recipient_email, &file, "notify", "recipient_email"),
        recipient_email_error: setting_str(&cli.recipient_email_error, &file, "notify", "recipient_email_error"),
        recipient_email_summary: setting_str(&cli.recipient_email_summary, &file, "notify", "recipient_email_summary"),
        recipient_email_hazard: setting_str(&cli.recipient_email_hazard, &file, "notify", "recipient_email_hazard"),
        smtp_server: setting_str(&cli.smtp_server, &file, "notify", "smtp_server"),
        smtp_port: setting_u64(cli.smtp_port.map(|v| v as u64), &file, "notify", "smtp_port", 25) as u16,
        smtp_username: setting_str(&cli.smtp_username, &file, "notify", "smtp_username"),
        smtp_password: setting_str(&cli.smtp_password, &file, "notify", "smtp_password"),
        smtp_use_tls: setting_bool(cli.smtp_use_tls, &file, "notify", "smtp_use_tls"),
        notify_summary: setting_bool(cli.notify_summary, &file, "notify", "notify_summary"),
        log_path: setting_path(&cli.log_path, &file, "logging", "log_path"),
        log_level: setting_str(&cli.log_level, &file, "logging", "log_level").unwrap_or_else(|| "info".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_file_parses_sections_and_comments() {
        let text = "# comment\n[paths]\nsource_path = /src\n; also a comment\n[settings]\nthrottle = true\n";
        let file = SettingsFile::parse(text);
        assert_eq!(file.get("paths", "source_path"), Some("/src"));
        assert_eq!(file.get("settings", "throttle"), Some("true"));
    }

    #[test]
    fn test_cli_precedence_over_file() {
        let file = SettingsFile::parse("[settings]\nmax_scan_threads = 4\n");
        let resolved = setting_u64(Some(8), &file, "settings", "max_scan_threads", 1);
        assert_eq!(resolved, 8);
    }

    #[test]
    fn test_file_used_when_cli_absent() {
        let file = SettingsFile::parse("[settings]\nmax_scan_threads = 4\n");
        let resolved = setting_u64(None, &file, "settings", "max_scan_threads", 1);
        assert_eq!(resolved, 4);
    }

    #[test]
    fn test_default_used_when_neither_present() {
        let file = SettingsFile::default();
        let resolved = setting_u64(None, &file, "settings", "max_scan_threads", 1);
        assert_eq!(resolved, 1);
    }
}
