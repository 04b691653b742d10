//! Scanner adapters (C2)
//!
//! Uniform invocation of external AV commands; parse exit code + stdout
//! into a `ScanVerdict`.

use crate::types::ScanVerdict;
use std::path::Path;
use std::process::Command;
use std::time::Instant;

const THREAT_FOUND: &str = "Threat(s) found";
const FILE_NOT_FOUND_SUFFIX: &str = "\n\t0 file(s) scanned\n\t0 threat(s) detected";
const NO_THREATS_SUFFIX: &str = "\n\t0 threat(s) detected";

/// Which command name is actually configured for Defender invocation.
/// When it diverges from the real binary name, the caller is running
/// against a simulator and every notification must carry a visible banner.
pub struct DefenderAdapter {
    pub command: String,
}

impl DefenderAdapter {
    pub const REAL_COMMAND: &'static str = "mdatp";

    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }

    pub fn is_using_simulator(&self) -> bool {
        self.command != Self::REAL_COMMAND
    }

    pub fn scan(&self, path: &Path) -> ScanResult {
        let args = ["scan", "custom", "--ignore-exclusions", "--path"];
        run_scan(&self.command, &args, path, parse_defender_result)
    }
}

/// Result of a single scanner invocation: the verdict plus raw diagnostics
/// useful for logging.
pub struct ScanResult {
    pub verdict: ScanVerdict,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub elapsed_ms: u128,
}

fn run_scan(
    command: &str,
    fixed_args: &[&str],
    path: &Path,
    parser: impl Fn(Option<i32>, &str) -> ScanVerdict,
) -> ScanResult {
    let started = Instant::now();
    let output = Command::new(command).args(fixed_args).arg(path).output();
    let elapsed_ms = started.elapsed().as_millis();

    match output {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let exit_code = output.status.code();
            let verdict = parser(exit_code, &stdout);
            ScanResult { verdict, exit_code, stdout, elapsed_ms }
        }
        Err(e) => ScanResult {
            verdict: ScanVerdict::ScanFailed,
            exit_code: None,
            stdout: format!("failed to invoke scanner {}: {}", command, e),
            elapsed_ms,
        },
    }
}

/// The threat substring is checked *before* the clean suffix so a malicious
/// filename echoed into stdout cannot mask a real detection.
fn parse_defender_result(exit_code: Option<i32>, stdout: &str) -> ScanVerdict {
    if exit_code != Some(0) {
        return ScanVerdict::ScanFailed;
    }
    if stdout.contains(THREAT_FOUND) {
        return ScanVerdict::Suspect;
    }
    if stdout.ends_with(FILE_NOT_FOUND_SUFFIX) {
        return ScanVerdict::NotFound;
    }
    if stdout.ends_with(NO_THREATS_SUFFIX) {
        return ScanVerdict::Clean;
    }
    ScanVerdict::ScanFailed
}

pub struct ClamAvAdapter {
    pub command: String,
}

impl ClamAvAdapter {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }

    pub fn scan(&self, path: &Path) -> ScanResult {
        run_scan(&self.command, &["--fdpass"], path, parse_clamav_result)
    }
}

fn parse_clamav_result(exit_code: Option<i32>, _stdout: &str) -> ScanVerdict {
    match exit_code {
        Some(0) => ScanVerdict::Clean,
        Some(1) => ScanVerdict::Suspect,
        _ => ScanVerdict::ScanFailed,
    }
}

/// Whether a Defender `NotFound` verdict should be treated as a handled
/// suspect (the scanner quarantined the file itself) rather than a failure.
pub fn resolve_defender_notfound(defender_handles_suspect_files: bool) -> ScanVerdict {
    if defender_handles_suspect_files {
        ScanVerdict::Suspect
    } else {
        ScanVerdict::ScanFailed
    }
}
