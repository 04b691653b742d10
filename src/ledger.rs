//! Defender ledger gate (C12)
//!
//! Loads a YAML ledger of tested Defender versions and checks whether a
//! given version is listed with a passing test result.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger file not found: {0:?}")]
    NotFound(std::path::PathBuf),
    #[error("failed to parse ledger yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct LedgerDocument {
    defender: DefenderSection,
}

#[derive(Debug, Deserialize)]
struct DefenderSection {
    tested_versions: Vec<TestedVersion>,
}

#[derive(Debug, Deserialize)]
struct TestedVersion {
    version: String,
    test_result: String,
}

pub struct Ledger {
    tested_versions: Vec<TestedVersion>,
}

impl Ledger {
    pub fn load(ledger_file_path: &Path) -> Result<Self, LedgerError> {
        if !ledger_file_path.exists() {
            return Err(LedgerError::NotFound(ledger_file_path.to_path_buf()));
        }
        let text = fs::read_to_string(ledger_file_path)?;
        let doc: LedgerDocument = serde_yaml::from_str(&text)?;
        Ok(Self { tested_versions: doc.defender.tested_versions })
    }

    /// True iff `version` appears in the ledger with `test_result == "pass"`.
    pub fn is_version_tested(&self, version: &str) -> bool {
        self.tested_versions
            .iter()
            .any(|entry| entry.version == version && entry.test_result == "pass")
    }
}

/// Extracts the Defender product version from `mdatp version` output, e.g.
/// "Product version: 101.23456.789\n" -> "101.23456.789".
pub fn parse_mdatp_version(stdout: &str) -> Option<String> {
    let re = regex::Regex::new(r"Product version:\s*([\d.]+)").ok()?;
    re.captures(stdout)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_ledger(dir: &Path, content: &str) -> std::path::PathBuf {
        let path = dir.join("ledger.yaml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_is_version_tested_pass() {
        let dir = tempdir().unwrap();
        let path = write_ledger(
            &dir.path(),
            "defender:\n  tested_versions:\n    - version: \"101.1.1\"\n      test_result: pass\n",
        );
        let ledger = Ledger::load(&path).unwrap();
        assert!(ledger.is_version_tested("101.1.1"));
        assert!(!ledger.is_version_tested("999.9.9"));
    }

    #[test]
    fn test_is_version_tested_fail_result_not_accepted() {
        let dir = tempdir().unwrap();
        let path = write_ledger(
            &dir.path(),
            "defender:\n  tested_versions:\n    - version: \"101.1.1\"\n      test_result: fail\n",
        );
        let ledger = Ledger::load(&path).unwrap();
        assert!(!ledger.is_version_tested("101.1.1"));
    }

    #[test]
    fn test_missing_ledger_file_errors() {
        let dir = tempdir().unwrap();
        let result = Ledger::load(&dir.path().join("nope.yaml"));
        assert!(matches!(result, Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn test_parse_mdatp_version() {
        let stdout = "Product version: 101.23456.789\nSignatures version: 1.2.3\n";
        assert_eq!(parse_mdatp_version(stdout), Some("101.23456.789".to_string()));
    }
}
