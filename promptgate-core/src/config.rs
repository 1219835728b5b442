//! Configuration management for `promptgate-core`.
//!
//! This module defines the typed scanner configuration, its defaults, YAML
//! loading, and validation. Unknown configuration keys are rejected at load
//! time so that typos fail loudly instead of silently weakening the scanner.
//!
//! License: MIT OR Apache-2.0

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use promptgate_prefilter::DEFAULT_KEYWORDS;

/// Maximum allowed length for a regex pattern string.
pub const MAX_PATTERN_LENGTH: usize = 500;

/// Top-level scanner configuration.
///
/// Every option maps to a behavior described in the external interface
/// contract; defaults are the fail-closed production values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScannerConfig {
    /// Per-pattern wall-clock ceiling in milliseconds.
    pub regex_timeout_ms: u64,
    /// Timeouts tolerated per rule before runtime quarantine.
    pub regex_timeout_strikes: u32,
    /// Terminal verdict at the first matched rule; otherwise ensemble scoring.
    pub stop_on_first_match: bool,
    /// Ensemble score cutoff separating REJECTED from WARN.
    pub ensemble_threshold: f64,
    /// Whether the combined source contributes to the ensemble score.
    pub ensemble_include_combined: bool,
    /// Enables the keyword fast path.
    pub prefilter_enabled: bool,
    /// Keyword set fed to the multi-pattern matcher. Must stay a superset of
    /// the literal anchors present in active rules, or the fast path is unsound.
    pub prefilter_keywords: Vec<String>,
    /// Enables the code bypass for `user_input`.
    pub code_detection_enabled: bool,
    /// Confidence threshold for the `is_code` verdict.
    pub code_confidence_threshold: f64,
    /// Hex-encoded secret for dataset integrity verification.
    pub dataset_hmac_secret: Option<String>,
    /// Ordered list of dataset files to load.
    pub dataset_paths: Vec<PathBuf>,
    /// Load the datasets embedded in the library in addition to `dataset_paths`.
    pub use_embedded_datasets: bool,
    /// Errors produce CLEAN instead of REVIEW_REQUIRED. Development only.
    pub fail_open: bool,
    /// Oversize gate for the whole request, in bytes.
    pub max_input_bytes: usize,
    /// Overall wall-clock budget for one scan, in milliseconds.
    pub scan_deadline_ms: u64,
    /// Whitespace runs longer than this collapse to a single space.
    pub max_whitespace_run: usize,
    /// Bytes of the raw input retained as the `original` snapshot.
    pub original_snapshot_bytes: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            regex_timeout_ms: 100,
            regex_timeout_strikes: 3,
            stop_on_first_match: true,
            ensemble_threshold: 0.8,
            ensemble_include_combined: true,
            prefilter_enabled: true,
            prefilter_keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            code_detection_enabled: true,
            code_confidence_threshold: 0.7,
            dataset_hmac_secret: None,
            dataset_paths: Vec::new(),
            use_embedded_datasets: true,
            fail_open: false,
            max_input_bytes: 1024 * 1024,
            scan_deadline_ms: 500,
            max_whitespace_run: 4,
            original_snapshot_bytes: 4096,
        }
    }
}

impl ScannerConfig {
    /// Loads scanner configuration from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading scanner configuration from: {}", path.display());
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: ScannerConfig = serde_yml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Candidate locations probed for a named configuration file.
    pub fn candidate_paths(name: &str) -> Vec<PathBuf> {
        let base_dirs = vec![
            dirs::home_dir().map(|p| p.join(".promptgate")),
            dirs::config_dir().map(|p| p.join("promptgate")),
            Some(PathBuf::from("/etc/promptgate")),
            Some(PathBuf::from("./config")),
        ];

        base_dirs
            .into_iter()
            .flatten()
            .map(|dir| dir.join(format!("{}.yaml", name)))
            .collect()
    }

    /// Loads `scanner.yaml` from the first candidate path that exists, or the
    /// defaults when no file is present.
    pub fn load_or_default() -> Result<Self> {
        match Self::candidate_paths("scanner").into_iter().find(|p| p.exists()) {
            Some(path) => Self::load_from_file(path),
            None => {
                debug!("No scanner.yaml found in candidate paths; using defaults.");
                Ok(Self::default())
            }
        }
    }

    /// Checks internal consistency of the option values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.regex_timeout_ms > 0, "regex_timeout_ms must be > 0");
        anyhow::ensure!(self.scan_deadline_ms > 0, "scan_deadline_ms must be > 0");
        anyhow::ensure!(self.max_input_bytes > 0, "max_input_bytes must be > 0");
        anyhow::ensure!(self.max_whitespace_run >= 1, "max_whitespace_run must be >= 1");
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.ensemble_threshold),
            "ensemble_threshold must be within 0..=1"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.code_confidence_threshold),
            "code_confidence_threshold must be within 0..=1"
        );
        if self.prefilter_enabled && self.prefilter_keywords.is_empty() {
            anyhow::bail!("prefilter_enabled requires a non-empty prefilter_keywords set");
        }
        if self.fail_open {
            warn!("fail_open is set: scan errors will produce CLEAN. Development only.");
        }
        Ok(())
    }

    /// Resolves the dataset verification secret: the config value wins,
    /// falling back to the `PROMPTGATE_DATASET_KEY` environment variable.
    /// Returns the decoded key bytes, or `None` when no secret is configured.
    pub fn dataset_secret_bytes(&self) -> Result<Option<Vec<u8>>> {
        let hex_value = match &self.dataset_hmac_secret {
            Some(v) => Some(v.clone()),
            None => std::env::var("PROMPTGATE_DATASET_KEY").ok(),
        };
        match hex_value {
            Some(key_hex) => {
                let bytes = hex::decode(key_hex.trim()).context(
                    "Failed to decode dataset HMAC secret from hex. Make sure it's a valid hex string.",
                )?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_fail_closed() {
        let config = ScannerConfig::default();
        assert!(!config.fail_open);
        assert!(config.stop_on_first_match);
        assert!(config.prefilter_enabled);
        assert_eq!(config.regex_timeout_ms, 100);
        assert_eq!(config.scan_deadline_ms, 500);
        assert_eq!(config.max_input_bytes, 1024 * 1024);
        config.validate().unwrap();
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = "regex_timeout_ms: 50\nno_such_option: true\n";
        let parsed: Result<ScannerConfig, _> = serde_yml::from_str(text);
        assert!(parsed.is_err());
    }

    #[test]
    fn partial_files_inherit_defaults() {
        let text = "scan_deadline_ms: 250\n";
        let parsed: ScannerConfig = serde_yml::from_str(text).unwrap();
        assert_eq!(parsed.scan_deadline_ms, 250);
        assert_eq!(parsed.regex_timeout_ms, 100);
    }

    #[test]
    fn validation_rejects_bad_thresholds() {
        let mut config = ScannerConfig::default();
        config.ensemble_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = ScannerConfig::default();
        config.prefilter_keywords.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn secret_decodes_from_hex() {
        let mut config = ScannerConfig::default();
        config.dataset_hmac_secret = Some("00ff10".to_string());
        assert_eq!(config.dataset_secret_bytes().unwrap(), Some(vec![0x00, 0xff, 0x10]));

        let mut config = ScannerConfig::default();
        config.dataset_hmac_secret = Some("not-hex".to_string());
        assert!(config.dataset_secret_bytes().is_err());
    }
}
