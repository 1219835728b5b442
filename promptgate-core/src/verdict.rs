// promptgate-core/src/verdict.rs
//! The externally observable scan contract: request and result payloads for
//! the `/scan` surface, plus the health report shape.
//!
//! License: MIT OR APACHE 2.0

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::rule::Severity;

/// Version string stamped into every `ScanResult`.
pub const SCANNER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Terminal status of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    Clean,
    CleanCode,
    Rejected,
    Warn,
    ReviewRequired,
    Error,
}

impl ScanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Clean => "CLEAN",
            ScanStatus::CleanCode => "CLEAN_CODE",
            ScanStatus::Rejected => "REJECTED",
            ScanStatus::Warn => "WARN",
            ScanStatus::ReviewRequired => "REVIEW_REQUIRED",
            ScanStatus::Error => "ERROR",
        }
    }

    pub const ALL: [ScanStatus; 6] = [
        ScanStatus::Clean,
        ScanStatus::CleanCode,
        ScanStatus::Rejected,
        ScanStatus::Warn,
        ScanStatus::ReviewRequired,
        ScanStatus::Error,
    ];
}

/// One `/scan` request: user text plus optional externally-sourced chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub user_input: String,
    #[serde(default)]
    pub external_chunks: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ScanRequest {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self { user_input: user_input.into(), ..Self::default() }
    }

    pub fn with_chunks(mut self, chunks: Vec<String>) -> Self {
        self.external_chunks = chunks;
        self
    }

    /// Total payload size counted against the oversize gate.
    pub fn total_bytes(&self) -> usize {
        self.user_input.len() + self.external_chunks.iter().map(String::len).sum::<usize>()
    }
}

/// One `/scan` response.
///
/// `rule_id`, `dataset`, and `severity` are populated exactly when the status
/// is `REJECTED` or `WARN`. The audit token is deterministic for identical
/// inputs against the same rule-set snapshot and never encodes raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub status: ScanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub audit_token: String,
    pub processing_time_ms: u64,
    pub rule_set_version: String,
    pub scanner_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Liveness surface: current snapshot identity and size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub rule_set_version: String,
    pub total_rules: usize,
    pub total_datasets: usize,
}
