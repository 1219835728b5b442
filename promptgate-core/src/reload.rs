// promptgate-core/src/reload.rs
//! Atomic installation of new registry snapshots.
//!
//! A reload loads every configured dataset, builds a candidate snapshot, and
//! swaps it in through the shared handle. Any dataset failure aborts the
//! whole reload in fail-closed mode, leaving the previous snapshot in force;
//! fail-open mode skips integrity failures with a loud warning instead.
//! In-flight scans keep the snapshot they started with either way.
//!
//! License: MIT OR APACHE 2.0

use std::sync::Arc;
use std::time::Instant;

use log::{error, info, warn};
use serde::Serialize;

use crate::config::ScannerConfig;
use crate::errors::GateError;
use crate::loader::{DatasetLoader, LoadDiagnostics, LoadOutcome};
use crate::registry::{RegistryHandle, RuleRegistry};
use crate::telemetry::ScannerMetrics;

/// Outcome of a reload attempt, returned to the `/datasets/reload` caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadReport {
    pub status: ReloadStatus,
    pub rule_set_version: String,
    pub total_rules: usize,
    pub reload_time_ms: u64,
    pub diagnostics: Vec<LoadDiagnostics>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadStatus {
    Success,
    Failure,
}

/// Single writer for the registry handle.
pub struct ReloadController {
    config: ScannerConfig,
    handle: Arc<RegistryHandle>,
    loader: DatasetLoader,
    metrics: Option<Arc<ScannerMetrics>>,
}

impl ReloadController {
    pub fn new(config: ScannerConfig, handle: Arc<RegistryHandle>) -> anyhow::Result<Self> {
        let loader = DatasetLoader::new(&config)?;
        Ok(Self { config, handle, loader, metrics: None })
    }

    /// Attaches scan telemetry so reload failures are counted.
    pub fn with_metrics(mut self, metrics: Arc<ScannerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Loads all configured datasets and installs the candidate snapshot.
    ///
    /// On error the previous snapshot stays installed and the error is
    /// returned to the operator.
    pub fn reload(&self) -> Result<ReloadReport, GateError> {
        let result = self.try_reload();
        if result.is_err() {
            if let Some(metrics) = &self.metrics {
                metrics.record_reload_failure();
            }
        }
        result
    }

    fn try_reload(&self) -> Result<ReloadReport, GateError> {
        let started = Instant::now();
        let mut outcomes: Vec<LoadOutcome> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        if self.config.use_embedded_datasets {
            outcomes.extend(self.loader.load_embedded()?);
        }

        for path in &self.config.dataset_paths {
            match self.loader.load_path(path) {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) if self.config.fail_open && is_integrity_failure(&err) => {
                    error!(
                        "Skipping dataset {} after integrity failure (fail-open): {}",
                        path.display(),
                        err
                    );
                    warnings.push(format!("skipped {}: {}", path.display(), err));
                }
                Err(err) => {
                    warn!("Reload aborted; keeping the current snapshot: {}", err);
                    return Err(err);
                }
            }
        }

        let diagnostics: Vec<LoadDiagnostics> =
            outcomes.iter().map(|o| o.diagnostics.clone()).collect();
        let candidate = RuleRegistry::build(outcomes);
        let version = candidate.version().to_string();
        let total_rules = candidate.total_rules();

        let displaced = self.handle.install(candidate);
        info!(
            "Installed rule set {} ({} rules, {} datasets); displaced {}.",
            version,
            total_rules,
            diagnostics.len(),
            displaced.version()
        );

        Ok(ReloadReport {
            status: ReloadStatus::Success,
            rule_set_version: version,
            total_rules,
            reload_time_ms: started.elapsed().as_millis() as u64,
            diagnostics,
            warnings,
        })
    }

    /// Formats a failed reload as the `/datasets/reload` failure payload,
    /// reporting the snapshot still in force.
    pub fn failure_report(&self, err: &GateError, reload_time_ms: u64) -> ReloadReport {
        let current = self.handle.snapshot();
        ReloadReport {
            status: ReloadStatus::Failure,
            rule_set_version: current.version().to_string(),
            total_rules: current.total_rules(),
            reload_time_ms,
            diagnostics: Vec::new(),
            warnings: vec![err.to_string()],
        }
    }
}

/// Failures that fail-open mode may skip: tampered or unverifiable datasets.
fn is_integrity_failure(err: &GateError) -> bool {
    matches!(
        err,
        GateError::DatasetHmacMismatch(_) | GateError::DatasetSecretMissing(_)
    )
}
