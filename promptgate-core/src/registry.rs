// promptgate-core/src/registry.rs
//! Immutable, versioned snapshots of the admitted rule set.
//!
//! A snapshot is built once from load outcomes and never mutated afterwards,
//! apart from the relaxed telemetry counters on its rules. The scanner reads
//! snapshots through [`RegistryHandle`]; the reload controller is the sole
//! writer. Readers holding an old `Arc` keep it alive until they finish, so
//! in-flight scans never observe a half-installed rule set.
//!
//! License: MIT OR APACHE 2.0

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::dataset::DatasetMetadata;
use crate::loader::{LoadOutcome, QuarantinedRule};
use crate::rule::Rule;

/// Aggregate counters describing one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total_rules: usize,
    pub participating_rules: usize,
    pub quarantined_at_load: usize,
    pub total_datasets: usize,
    pub rules_per_dataset: BTreeMap<String, usize>,
    pub rules_per_severity: BTreeMap<String, usize>,
}

/// An immutable snapshot of admitted rules with a deterministic scan order.
#[derive(Debug)]
pub struct RuleRegistry {
    rules_by_id: HashMap<String, Arc<Rule>>,
    scan_order: Vec<Arc<Rule>>,
    version: String,
    load_timestamp: DateTime<Utc>,
    datasets: Vec<DatasetMetadata>,
    quarantined: Vec<QuarantinedRule>,
    stats: RegistryStats,
}

impl RuleRegistry {
    /// Builds a snapshot from per-dataset load outcomes.
    pub fn build(outcomes: Vec<LoadOutcome>) -> Self {
        let mut rules: Vec<Arc<Rule>> = Vec::new();
        let mut datasets = Vec::with_capacity(outcomes.len());
        let mut quarantined = Vec::new();

        for outcome in outcomes {
            datasets.push(outcome.metadata);
            quarantined.extend(outcome.quarantined);
            rules.extend(outcome.admitted.into_iter().map(Arc::new));
        }

        // Canonical order: severity weight descending, impact descending,
        // id ascending. Stop-on-first-match is deterministic because of it.
        rules.sort_by(|a, b| {
            b.severity
                .weight()
                .cmp(&a.severity.weight())
                .then_with(|| b.impact_score.total_cmp(&a.impact_score))
                .then_with(|| a.id.cmp(&b.id))
        });

        let version = compute_version(&rules, &datasets);

        let mut rules_per_dataset: BTreeMap<String, usize> = BTreeMap::new();
        let mut rules_per_severity: BTreeMap<String, usize> = BTreeMap::new();
        let mut participating = 0usize;
        for rule in &rules {
            *rules_per_dataset.entry(rule.dataset.clone()).or_default() += 1;
            *rules_per_severity
                .entry(rule.severity.as_str().to_string())
                .or_default() += 1;
            if rule.participates() {
                participating += 1;
            }
        }

        let stats = RegistryStats {
            total_rules: rules.len(),
            participating_rules: participating,
            quarantined_at_load: quarantined.len(),
            total_datasets: datasets.len(),
            rules_per_dataset,
            rules_per_severity,
        };

        let rules_by_id = rules
            .iter()
            .map(|rule| (rule.id.clone(), Arc::clone(rule)))
            .collect();

        Self {
            rules_by_id,
            scan_order: rules,
            version,
            load_timestamp: Utc::now(),
            datasets,
            quarantined,
            stats,
        }
    }

    /// An empty snapshot, used before the first successful load.
    pub fn empty() -> Self {
        Self::build(Vec::new())
    }

    /// Rules eligible for scanning, in canonical order.
    pub fn active_rules(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.scan_order.iter().filter(|rule| rule.participates())
    }

    pub fn lookup(&self, rule_id: &str) -> Option<&Arc<Rule>> {
        self.rules_by_id.get(rule_id)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn load_timestamp(&self) -> DateTime<Utc> {
        self.load_timestamp
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }

    pub fn datasets(&self) -> &[DatasetMetadata] {
        &self.datasets
    }

    pub fn quarantined(&self) -> &[QuarantinedRule] {
        &self.quarantined
    }

    pub fn total_rules(&self) -> usize {
        self.scan_order.len()
    }
}

/// Derives the snapshot version from the admitted rule ids, their patterns,
/// and the dataset build ids. The version changes iff one of those changes.
fn compute_version(rules: &[Arc<Rule>], datasets: &[DatasetMetadata]) -> String {
    let mut hasher = Sha256::new();

    let mut keyed: Vec<(&str, &str)> = rules
        .iter()
        .map(|r| (r.id.as_str(), r.pattern.as_str()))
        .collect();
    keyed.sort();
    for (id, pattern) in keyed {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
        hasher.update(pattern.as_bytes());
        hasher.update([0u8]);
    }

    let mut build_ids: Vec<&str> = datasets.iter().map(|d| d.dataset_build_id.as_str()).collect();
    build_ids.sort();
    for build_id in build_ids {
        hasher.update(build_id.as_bytes());
        hasher.update([1u8]);
    }

    let digest = hex::encode(hasher.finalize());
    format!("rs-{}", &digest[..16])
}

/// Shared handle to the current snapshot.
///
/// One owned instance is created at startup and passed into the scanner and
/// the reload controller; the controller is the only caller of [`install`].
///
/// [`install`]: RegistryHandle::install
#[derive(Debug)]
pub struct RegistryHandle {
    current: RwLock<Arc<RuleRegistry>>,
}

impl RegistryHandle {
    pub fn new(initial: RuleRegistry) -> Self {
        Self { current: RwLock::new(Arc::new(initial)) }
    }

    /// Returns the current snapshot. The caller keeps it for the whole scan;
    /// a concurrent reload does not affect it.
    pub fn snapshot(&self) -> Arc<RuleRegistry> {
        Arc::clone(&self.current.read().unwrap())
    }

    /// Atomically replaces the snapshot, returning the displaced one. The old
    /// snapshot is deallocated once the last in-flight reader drops its
    /// reference.
    pub fn install(&self, next: RuleRegistry) -> Arc<RuleRegistry> {
        let mut guard = self.current.write().unwrap();
        std::mem::replace(&mut *guard, Arc::new(next))
    }
}
