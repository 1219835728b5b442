// promptgate-core/src/rule.rs
//! Rule model: the compiled detection unit held by a registry snapshot.
//!
//! A [`Rule`] is immutable once admitted, apart from its relaxed atomic
//! telemetry counters (`match_count`, `last_matched_at`) and the runtime
//! quarantine latch used by the repeated-timeout defense. Exact serialization
//! of counter updates is not required; occasional lost updates are acceptable.
//!
//! License: MIT OR APACHE 2.0

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::engines::CompiledPattern;

/// Security severity of a rule. Ordering drives the canonical scan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Weight used for canonical ordering: critical=4, high=3, medium=2, low=1.
    pub fn weight(self) -> u8 {
        match self {
            Severity::Critical => 4,
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
        }
    }

    /// Default impact score applied when a dataset omits `impact_score`.
    pub fn default_impact(self) -> f64 {
        match self {
            Severity::Critical => 0.9,
            Severity::High => 0.75,
            Severity::Medium => 0.5,
            Severity::Low => 0.25,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

/// Lifecycle state of a rule within its dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleState {
    Draft,
    Testing,
    Canary,
    Active,
    Deprecated,
    Quarantined,
}

impl RuleState {
    /// Only active and canary rules take part in scans.
    pub fn participates(self) -> bool {
        matches!(self, RuleState::Active | RuleState::Canary)
    }
}

/// Relaxed telemetry counters attached to every admitted rule.
#[derive(Debug, Default)]
pub struct RuleCounters {
    match_count: AtomicU64,
    /// Epoch milliseconds of the most recent match; 0 means never matched.
    last_matched_at: AtomicI64,
    timeout_strikes: AtomicU32,
    runtime_quarantined: AtomicBool,
}

/// A compiled detection unit admitted into a registry snapshot.
#[derive(Debug)]
pub struct Rule {
    pub id: String,
    pub dataset: String,
    pub name: String,
    pub description: String,
    /// Original pattern text as authored in the dataset.
    pub pattern: String,
    pub compiled: CompiledPattern,
    pub severity: Severity,
    pub state: RuleState,
    pub enabled: bool,
    /// Contribution to the ensemble score, clamped to 0..=1 at load time.
    pub impact_score: f64,
    pub tags: BTreeSet<String>,
    pub positive_tests: Vec<String>,
    pub negative_tests: Vec<String>,
    counters: RuleCounters,
}

impl Rule {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        dataset: String,
        name: String,
        description: String,
        pattern: String,
        compiled: CompiledPattern,
        severity: Severity,
        state: RuleState,
        enabled: bool,
        impact_score: f64,
        tags: BTreeSet<String>,
        positive_tests: Vec<String>,
        negative_tests: Vec<String>,
    ) -> Self {
        Self {
            id,
            dataset,
            name,
            description,
            pattern,
            compiled,
            severity,
            state,
            enabled,
            impact_score: impact_score.clamp(0.0, 1.0),
            tags,
            positive_tests,
            negative_tests,
            counters: RuleCounters::default(),
        }
    }

    /// Whether this rule takes part in scans against the current snapshot.
    pub fn participates(&self) -> bool {
        self.enabled && self.state.participates() && !self.is_runtime_quarantined()
    }

    /// Canary rules match in shadow: recorded, never terminal.
    pub fn is_shadow(&self) -> bool {
        self.state == RuleState::Canary
    }

    pub fn record_match(&self, now_epoch_ms: i64) {
        self.counters.match_count.fetch_add(1, Ordering::Relaxed);
        self.counters.last_matched_at.store(now_epoch_ms, Ordering::Relaxed);
    }

    /// Records a pattern timeout. Once `strike_limit` strikes accumulate the
    /// rule is quarantined for the remainder of the snapshot's life; returns
    /// `true` the first time that threshold is crossed.
    pub fn record_timeout(&self, strike_limit: u32) -> bool {
        let strikes = self.counters.timeout_strikes.fetch_add(1, Ordering::Relaxed) + 1;
        if strikes >= strike_limit.max(1) {
            !self.counters.runtime_quarantined.swap(true, Ordering::Relaxed)
        } else {
            false
        }
    }

    pub fn is_runtime_quarantined(&self) -> bool {
        self.counters.runtime_quarantined.load(Ordering::Relaxed)
    }

    pub fn match_count(&self) -> u64 {
        self.counters.match_count.load(Ordering::Relaxed)
    }

    /// Epoch milliseconds of the last match, or `None` if the rule has never matched.
    pub fn last_matched_at(&self) -> Option<i64> {
        match self.counters.last_matched_at.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn timeout_strikes(&self) -> u32 {
        self.counters.timeout_strikes.load(Ordering::Relaxed)
    }
}
