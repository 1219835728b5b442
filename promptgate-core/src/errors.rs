//! errors.rs - The error taxonomy of the scanning engine.
//!
//! Every failure the engine can signal falls into one of four families, and
//! each family has a fixed disposition: request-scoped gates (oversize
//! inputs, blown scan deadlines) map to a `ScanResult` status rather than
//! propagating; dataset integrity failures (bad schema, HMAC mismatch,
//! missing verification secret) reject the whole dataset and, fail-closed,
//! abort the reload; rule-scoped failures (compilation, self-tests)
//! quarantine only the offending rule; pattern-execution budgets
//! (per-pattern timeout) count as no-match and feed the strike counter.
//!
//! License: MIT OR APACHE 2.0

use thiserror::Error;

/// Everything that can go wrong between accepting a request and admitting a
/// rule set. The enum is `#[non_exhaustive]` because the scan and load paths
/// grow new failure modes faster than callers should have to chase them;
/// match the variants whose disposition you handle and funnel the rest to
/// the fail-closed default.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GateError {
    #[error("request size {size} bytes exceeds the configured limit of {limit} bytes")]
    InputOversize { size: usize, limit: usize },

    #[error("normalizer input of {size} bytes exceeds the configured limit of {limit} bytes")]
    NormalizerOversize { size: usize, limit: usize },

    #[error("dataset '{0}' failed schema validation: {1}")]
    DatasetSchemaInvalid(String, String),

    #[error("dataset '{0}' failed HMAC signature verification")]
    DatasetHmacMismatch(String),

    #[error("dataset '{0}' is signed but no verification secret is configured")]
    DatasetSecretMissing(String),

    #[error("failed to compile rule '{0}': {1}")]
    RuleCompilationError(String, String),

    #[error("rule '{0}': pattern length ({1}) exceeds maximum allowed ({2})")]
    PatternLengthExceeded(String, usize, usize),

    #[error("rule '{rule_id}' failed its {kind} self-test on case {case}")]
    RuleSelfTestFailed {
        rule_id: String,
        kind: &'static str,
        case: usize,
    },

    #[error("pattern execution exceeded its {0} ms budget")]
    RegexTimeout(u64),

    #[error("scan exceeded its {0} ms deadline")]
    ScanDeadlineExceeded(u64),

    #[error("an unexpected I/O error occurred: {0}")]
    IoError(#[from] std::io::Error),

    #[error("a critical system error occurred: {0}")]
    AnyhowWrapper(#[from] anyhow::Error),

    #[error("a fatal error occurred: {0}")]
    Fatal(String),
}
