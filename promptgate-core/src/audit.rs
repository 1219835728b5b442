// promptgate-core/src/audit.rs
//! Redacted audit records and deterministic audit tokens.
//!
//! The redaction policy is strict: audit records and log lines carry rule
//! metadata and span hashes, never raw matched or normalized text. Raw text
//! exists in memory only for the duration of the request, for token
//! computation.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::verdict::{ScanRequest, ScanStatus};

lazy_static! {
    /// Initialized once to determine if raw content may appear in debug logs.
    static ref PII_DEBUG_ALLOWED: bool = {
        std::env::var("PROMPTGATE_ALLOW_DEBUG_PII")
            .map(|s| s.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    };
}

/// Which scanned source a record refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    User,
    External(usize),
    Combined,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::User => write!(f, "user"),
            SourceKind::External(i) => write!(f, "external[{}]", i),
            SourceKind::Combined => write!(f, "combined"),
        }
    }
}

/// A single, redacted audit entry for a scan decision or a shadow match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub status: ScanStatus,
    pub source_kind: Option<String>,
    pub rule_id: Option<String>,
    pub dataset: Option<String>,
    pub severity: Option<String>,
    pub match_span_hash: Option<String>,
    pub audit_token: String,
    pub rule_set_version: String,
    /// Set for canary-rule matches, which are recorded but never decide.
    pub shadow: bool,
}

/// Hashes the request content into a stable fingerprint. Metadata is
/// excluded: two requests with identical text sources fingerprint
/// identically.
pub fn request_fingerprint(request: &ScanRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.user_input.as_bytes());
    hasher.update([0u8]);
    for chunk in &request.external_chunks {
        hasher.update(chunk.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Derives the deterministic audit token for a decision.
///
/// The token binds (request fingerprint, rule-set version, matched rule or
/// none, truncated span hash) and is sufficient for traceability without
/// exposing content.
pub fn audit_token(
    fingerprint: &str,
    rule_set_version: &str,
    rule_id: Option<&str>,
    span_hash: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    hasher.update([0u8]);
    hasher.update(rule_set_version.as_bytes());
    hasher.update([0u8]);
    hasher.update(rule_id.unwrap_or("none").as_bytes());
    hasher.update([0u8]);
    let truncated = span_hash.map(|h| &h[..h.len().min(16)]).unwrap_or("none");
    hasher.update(truncated.as_bytes());
    hex::encode(hasher.finalize())
}

/// Replacement for sensitive content in any loggable string.
pub fn redact_sensitive(s: &str) -> String {
    const MAX_LEN: usize = 8;
    if s.len() <= MAX_LEN {
        "[REDACTED]".to_string()
    } else {
        format!("[REDACTED: {} chars]", s.len())
    }
}

/// Gate applied before any potentially sensitive string reaches a log line.
pub fn loggable_content(sensitive_content: &str) -> String {
    if *PII_DEBUG_ALLOWED {
        sensitive_content.to_string()
    } else {
        redact_sensitive(sensitive_content)
    }
}
