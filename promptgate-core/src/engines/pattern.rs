// promptgate-core/src/engines/pattern.rs
//! Safe pattern compilation and execution with catastrophic-backtracking
//! defense.
//!
//! The primary engine is the linear-time `regex` crate with a compiled-size
//! limit. Patterns it rejects for feature reasons (look-around,
//! backreferences) are retried on `fancy-regex` under a backtrack limit, so a
//! pathological pattern aborts deterministically instead of burning CPU.
//! Match records carry a hash of the matched span, never the span itself.
//!
//! License: MIT OR APACHE 2.0

use std::time::{Duration, Instant};

use regex::RegexBuilder;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::MAX_PATTERN_LENGTH;

/// 10 MB limit for a compiled linear-engine program.
const REGEX_SIZE_LIMIT: usize = 10 * (1 << 20);

/// Backtracking steps allowed before the fallback engine aborts a search.
const DEFAULT_BACKTRACK_LIMIT: usize = 1_000_000;

/// Raised when a pattern cannot be compiled by either engine.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("pattern length {0} exceeds maximum allowed ({1})")]
    TooLong(usize, usize),

    #[error("rejected by linear engine ({linear}) and fallback engine ({fallback})")]
    Unsupported { linear: String, fallback: String },
}

/// Raised when a search exceeds its wall-clock or backtracking budget.
#[derive(Debug, Error)]
#[error("pattern execution exceeded its {0} ms budget")]
pub struct SearchTimeout(pub u64);

/// The first match of a pattern in a text.
///
/// `span_hash` is a SHA-256 over the matched substring; the substring itself
/// never leaves the search call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRecord {
    pub start: usize,
    pub end: usize,
    pub span_hash: String,
}

/// A pattern compiled into one of the two engines.
#[derive(Debug, Clone)]
pub enum CompiledPattern {
    Linear(regex::Regex),
    Backtracking(Box<fancy_regex::Regex>),
}

impl CompiledPattern {
    pub fn engine_name(&self) -> &'static str {
        match self {
            CompiledPattern::Linear(_) => "linear",
            CompiledPattern::Backtracking(_) => "backtracking",
        }
    }

    /// Finds the first match in `text` within `timeout`.
    ///
    /// A backtrack-limit abort or wall-clock overrun reports as
    /// [`SearchTimeout`]; the caller decides what "no answer" means.
    pub fn search(&self, text: &str, timeout: Duration) -> Result<Option<MatchRecord>, SearchTimeout> {
        let budget_ms = timeout.as_millis() as u64;
        let started = Instant::now();

        let found = match self {
            CompiledPattern::Linear(re) => re.find(text).map(|m| (m.start(), m.end())),
            CompiledPattern::Backtracking(re) => match re.find(text) {
                Ok(found) => found.map(|m| (m.start(), m.end())),
                // Backtrack-limit and other runtime aborts count as budget
                // exhaustion, not as scan failures.
                Err(_) => return Err(SearchTimeout(budget_ms)),
            },
        };

        if started.elapsed() > timeout {
            return Err(SearchTimeout(budget_ms));
        }

        Ok(found.map(|(start, end)| MatchRecord {
            start,
            end,
            span_hash: span_hash(&text[start..end]),
        }))
    }
}

/// Computes the SHA-256 hex digest of a matched span.
pub fn span_hash(span: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(span.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compiler for detection patterns. Construct once and reuse across a load.
#[derive(Debug, Clone)]
pub struct PatternEngine {
    max_pattern_length: usize,
    backtrack_limit: usize,
}

impl Default for PatternEngine {
    fn default() -> Self {
        Self {
            max_pattern_length: MAX_PATTERN_LENGTH,
            backtrack_limit: DEFAULT_BACKTRACK_LIMIT,
        }
    }
}

impl PatternEngine {
    /// Compiles `pattern`, preferring the linear engine.
    pub fn compile(&self, pattern: &str) -> Result<CompiledPattern, PatternError> {
        if pattern.len() > self.max_pattern_length {
            return Err(PatternError::TooLong(pattern.len(), self.max_pattern_length));
        }

        let linear_err = match RegexBuilder::new(pattern)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
        {
            Ok(re) => return Ok(CompiledPattern::Linear(re)),
            Err(e) => e,
        };

        match fancy_regex::RegexBuilder::new(pattern)
            .backtrack_limit(self.backtrack_limit)
            .build()
        {
            Ok(re) => Ok(CompiledPattern::Backtracking(Box::new(re))),
            Err(fallback_err) => Err(PatternError::Unsupported {
                linear: linear_err.to_string(),
                fallback: fallback_err.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENEROUS: Duration = Duration::from_secs(5);

    #[test]
    fn plain_patterns_use_the_linear_engine() {
        let compiled = PatternEngine::default()
            .compile(r"(?i)ignore (all )?previous instructions")
            .unwrap();
        assert_eq!(compiled.engine_name(), "linear");
    }

    #[test]
    fn lookaround_patterns_fall_back() {
        let compiled = PatternEngine::default()
            .compile(r"ignore (?=previous)")
            .unwrap();
        assert_eq!(compiled.engine_name(), "backtracking");
    }

    #[test]
    fn garbage_patterns_fail_both_engines() {
        let err = PatternEngine::default().compile(r"(unclosed").unwrap_err();
        assert!(matches!(err, PatternError::Unsupported { .. }));
    }

    #[test]
    fn overlong_patterns_are_rejected_up_front() {
        let engine = PatternEngine::default();
        let pattern = "a".repeat(MAX_PATTERN_LENGTH + 1);
        assert!(matches!(
            engine.compile(&pattern),
            Err(PatternError::TooLong(_, MAX_PATTERN_LENGTH))
        ));
    }

    #[test]
    fn search_returns_span_and_hash_only() {
        let compiled = PatternEngine::default().compile(r"secret\w+").unwrap();
        let record = compiled
            .search("the secretplan is here", GENEROUS)
            .unwrap()
            .unwrap();
        assert_eq!(record.start, 4);
        assert_eq!(record.end, 14);
        assert_eq!(record.span_hash, span_hash("secretplan"));
        assert_eq!(record.span_hash.len(), 64);
    }

    #[test]
    fn search_misses_cleanly() {
        let compiled = PatternEngine::default().compile(r"jailbreak").unwrap();
        assert_eq!(compiled.search("harmless", GENEROUS).unwrap(), None);
    }

    #[test]
    fn catastrophic_backtracking_reports_timeout() {
        // Backreference forces the fallback engine; the nested quantifier
        // then exhausts the backtrack limit on a non-matching suffix.
        let compiled = PatternEngine::default().compile(r"(a+)+b\1").unwrap();
        assert_eq!(compiled.engine_name(), "backtracking");
        let adversarial = format!("{}c", "a".repeat(64));
        let err = compiled.search(&adversarial, Duration::from_millis(100));
        assert!(err.is_err());
    }

    #[test]
    fn identical_spans_hash_identically() {
        assert_eq!(span_hash("ignore previous"), span_hash("ignore previous"));
        assert_ne!(span_hash("ignore previous"), span_hash("ignore prior"));
    }
}
