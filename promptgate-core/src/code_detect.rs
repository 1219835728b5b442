// promptgate-core/src/code_detect.rs
//! Heuristic classifier deciding whether normalized input is bona-fide source
//! code.
//!
//! Developer-assistant traffic routinely contains words like `system`,
//! `admin`, or `override` inside comments and string literals; the scanner
//! uses this verdict to bypass rule scanning for such input. The classifier
//! is a pure, deterministic function of the normalized text and never fails.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashSet;

/// Keyword tokens characteristic of structured code across mainstream
/// languages. Deliberately small; density is what matters, not coverage.
static CODE_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "fn", "def", "class", "struct", "enum", "impl", "trait", "interface",
        "import", "include", "require", "use", "package", "return", "yield",
        "let", "const", "var", "mut", "pub", "static", "void", "int", "bool",
        "float", "double", "string", "char", "if", "else", "elif", "for",
        "while", "match", "switch", "case", "break", "continue", "try",
        "catch", "except", "finally", "throw", "raise", "async", "await",
        "lambda", "function", "print", "println", "printf", "self", "this",
        "new", "null", "none", "nil", "true", "false",
    ]
    .into_iter()
    .collect()
});

const WEIGHT_FENCED: f64 = 0.30;
const WEIGHT_INDENT: f64 = 0.20;
const WEIGHT_KEYWORDS: f64 = 0.25;
const WEIGHT_PUNCTUATION: f64 = 0.15;
const WEIGHT_NO_PROSE: f64 = 0.10;

/// Individual signal scores, each in [0, 1], before weighting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CodeSignals {
    pub fenced_block: f64,
    pub indent_ratio: f64,
    pub keyword_density: f64,
    pub punctuation_density: f64,
    pub prose_absence: f64,
}

/// Classification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CodeVerdict {
    pub confidence: f64,
    pub is_code: bool,
    pub signals: CodeSignals,
}

/// Weighted-heuristic code classifier.
#[derive(Debug, Clone, Copy)]
pub struct CodeDetector {
    threshold: f64,
}

impl CodeDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold: threshold.clamp(0.0, 1.0) }
    }

    /// Scores `text` and applies the configured threshold.
    pub fn classify(&self, text: &str) -> CodeVerdict {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return CodeVerdict { confidence: 0.0, is_code: false, signals: CodeSignals::default() };
        }

        let signals = CodeSignals {
            fenced_block: fenced_block_score(trimmed),
            indent_ratio: indent_ratio(trimmed),
            keyword_density: keyword_density(trimmed),
            punctuation_density: punctuation_density(trimmed),
            prose_absence: prose_absence(trimmed),
        };

        let confidence = (WEIGHT_FENCED * signals.fenced_block
            + WEIGHT_INDENT * signals.indent_ratio
            + WEIGHT_KEYWORDS * signals.keyword_density
            + WEIGHT_PUNCTUATION * signals.punctuation_density
            + WEIGHT_NO_PROSE * signals.prose_absence)
            .clamp(0.0, 1.0);

        CodeVerdict { confidence, is_code: confidence >= self.threshold, signals }
    }
}

/// Full score for a complete triple-backtick (or tilde) fence; half for an
/// unterminated opener.
fn fenced_block_score(text: &str) -> f64 {
    let fences = text
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            t.starts_with("```") || t.starts_with("~~~")
        })
        .count();
    match fences {
        0 => 0.0,
        1 => 0.5,
        _ => 1.0,
    }
}

/// Share of non-empty lines starting with structural indentation, scaled so
/// that half the lines indented saturates the signal.
fn indent_ratio(text: &str) -> f64 {
    let mut indented = 0usize;
    let mut non_empty = 0usize;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        non_empty += 1;
        if line.starts_with("    ") || line.starts_with('\t') {
            indented += 1;
        }
    }
    if non_empty == 0 {
        0.0
    } else {
        (indented as f64 / non_empty as f64 * 2.0).min(1.0)
    }
}

/// Density of language keywords among word tokens, scaled so that roughly one
/// keyword in four tokens saturates the signal.
fn keyword_density(text: &str) -> f64 {
    let mut tokens = 0usize;
    let mut keywords = 0usize;
    for token in text.split(|c: char| !c.is_ascii_alphanumeric() && c != '_') {
        if token.is_empty() {
            continue;
        }
        tokens += 1;
        if CODE_KEYWORDS.contains(token) {
            keywords += 1;
        }
    }
    if tokens == 0 {
        return 0.0;
    }
    (keywords as f64 / tokens as f64 * 4.0).min(1.0)
}

/// Density of punctuation typical of code, scaled so that one such character
/// per eight saturates the signal.
fn punctuation_density(text: &str) -> f64 {
    let total = text.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return 0.0;
    }
    let punct = text
        .chars()
        .filter(|c| matches!(c, '{' | '}' | '(' | ')' | '[' | ']' | ';' | '=' | ':' | '<' | '>' | '#'))
        .count();
    (punct as f64 / total as f64 * 8.0).min(1.0)
}

/// Fraction of non-empty lines that do not end like natural-language
/// sentences.
fn prose_absence(text: &str) -> f64 {
    let mut lines = 0usize;
    let mut unterminated = 0usize;
    for line in text.lines() {
        let t = line.trim_end();
        if t.is_empty() {
            continue;
        }
        lines += 1;
        if !t.ends_with('.') && !t.ends_with('!') && !t.ends_with('?') {
            unterminated += 1;
        }
    }
    if lines == 0 {
        0.0
    } else {
        unterminated as f64 / lines as f64
    }
}
