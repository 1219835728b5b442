// promptgate-prefilter/src/keywords/mod.rs

/// Default keyword anchors for prompt-injection and jailbreak phrasing.
///
/// The set must stay a superset of the literal anchors of every active rule,
/// otherwise the prefilter fast path would skip scannable input. Keywords are
/// matched case-insensitively as substrings, so singular forms cover plurals
/// ("instruction" covers "instructions"). Generic entries cost only a wasted
/// regex pass on a false hit; a missing entry costs a missed detection.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "ignore",
    "disregard",
    "forget",
    "override",
    "overwrite",
    "replace",
    "bypass",
    "system prompt",
    "initial prompt",
    "prompt",
    "instruction",
    "rule",
    "guideline",
    "previous",
    "jailbreak",
    "jail",
    "dan",
    "do anything now",
    "do anything",
    "developer mode",
    "god mode",
    "mode",
    "roleplay",
    "pretend",
    "persona",
    "you are now",
    "from now on",
    "reveal",
    "repeat",
    "verbatim",
    "word for word",
    "confidential",
    "secret",
    "admin",
    "sudo",
    "unrestricted",
    "uncensored",
    "unfiltered",
    "no limitations",
    "without restrictions",
    "restriction",
    "limitation",
    "censorship",
    "filter",
    "hypothetically",
    "simulate",
    "act as",
    "from the user",
];
