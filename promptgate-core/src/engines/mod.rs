// promptgate-core/src/engines/mod.rs
//! Pattern execution engines.
//!
//! Patterns compile into the linear-time engine whenever their feature set
//! allows it; look-around and backreference patterns fall back to a
//! bounded-backtracking engine. Searching is guarded by a wall-clock budget
//! either way.

pub mod pattern;

pub use pattern::{CompiledPattern, MatchRecord, PatternEngine, PatternError, SearchTimeout};
