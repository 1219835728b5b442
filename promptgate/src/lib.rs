// promptgate/src/lib.rs
//! # PromptGate CLI
//!
//! This crate provides the command-line surface for the PromptGate scanning
//! engine: one-shot scans, dataset verification and signing, and registry
//! statistics. All scanning logic lives in `promptgate-core`.

pub mod cli;
pub mod commands;
pub mod logger;
