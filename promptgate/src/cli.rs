// promptgate/src/cli.rs
//! Command-line interface definition for PromptGate.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// PromptGate: layer-0 input scanning for LLM pipelines.
///
/// Scans user text and untrusted retrieved chunks for prompt-injection and
/// jailbreak patterns before they reach a model, failing closed on error.
#[derive(Parser, Debug)]
#[command(
    name = "promptgate",
    author = "Relay Team",
    version,
    about = "Scan LLM input for prompt-injection and jailbreak patterns",
    arg_required_else_help = true,
)]
pub struct Cli {
    /// Path to a scanner configuration file (YAML).
    #[arg(long, short = 'c', global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Suppress informational logging.
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan input text (argument, file, or stdin) against the rule sets.
    Scan(ScanArgs),
    /// Inspect, verify, or sign rule dataset files.
    Datasets(DatasetsArgs),
    /// Print registry statistics for the configured datasets.
    Stats,
}

#[derive(clap::Args, Debug)]
pub struct ScanArgs {
    /// Text to scan. Reads stdin when omitted and stdin is piped.
    pub input: Option<String>,

    /// Read the user input from a file instead.
    #[arg(long, short = 'f', value_name = "FILE", conflicts_with = "input")]
    pub file: Option<PathBuf>,

    /// Externally-sourced chunk to scan alongside the input. Repeatable.
    #[arg(long = "chunk", value_name = "TEXT")]
    pub chunks: Vec<String>,

    /// Read an external chunk from a file. Repeatable.
    #[arg(long = "chunk-file", value_name = "FILE")]
    pub chunk_files: Vec<PathBuf>,

    /// Evaluate every rule and aggregate an ensemble score instead of
    /// stopping at the first match.
    #[arg(long)]
    pub ensemble: bool,

    /// Emit the raw ScanResult as JSON instead of the human summary.
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug)]
pub struct DatasetsArgs {
    #[command(subcommand)]
    pub command: DatasetsCommand,
}

#[derive(Subcommand, Debug)]
pub enum DatasetsCommand {
    /// Load dataset files and report admission / quarantine diagnostics.
    Verify {
        /// Dataset files to verify.
        #[arg(required = true, value_name = "FILE")]
        paths: Vec<PathBuf>,
    },
    /// Compute and embed the HMAC signature of a dataset file.
    Sign {
        /// Dataset file to sign.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Write the signed document here instead of updating in place.
        #[arg(long, short = 'o', value_name = "FILE")]
        output: Option<PathBuf>,
    },
}
