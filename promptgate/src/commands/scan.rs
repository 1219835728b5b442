// promptgate/src/commands/scan.rs
//! One-shot scan of text from an argument, file, or stdin.

use std::io::Read;

use anyhow::{Context, Result};
use is_terminal::IsTerminal;
use log::{debug, warn};
use owo_colors::OwoColorize;

use promptgate_core::{ScanRequest, ScanResult, ScanStatus, Scanner, ScannerConfig};

use crate::cli::ScanArgs;
use crate::commands::build_registry;

/// Runs one scan and renders the verdict. The exit code mirrors the status:
/// 0 for pass, 1 for warn/review/error, 2 for rejected.
pub fn run(args: &ScanArgs, mut config: ScannerConfig) -> Result<i32> {
    if args.ensemble {
        config.stop_on_first_match = false;
    }

    let user_input = read_user_input(args)?;
    let mut chunks = args.chunks.clone();
    for path in &args.chunk_files {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read chunk file {}", path.display()))?;
        chunks.push(decode_lossy(bytes, &path.display().to_string()));
    }

    let registry = build_registry(&config)?;
    let scanner = Scanner::new(config, registry)?;
    let request = ScanRequest::new(user_input).with_chunks(chunks);

    debug!(
        "Scanning request: {} bytes across {} sources.",
        request.total_bytes(),
        1 + request.external_chunks.len()
    );
    let result = scanner.scan(&request);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        render_human(&result);
    }

    Ok(exit_code(result.status))
}

fn read_user_input(args: &ScanArgs) -> Result<String> {
    if let Some(text) = &args.input {
        return Ok(text.clone());
    }
    if let Some(path) = &args.file {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read input file {}", path.display()))?;
        return Ok(decode_lossy(bytes, &path.display().to_string()));
    }
    if std::io::stdin().is_terminal() {
        anyhow::bail!("No input provided. Pass text, --file, or pipe stdin.");
    }
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read input from stdin")?;
    Ok(buffer)
}

/// Decodes file bytes, substituting U+FFFD for invalid sequences. The
/// normalizer raises `invalid_encoding_replaced` downstream; the warning here
/// names the offending source.
fn decode_lossy(bytes: Vec<u8>, origin: &str) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            warn!("{} contains invalid UTF-8; replacing bad sequences.", origin);
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    }
}

fn render_human(result: &ScanResult) {
    let status = result.status.as_str();
    match result.status {
        ScanStatus::Clean | ScanStatus::CleanCode => {
            println!("{}", status.green().bold());
        }
        ScanStatus::Warn | ScanStatus::ReviewRequired => {
            println!("{}", status.yellow().bold());
        }
        ScanStatus::Rejected | ScanStatus::Error => {
            println!("{}", status.red().bold());
        }
    }

    if let (Some(rule_id), Some(dataset)) = (&result.rule_id, &result.dataset) {
        let severity = result
            .severity
            .map(|s| s.as_str())
            .unwrap_or("unknown");
        println!("  rule:     {} ({}, {})", rule_id.bold(), dataset, severity);
    }
    if let Some(note) = &result.note {
        println!("  note:     {}", note);
    }
    println!("  rule set: {}", result.rule_set_version);
    println!("  token:    {}", result.audit_token);
    println!("  elapsed:  {} ms", result.processing_time_ms);
}

fn exit_code(status: ScanStatus) -> i32 {
    match status {
        ScanStatus::Clean | ScanStatus::CleanCode => 0,
        ScanStatus::Warn | ScanStatus::ReviewRequired | ScanStatus::Error => 1,
        ScanStatus::Rejected => 2,
    }
}
