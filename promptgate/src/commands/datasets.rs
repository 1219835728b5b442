// promptgate/src/commands/datasets.rs
//! Dataset verification and signing utilities.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use owo_colors::OwoColorize;

use promptgate_core::{sign_dataset, DatasetLoader, ScannerConfig};

/// Loads each dataset file and prints admission diagnostics. Any dataset that
/// fails to load (schema or signature) fails the command.
pub fn verify(paths: &[PathBuf], config: &ScannerConfig) -> Result<i32> {
    let loader = DatasetLoader::new(config)?;
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "dataset", "origin", "rules", "admitted", "quarantined", "signed", "ms",
    ]);

    let mut failures = 0usize;
    for path in paths {
        match loader.load_path(path) {
            Ok(outcome) => {
                let d = &outcome.diagnostics;
                table.add_row(vec![
                    Cell::new(&d.dataset),
                    Cell::new(&d.origin),
                    Cell::new(d.parsed_rules),
                    Cell::new(d.admitted),
                    Cell::new(d.quarantined_compile + d.quarantined_self_test),
                    Cell::new(if d.signature_verified { "yes" } else { "no" }),
                    Cell::new(d.load_time_ms),
                ]);
                for q in &outcome.quarantined {
                    eprintln!("  {} {}: {}", "quarantined".yellow(), q.id, q.reason);
                }
            }
            Err(err) => {
                failures += 1;
                eprintln!("{} {}: {}", "FAILED".red().bold(), path.display(), err);
            }
        }
    }

    println!("{table}");
    Ok(if failures > 0 { 1 } else { 0 })
}

/// Signs a dataset file with the configured HMAC secret.
pub fn sign(path: &Path, output: Option<&Path>, config: &ScannerConfig) -> Result<i32> {
    let secret = config
        .dataset_secret_bytes()?
        .context("No dataset secret configured. Set dataset_hmac_secret or PROMPTGATE_DATASET_KEY.")?;

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset file {}", path.display()))?;
    let signed = sign_dataset(&raw, &secret)?;

    let target = output.unwrap_or(path);
    std::fs::write(target, signed)
        .with_context(|| format!("Failed to write signed dataset to {}", target.display()))?;
    println!("Signed {} -> {}", path.display(), target.display());
    Ok(0)
}
