// promptgate/src/commands/stats.rs
//! Registry statistics for the configured datasets.

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use owo_colors::OwoColorize;

use promptgate_core::ScannerConfig;

use crate::commands::build_registry;

/// Loads the configured datasets and prints snapshot statistics.
pub fn run(config: &ScannerConfig) -> Result<i32> {
    let handle = build_registry(config)?;
    let snapshot = handle.snapshot();
    let stats = snapshot.stats();

    println!(
        "rule set {} loaded {}",
        snapshot.version().bold(),
        snapshot.load_timestamp().to_rfc3339()
    );
    println!(
        "{} rules ({} participating, {} quarantined at load) across {} datasets",
        stats.total_rules,
        stats.participating_rules,
        stats.quarantined_at_load,
        stats.total_datasets
    );

    let mut per_dataset = Table::new();
    per_dataset
        .load_preset(UTF8_FULL)
        .set_header(vec!["dataset", "rules"]);
    for (dataset, count) in &stats.rules_per_dataset {
        per_dataset.add_row(vec![dataset.clone(), count.to_string()]);
    }
    println!("{per_dataset}");

    let mut per_severity = Table::new();
    per_severity
        .load_preset(UTF8_FULL)
        .set_header(vec!["severity", "rules"]);
    for (severity, count) in &stats.rules_per_severity {
        per_severity.add_row(vec![severity.clone(), count.to_string()]);
    }
    println!("{per_severity}");

    Ok(0)
}
