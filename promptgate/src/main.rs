// promptgate/src/main.rs
//! PromptGate entry point.
//!
//! Resolves configuration, initializes logging, and dispatches subcommands.

use anyhow::{Context, Result};
use clap::Parser;

use promptgate::cli::{Cli, Command, DatasetsCommand};
use promptgate::{commands, logger};
use promptgate_core::ScannerConfig;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Cli::parse();

    if args.quiet {
        std::env::set_var("LOG_LEVEL", "error");
    }
    logger::init_logger();

    let config = match &args.config {
        Some(path) => ScannerConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => ScannerConfig::load_or_default()?,
    };

    let exit_code = match &args.command {
        Command::Scan(scan_args) => commands::scan::run(scan_args, config)?,
        Command::Datasets(dataset_args) => match &dataset_args.command {
            DatasetsCommand::Verify { paths } => commands::datasets::verify(paths, &config)?,
            DatasetsCommand::Sign { path, output } => {
                commands::datasets::sign(path, output.as_deref(), &config)?
            }
        },
        Command::Stats => commands::stats::run(&config)?,
    };

    std::process::exit(exit_code);
}
