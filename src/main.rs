//! chimera-list - dCache Chimera Namespace Dump
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use chimera_list::config::{CliArgs, DumpConfig};
use chimera_list::pipeline;
use chimera_list::progress::{print_header, print_summary, ProgressReporter};
use chimera_list::store;
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.debug)?;

    // Validate and create config
    let config = DumpConfig::from_args(args).context("Invalid configuration")?;

    if config.show_progress {
        print_header(
            &config.source_display(),
            &config.dump.root,
            &config.dump.output.display().to_string(),
        );
    }

    let store = store::connect(&config.backends, &config.connect)
        .context("Connection to database failed")?;

    let progress = if config.show_progress {
        Some(ProgressReporter::new())
    } else {
        None
    };

    let result = pipeline::run(store, &config.dump, progress.as_ref());

    if let Some(ref p) = progress {
        match &result {
            Ok(_) => p.finish("Dump completed"),
            Err(_) => p.finish_and_clear(),
        }
    }

    let summary = result.context("Dump failed")?;
    info!(
        output = %summary.output.display(),
        files = summary.condense.map(|c| c.files).unwrap_or(summary.extract.written),
        "Dump finished"
    );

    if config.show_progress {
        print_summary(&summary);
    }

    Ok(())
}

fn setup_logging(debug: bool) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("chimera_list=debug,warn")
    } else {
        EnvFilter::new("chimera_list=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
