//! Progress reporting for a dump run
//!
//! Provides a spinner during extraction and a summary at the end, using
//! indicatif progress bars.

use crate::extract::ExtractProgress;
use crate::pipeline::DumpSummary;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner showing extraction progress and stage status
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("Invalid progress template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Reporter that keeps its state but never draws
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Current status line
    pub fn message(&self) -> String {
        self.bar.message()
    }

    /// Update the display with extraction counters
    pub fn update(&self, progress: &ExtractProgress) {
        let msg = format!(
            "Rows: {} | Written: {} | Dirs: {} | Rate: {:.0}/s",
            format_number(progress.scanned),
            format_number(progress.written),
            format_number(progress.dirs as u64),
            progress.rows_per_second(),
        );

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .rev()
                .map(|&b| b as char)
                .collect::<String>()
        })
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of the dump
pub fn print_summary(summary: &DumpSummary) {
    let extract = &summary.extract;
    let secs = summary.duration.as_secs_f64();
    let rate = if secs > 0.0 {
        extract.scanned as f64 / secs
    } else {
        0.0
    };

    println!();
    println!("{}", style("Dump Complete").green().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Rows:").bold(), format_number(extract.scanned));
    println!("  {} {}", style("Written:").bold(), format_number(extract.written));
    if extract.unresolved > 0 {
        println!(
            "  {} {}",
            style("Unresolved:").yellow().bold(),
            format_number(extract.unresolved)
        );
    }
    if extract.filtered > 0 {
        println!("  {} {}", style("Filtered:").bold(), format_number(extract.filtered));
    }
    if let Some(condensed) = &summary.condense {
        println!(
            "  {} {} in {} directories",
            style("Files:").bold(),
            format_number(condensed.files),
            format_number(condensed.dirs)
        );
    }
    println!("  {} {}", style("Total Size:").bold(), format_size(extract.bytes, BINARY));
    println!(
        "  {} {:.1}s ({:.0} rows/sec)",
        style("Duration:").bold(),
        secs,
        rate
    );
    match summary.output_size {
        Some(size) => println!(
            "  {} {} ({})",
            style("Output:").bold(),
            summary.output.display(),
            format_size(size, BINARY)
        ),
        None => println!("  {} {}", style("Output:").bold(), summary.output.display()),
    }
    println!();
}

/// Print a header at the start of the dump
pub fn print_header(source: &str, root: &str, output: &str) {
    println!();
    println!(
        "{} {}",
        style("chimera-list").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Source:").bold(), source);
    println!("  {} {}", style("Root:").bold(), root);
    println!("  {} {}", style("Output:").bold(), output);
    println!();
}
