//! Dump pipeline
//!
//! Runs the stages strictly one after another, each consuming the file its
//! predecessor finished writing:
//!
//! ```text
//! store ─► resolve root ─► extract ─► <output>.raw ─► sort ─► <output>.sorted ─► condense ─► <output>
//!                                          │
//!                                          └── raw mode: renamed to <output>
//! ```
//!
//! Intermediate files are owned by [`TempArtifact`]s, so whichever stage
//! fails, neither `.raw` nor `.sorted` is left behind.

use crate::artifact::{artifact_path, TempArtifact};
use crate::condense::{condense_file, CondenseStats};
use crate::error::{Result, StageError};
use crate::extract::{extract_raw, ExtractOptions, ExtractStats};
use crate::progress::ProgressReporter;
use crate::resolver::{canonical_root, CacheStats, PathResolver};
use crate::sort::{sort_raw, SortOptions};
use crate::store::MetadataStore;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// What to dump and where
#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// Logical root directory, e.g. `/pnfs`
    pub root: String,
    /// Final output file; intermediates are written next to it
    pub output: PathBuf,
    /// Stop after extraction and keep the raw listing
    pub raw: bool,
    pub extract: ExtractOptions,
    pub sort: SortOptions,
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct DumpSummary {
    pub output: PathBuf,
    pub output_size: Option<u64>,
    pub extract: ExtractStats,
    pub cache: CacheStats,
    /// `None` in raw mode
    pub condense: Option<CondenseStats>,
    pub duration: Duration,
}

/// Run the whole dump against an open store
///
/// The store is closed as soon as extraction ends, before sorting starts.
pub fn run(
    store: Box<dyn MetadataStore>,
    options: &DumpOptions,
    progress: Option<&ProgressReporter>,
) -> Result<DumpSummary> {
    let start = Instant::now();

    let mut resolver = PathResolver::new(store);
    let extracted = extract(&mut resolver, options, progress);
    let cache = resolver.stats();
    if let Err(e) = resolver.into_store().close() {
        warn!(error = %e, "Failed to close database connection");
    }
    let (raw, extract_stats) = extracted?;

    if options.raw {
        raw.persist(&options.output).map_err(|source| StageError::Rename {
            from: raw_path(options),
            to: options.output.clone(),
            source,
        })?;
        info!(output = %options.output.display(), "Raw dump written");
        return Ok(summary(options, extract_stats, cache, None, start));
    }

    info!("Processing started");
    if let Some(p) = progress {
        p.set_status("Sorting raw dump...");
    }
    let sorted = sort_raw(raw, artifact_path(&options.output, "sorted"), &options.sort)?;

    if let Some(p) = progress {
        p.set_status("Condensing sorted dump...");
    }
    let condensed = condense_file(sorted, &options.output)?;
    info!("Processing finished");

    Ok(summary(options, extract_stats, cache, Some(condensed), start))
}

fn raw_path(options: &DumpOptions) -> PathBuf {
    artifact_path(&options.output, "raw")
}

fn extract(
    resolver: &mut PathResolver,
    options: &DumpOptions,
    progress: Option<&ProgressReporter>,
) -> Result<(TempArtifact, ExtractStats)> {
    let root = resolver.resolve_root(&options.root)?;
    info!(root = %options.root, inumber = %root, "Rootdir resolved");
    resolver.seed(root, canonical_root(&options.root));

    if let Some(p) = progress {
        p.set_status("Dumping namespace...");
    }
    extract_raw(resolver, &options.extract, raw_path(options), progress)
}

fn summary(
    options: &DumpOptions,
    extract: ExtractStats,
    cache: CacheStats,
    condense: Option<CondenseStats>,
    start: Instant,
) -> DumpSummary {
    DumpSummary {
        output: options.output.clone(),
        output_size: fs::metadata(&options.output).ok().map(|m| m.len()),
        extract,
        cache,
        condense,
        duration: start.elapsed(),
    }
}
