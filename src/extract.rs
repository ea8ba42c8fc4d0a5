//! Raw namespace extraction
//!
//! Streams every (file, location) row out of the store, resolves the parent
//! directory through the [`PathResolver`] and writes one tab-separated line
//! per row:
//!
//! ```text
//! /pnfs/data/f1<TAB>0000F1<TAB>ck1<TAB>10<TAB>100<TAB>pool-A
//! ```
//!
//! Rows whose parent directory is no longer reachable are dropped. When a
//! pattern is set, lines not containing it are dropped too. Row order is
//! whatever the store delivers.

use crate::artifact::TempArtifact;
use crate::error::{Result, StageError};
use crate::progress::ProgressReporter;
use crate::resolver::PathResolver;
use crate::store::FileRow;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Write buffer for the raw file
const WRITE_BUFFER_SIZE: usize = 1 << 20;

/// Rows between progress updates
const PROGRESS_INTERVAL: u64 = 10_000;

/// Settings for one extraction
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Substring every written line must contain
    pub pattern: Option<String>,
    /// Rows fetched from the store per batch
    pub batch_size: usize,
}

/// Counters for one extraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    /// Rows delivered by the store
    pub scanned: u64,
    /// Lines written to the raw file
    pub written: u64,
    /// Rows dropped because the parent directory could not be resolved
    pub unresolved: u64,
    /// Rows dropped by the pattern
    pub filtered: u64,
    /// Sum of sizes of the written rows
    pub bytes: u64,
}

/// Progress snapshot for display
#[derive(Debug, Clone, Default)]
pub struct ExtractProgress {
    pub scanned: u64,
    pub written: u64,
    pub dirs: usize,
    pub elapsed: Duration,
}

impl ExtractProgress {
    pub fn rows_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.scanned as f64 / secs
        } else {
            0.0
        }
    }
}

/// Format one raw line, including the trailing newline
pub fn format_raw_line(buf: &mut String, parent_path: &str, row: &FileRow) {
    buf.clear();
    let sep = if parent_path.ends_with('/') { "" } else { "/" };
    // Writing to a String cannot fail
    let _ = writeln!(
        buf,
        "{}{}{}\t{}\t{}\t{}\t{}\t{}",
        parent_path, sep, row.name, row.pnfsid, row.checksum, row.size, row.atime, row.location
    );
}

/// Extract the namespace into `path`
///
/// Returns the raw file as a [`TempArtifact`]. On any error the partially
/// written file is removed before the error is returned.
pub fn extract_raw(
    resolver: &mut PathResolver,
    options: &ExtractOptions,
    path: PathBuf,
    progress: Option<&ProgressReporter>,
) -> Result<(TempArtifact, ExtractStats)> {
    let artifact = TempArtifact::new(path);
    let stats = write_raw(resolver, options, &artifact, progress)?;
    Ok((artifact, stats))
}

fn write_raw(
    resolver: &mut PathResolver,
    options: &ExtractOptions,
    artifact: &TempArtifact,
    progress: Option<&ProgressReporter>,
) -> Result<ExtractStats> {
    let io_err = |source| StageError::Extract {
        path: artifact.path().to_path_buf(),
        source,
    };

    let file = File::create(artifact.path()).map_err(io_err)?;
    let mut out = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

    let start = Instant::now();
    let mut stats = ExtractStats::default();
    let mut line = String::with_capacity(256);

    info!("Namespace dump started");
    resolver.open_files(options.batch_size)?;

    while let Some(batch) = resolver.next_files()? {
        for row in batch {
            stats.scanned += 1;

            if stats.scanned % PROGRESS_INTERVAL == 0 {
                if let Some(p) = progress {
                    p.update(&ExtractProgress {
                        scanned: stats.scanned,
                        written: stats.written,
                        dirs: resolver.cached_dirs(),
                        elapsed: start.elapsed(),
                    });
                }
            }

            match resolver.parent_path(row.parent)? {
                Some(parent_path) => format_raw_line(&mut line, parent_path, &row),
                None => {
                    stats.unresolved += 1;
                    continue;
                }
            }

            if let Some(pattern) = &options.pattern {
                if !line.contains(pattern.as_str()) {
                    stats.filtered += 1;
                    continue;
                }
            }

            out.write_all(line.as_bytes()).map_err(io_err)?;
            stats.written += 1;
            stats.bytes += row.size;
        }
    }

    out.flush().map_err(io_err)?;
    out.into_inner()
        .map_err(|e| io_err(e.into_error()))?
        .sync_all()
        .map_err(io_err)?;

    let cache = resolver.stats();
    debug!(
        hits = cache.hits,
        misses = cache.misses,
        unresolved = cache.unresolved,
        dirs = resolver.cached_dirs(),
        "Path cache statistics"
    );
    info!(
        scanned = stats.scanned,
        written = stats.written,
        unresolved = stats.unresolved,
        filtered = stats.filtered,
        elapsed = ?start.elapsed(),
        "Namespace dump finished"
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::tests::MemoryStore;
    use crate::store::Inumber;
    use std::fs;
    use tempfile::tempdir;

    fn row(name: &str, parent: i64, location: &str) -> FileRow {
        FileRow {
            pnfsid: format!("ID-{}", name),
            name: name.into(),
            parent: Inumber(parent),
            size: 10,
            location: location.into(),
            atime: 100,
            checksum: "CK".into(),
        }
    }

    fn resolver_with(files: Vec<FileRow>) -> PathResolver {
        let mut store = MemoryStore::with_dirs();
        store.files = files;
        PathResolver::new(Box::new(store))
    }

    fn options(pattern: Option<&str>) -> ExtractOptions {
        ExtractOptions {
            pattern: pattern.map(str::to_string),
            batch_size: 2,
        }
    }

    #[test]
    fn test_format_raw_line() {
        let mut buf = String::new();
        format_raw_line(&mut buf, "/a", &row("f1", 2, "group=pool-A&x"));
        assert_eq!(buf, "/a/f1\tID-f1\tCK\t10\t100\tgroup=pool-A&x\n");

        format_raw_line(&mut buf, "/", &row("top", 1, "pool-B"));
        assert_eq!(buf, "/top\tID-top\tCK\t10\t100\tpool-B\n");
    }

    #[test]
    fn test_extract_writes_one_line_per_location() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.raw");
        let mut resolver = resolver_with(vec![
            row("f1", 2, "pool-A"),
            row("f1", 2, "pool-B"),
            row("g1", 3, "pool-C"),
        ]);

        let (artifact, stats) = extract_raw(&mut resolver, &options(None), path.clone(), None).unwrap();
        let content = fs::read_to_string(artifact.path()).unwrap();
        assert_eq!(
            content,
            "/a/f1\tID-f1\tCK\t10\t100\tpool-A\n\
             /a/f1\tID-f1\tCK\t10\t100\tpool-B\n\
             /a/b/g1\tID-g1\tCK\t10\t100\tpool-C\n"
        );
        assert_eq!(stats.scanned, 3);
        assert_eq!(stats.written, 3);
        assert_eq!(stats.bytes, 30);
        assert_eq!(resolver.stats().misses, 2);
    }

    #[test]
    fn test_unresolved_parent_is_dropped() {
        let dir = tempdir().unwrap();
        let mut resolver = resolver_with(vec![row("orphan", 99, "pool-A"), row("f1", 2, "pool-A")]);

        let (artifact, stats) =
            extract_raw(&mut resolver, &options(None), dir.path().join("out.raw"), None).unwrap();
        let content = fs::read_to_string(artifact.path()).unwrap();
        assert!(!content.contains("orphan"));
        assert_eq!(stats.unresolved, 1);
        assert_eq!(stats.written, 1);
    }

    #[test]
    fn test_empty_parent_path_is_dropped() {
        let dir = tempdir().unwrap();
        let mut store = MemoryStore::with_dirs();
        store.paths.insert(50, String::new());
        store.files = vec![row("lost", 50, "pool-Z"), row("f1", 2, "pool-A")];
        let mut resolver = PathResolver::new(Box::new(store));

        let (artifact, stats) =
            extract_raw(&mut resolver, &options(None), dir.path().join("out.raw"), None).unwrap();
        let content = fs::read_to_string(artifact.path()).unwrap();
        assert_eq!(content, "/a/f1\tID-f1\tCK\t10\t100\tpool-A\n");
        assert_eq!(stats.unresolved, 1);
        assert_eq!(stats.written, 1);
    }

    #[test]
    fn test_pattern_filter() {
        let dir = tempdir().unwrap();
        let mut resolver = resolver_with(vec![
            row("f1", 2, "group=pool1&host=x"),
            row("f2", 2, "pool2"),
            row("pool1-data", 3, "pool3"),
        ]);

        let (artifact, stats) = extract_raw(
            &mut resolver,
            &options(Some("pool1")),
            dir.path().join("out.raw"),
            None,
        )
        .unwrap();
        let content = fs::read_to_string(artifact.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.contains("pool1")));
        assert_eq!(lines[0], "/a/f1\tID-f1\tCK\t10\t100\tgroup=pool1&host=x");
        assert_eq!(stats.filtered, 1);
    }

    #[test]
    fn test_progress_advances_while_rows_are_filtered() {
        let dir = tempdir().unwrap();
        let files = (0..PROGRESS_INTERVAL)
            .map(|i| row(&format!("f{}", i), 2, "pool-A"))
            .collect();
        let mut resolver = resolver_with(files);
        let progress = ProgressReporter::hidden();
        let mut opts = options(Some("pool-B"));
        opts.batch_size = 5000;

        let (_artifact, stats) = extract_raw(
            &mut resolver,
            &opts,
            dir.path().join("out.raw"),
            Some(&progress),
        )
        .unwrap();
        assert_eq!(stats.written, 0);
        assert!(progress.message().starts_with("Rows: 10,000 | Written: 0"));
    }

    #[test]
    fn test_write_failure_leaves_no_raw_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("out.raw");
        let mut resolver = resolver_with(vec![row("f1", 2, "pool-A")]);

        let result = extract_raw(&mut resolver, &options(None), path.clone(), None);
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_store_failure_removes_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.raw");
        // Never opened: every batch request fails
        struct Broken;
        impl crate::store::MetadataStore for Broken {
            fn backend(&self) -> crate::store::Backend {
                crate::store::Backend::Sqlite
            }
            fn root_sentinel(&mut self, _: &str) -> crate::error::StoreResult<Option<Inumber>> {
                Ok(None)
            }
            fn child_inumber(&mut self, _: Inumber, _: &str) -> crate::error::StoreResult<Option<Inumber>> {
                Ok(None)
            }
            fn inumber_path(&mut self, _: Inumber) -> crate::error::StoreResult<Option<String>> {
                Ok(None)
            }
            fn open_files(&mut self, _: usize) -> crate::error::StoreResult<()> {
                Ok(())
            }
            fn next_files(&mut self) -> crate::error::StoreResult<Option<Vec<FileRow>>> {
                Err(crate::error::StoreError::Query("connection lost".into()))
            }
            fn close(self: Box<Self>) -> crate::error::StoreResult<()> {
                Ok(())
            }
        }

        let mut resolver = PathResolver::new(Box::new(Broken));
        let result = extract_raw(&mut resolver, &options(None), path.clone(), None);
        assert!(matches!(result, Err(crate::error::DumpError::Store(_))));
        assert!(!path.exists());
    }
}
