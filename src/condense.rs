//! Condensation of the sorted dump
//!
//! Collapses the per-replica lines of the sorted dump into one line per file
//! and groups files under directory header lines:
//!
//! ```text
//! /a/f1<TAB>ID1<TAB>CK1<TAB>10<TAB>100<TAB>group=pool-A&host=x       /a
//! /a/f1<TAB>ID1<TAB>CK1<TAB>10<TAB>100<TAB>pool-B               =>   f1<TAB>pool-A,pool-B
//! /a/g1<TAB>ID2<TAB>CK2<TAB>20<TAB>200<TAB>group=pool-C&y            g1<TAB>pool-C
//! ```
//!
//! Lines are grouped by everything before the last tab. A header is written
//! whenever a file's directory differs from the previously written one, so
//! the input must be sorted for each directory to get a single header.

use crate::artifact::TempArtifact;
use crate::error::StageError;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Instant;
use tracing::info;

const BUFFER_SIZE: usize = 1 << 20;

/// Counters for one condensation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CondenseStats {
    /// Input lines consumed
    pub lines: u64,
    /// File lines written
    pub files: u64,
    /// Directory header lines written
    pub dirs: u64,
}

/// Short form of a location token
///
/// `dcache://host/?store=x&group=pool-A&bfid=1` becomes `pool-A`: the text
/// between `group=` and the next `&`. Tokens without `group=` are kept.
pub fn short_location(location: &str) -> &str {
    match location.split_once("group=") {
        Some((_, rest)) => rest.split('&').next().unwrap_or(rest),
        None => location,
    }
}

/// Split a full path into directory and basename at the last `/`
///
/// Files directly below `/` get `/` as their directory.
fn split_path(full_path: &str) -> Option<(&str, &str)> {
    let (dir, base) = full_path.rsplit_once('/')?;
    Some((if dir.is_empty() { "/" } else { dir }, base))
}

fn malformed(line: &str, reason: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{}: {:?}", reason, line),
    )
}

/// Streaming merger over sorted dump lines
///
/// Holds the key of the file being accumulated, its locations so far and the
/// last directory header written. Call [`push`](Condenser::push) for every
/// line and [`finish`](Condenser::finish) at the end.
pub struct Condenser<W: Write> {
    out: W,
    current_key: Option<String>,
    locations: Vec<String>,
    last_dir: Option<String>,
    stats: CondenseStats,
}

impl<W: Write> Condenser<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            current_key: None,
            locations: Vec::new(),
            last_dir: None,
            stats: CondenseStats::default(),
        }
    }

    /// Feed one sorted line, without its line terminator
    ///
    /// Blank lines are ignored. [`condense`] strips surrounding whitespace
    /// before calling this.
    pub fn push(&mut self, line: &str) -> io::Result<()> {
        if line.is_empty() {
            return Ok(());
        }
        self.stats.lines += 1;

        let (key, location) = line
            .rsplit_once('\t')
            .ok_or_else(|| malformed(line, "line has no location field"))?;

        if self.current_key.as_deref() != Some(key) {
            self.flush_group()?;
            self.current_key = Some(key.to_string());
        }
        self.locations.push(location.to_string());
        Ok(())
    }

    /// Write the pending group and return the writer
    pub fn finish(mut self) -> io::Result<(W, CondenseStats)> {
        self.flush_group()?;
        self.out.flush()?;
        Ok((self.out, self.stats))
    }

    fn flush_group(&mut self) -> io::Result<()> {
        let key = match self.current_key.take() {
            Some(key) => key,
            None => return Ok(()),
        };

        let full_path = key.split('\t').next().unwrap_or(&key);
        let (dir, base) =
            split_path(full_path).ok_or_else(|| malformed(&key, "path has no directory"))?;

        if self.last_dir.as_deref() != Some(dir) {
            writeln!(self.out, "{}", dir)?;
            self.last_dir = Some(dir.to_string());
            self.stats.dirs += 1;
        }

        write!(self.out, "{}\t", base)?;
        for (idx, location) in self.locations.iter().enumerate() {
            if idx > 0 {
                self.out.write_all(b",")?;
            }
            self.out.write_all(short_location(location).as_bytes())?;
        }
        self.out.write_all(b"\n")?;

        self.locations.clear();
        self.stats.files += 1;
        Ok(())
    }
}

/// Condense every line of `input` into `output`
pub fn condense<R: BufRead, W: Write>(input: R, output: W) -> io::Result<CondenseStats> {
    let mut condenser = Condenser::new(output);
    for line in input.lines() {
        let line = line?;
        condenser.push(line.trim())?;
    }
    let (_, stats) = condenser.finish()?;
    Ok(stats)
}

/// Condense the sorted dump into the final output file
///
/// The sorted artifact is consumed and removed whether or not this succeeds.
/// On failure the output file is left as written so far.
pub fn condense_file(sorted: TempArtifact, output: &Path) -> Result<CondenseStats, StageError> {
    let start = Instant::now();
    let io_err = |source| StageError::Condense {
        path: output.to_path_buf(),
        source,
    };

    let input = File::open(sorted.path()).map_err(io_err)?;
    let out = File::create(output).map_err(io_err)?;

    let stats = condense(
        BufReader::with_capacity(BUFFER_SIZE, input),
        BufWriter::with_capacity(BUFFER_SIZE, out),
    )
    .map_err(io_err)?;

    info!(
        lines = stats.lines,
        files = stats.files,
        dirs = stats.dirs,
        elapsed = ?start.elapsed(),
        "Condensed dump written"
    );
    Ok(stats)
}
