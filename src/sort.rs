//! External sort of the raw dump
//!
//! Runs the system `sort` with `LC_ALL=C`, which orders lines byte by byte.
//! Since every line starts with the file's absolute path, all replicas of a
//! file end up next to each other and the files of one directory form a
//! contiguous block.

use crate::artifact::TempArtifact;
use crate::error::StageError;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;
use tracing::{debug, info};

/// Default sort program
pub const DEFAULT_SORT_PROGRAM: &str = "sort";

/// How to invoke the external sort
#[derive(Debug, Clone)]
pub struct SortOptions {
    /// Program to run, looked up in `PATH`
    pub program: String,
    /// Directory for sort's temporary files (`-T`)
    pub tmpdir: Option<PathBuf>,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self {
            program: DEFAULT_SORT_PROGRAM.to_string(),
            tmpdir: None,
        }
    }
}

impl SortOptions {
    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.env("LC_ALL", "C");
        cmd.arg("-o").arg(output);
        if let Some(tmpdir) = &self.tmpdir {
            cmd.arg("-T").arg(tmpdir);
        }
        // Paths may start with '-'
        cmd.arg("--").arg(input);
        cmd
    }
}

/// Sort `raw` into `sorted_path`
///
/// The raw artifact is consumed and removed in every case. On failure any
/// partial sorted file is removed as well.
pub fn sort_raw(
    raw: TempArtifact,
    sorted_path: PathBuf,
    options: &SortOptions,
) -> Result<TempArtifact, StageError> {
    let sorted = TempArtifact::new(sorted_path);
    let start = Instant::now();

    info!(program = %options.program, "Sorting raw dump");
    let mut cmd = options.command(raw.path(), sorted.path());
    debug!(?cmd, "Running sort");

    let status = cmd.status().map_err(|source| StageError::SortSpawn {
        program: options.program.clone(),
        source,
    })?;
    drop(raw);

    if !status.success() {
        return Err(StageError::SortFailed { status });
    }
    if !sorted.path().exists() {
        return Err(StageError::SortOutputMissing {
            path: sorted.path().to_path_buf(),
        });
    }

    info!(elapsed = ?start.elapsed(), "Sort finished");
    Ok(sorted)
}
