//! Intermediate files owned by a pipeline stage
//!
//! A [`TempArtifact`] deletes its file when dropped unless it was moved into
//! its final place. Stages take their input artifact by value, so the input
//! is removed as soon as the consuming stage returns, whether it succeeded
//! or failed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Path of an intermediate file next to the final output, `<output>.<suffix>`
pub fn artifact_path(output: &Path, suffix: &str) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Remove a file if it exists, ignoring errors
pub fn unlink_safe(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed intermediate file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove intermediate file"),
    }
}

/// A file that is deleted on drop
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    armed: bool,
}

impl TempArtifact {
    /// Take ownership of `path`; nothing is created on disk
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rename the file to `dest` and stop owning it
    pub fn persist(mut self, dest: &Path) -> io::Result<()> {
        fs::rename(&self.path, dest)?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if self.armed {
            unlink_safe(&self.path);
        }
    }
}
