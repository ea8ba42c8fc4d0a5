//! Error types for chimera-list
//!
//! This module defines the error hierarchy for a namespace dump:
//! - Configuration and credential errors
//! - Metadata store connection and query errors
//! - Root path resolution errors
//! - Pipeline stage errors (extraction, sort, condensation)
//!
//! Every error is fatal for the run. The only recoverable condition, a file
//! whose parent directory can no longer be resolved, is not an error at all:
//! the resolver reports it as `None` and the extractor skips the row.

use crate::store::Backend;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for a dump run
#[derive(Error, Debug)]
pub enum DumpError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Metadata store errors
    #[error("Database error: {0}")]
    Store(#[from] StoreError),

    /// Root directory resolution errors
    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    /// Pipeline stage errors
    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    /// I/O errors outside of a specific stage
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration and credential errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Username neither on the command line nor in the credential file
    #[error("\"username\" missing as argument or in config file {path}")]
    MissingUsername { path: PathBuf },

    /// Password neither on the command line nor in the credential file
    #[error("\"password\" missing as argument or in config file {path}")]
    MissingPassword { path: PathBuf },

    /// Credential file could not be read or parsed
    #[error("Unable to read config file {path}: {reason}")]
    UnreadableConfig { path: PathBuf, reason: String },

    /// Invalid batch size
    #[error("Invalid batch size {size}: must be between {min} and {max}")]
    InvalidBatchSize { size: usize, min: usize, max: usize },

    /// Output path error
    #[error("Invalid output path '{path}': {reason}")]
    InvalidOutputPath { path: PathBuf, reason: String },

    /// No backend to try
    #[error("At least one database backend must be selected")]
    NoBackends,
}

/// Metadata store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend is not compiled in or not configured
    #[error("{backend}: driver unavailable: {reason}")]
    Unavailable { backend: Backend, reason: String },

    /// Backend is available but the connection was refused
    #[error("{backend}: connection to database failed: {reason}")]
    Rejected { backend: Backend, reason: String },

    /// Every candidate backend failed
    #[error("Connection to database failed ({})", attempts.join("; "))]
    NoBackend { attempts: Vec<String> },

    /// A query returned something the dump cannot interpret
    #[error("Unexpected query result: {0}")]
    Query(String),

    /// SQLite snapshot error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// PostgreSQL error
    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),
}

impl StoreError {
    /// Check if the connector chain may move on to the next backend
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

/// Root directory resolution errors
#[derive(Error, Debug)]
pub enum ResolveError {
    /// A segment of the configured root does not exist
    #[error("Query for root directory '{segment}' failed")]
    RootNotFound { segment: String },

    /// The all-zero sentinel record is missing from the store
    #[error("Namespace root record {pnfsid} not found")]
    RootSentinelMissing { pnfsid: String },

    /// Store failure during a lookup
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Pipeline stage errors
#[derive(Error, Debug)]
pub enum StageError {
    /// Writing the raw dump failed
    #[error("Unable to write raw database dump '{path}': {source}")]
    Extract {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Sort program could not be started
    #[error("Unable to run sort program '{program}': {source}")]
    SortSpawn {
        program: String,
        source: std::io::Error,
    },

    /// Sort program exited unsuccessfully
    #[error("Unable to sort raw database dump: sort exited with {status}")]
    SortFailed { status: std::process::ExitStatus },

    /// Sort reported success but produced nothing
    #[error("Unable to sort raw database dump: '{path}' was not created")]
    SortOutputMissing { path: PathBuf },

    /// Writing the condensed dump failed
    #[error("Unable to write condensed database dump '{path}': {source}")]
    Condense {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Moving the raw dump into place failed
    #[error("Unable to rename '{from}' to '{to}': {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

/// Result type alias for DumpError
pub type Result<T> = std::result::Result<T, DumpError>;

/// Result type alias for StoreError
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for ResolveError
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;
