//! Configuration types for chimera-list
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - The JSON credential file consulted when username or password is missing
//! - Runtime configuration with validation

use crate::error::ConfigError;
use crate::extract::ExtractOptions;
use crate::pipeline::DumpOptions;
use crate::sort::{SortOptions, DEFAULT_SORT_PROGRAM};
use crate::store::{Backend, ConnectParams, DEFAULT_BATCH_SIZE};
use chrono::{Local, NaiveDateTime};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the credential file looked up next to the executable
pub const CONFIG_FILE_NAME: &str = "chimera-list.conf";

/// Fetch batch size limits
const MIN_BATCH_SIZE: usize = 100;
const MAX_BATCH_SIZE: usize = 1_000_000;

/// Tool to list all files in a dCache chimera database
#[derive(Parser, Debug, Clone)]
#[command(
    name = "chimera-list",
    version,
    about = "Tool to list all files in a dCache chimera database",
    long_about = "Dumps every file below a chimera root directory together with its pnfsid,\n\
                  checksum, size, access time and locations.\n\n\
                  By default the dump is sorted and condensed: one header line per directory,\n\
                  then one line per file with its locations merged. Use --raw to keep one\n\
                  unsorted line per (file, location) pair instead.",
    after_help = "EXAMPLES:\n    \
        chimera-list -H dbhost -U chimera -o dump\n    \
        chimera-list -r /pnfs/desy.de/cms -s f01-123-123\n    \
        chimera-list --backend sqlite --sqlite chimera.db -R -o dump.raw"
)]
pub struct CliArgs {
    /// Name of database host
    #[arg(short = 'H', long, default_value = "localhost", value_name = "HOST")]
    pub host: String,

    /// Port for database connection
    #[arg(short = 'p', long, default_value_t = 5432, value_name = "PORT")]
    pub port: u16,

    /// Name of database
    #[arg(short = 'D', long, default_value = "chimera", value_name = "NAME")]
    pub database: String,

    /// Username for database connection
    #[arg(short = 'U', long, value_name = "USER")]
    pub username: Option<String>,

    /// Password for database connection
    #[arg(short = 'P', long, value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Credential file with "username"/"password" [default: chimera-list.conf next to the binary]
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Name of output file [default: chimera_YYYY-mm-dd_HHMM]
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// String applied on output: either a path like /store/mc or a pool like f01-123-123
    #[arg(short = 's', long = "string", value_name = "STRING")]
    pub pattern: Option<String>,

    /// Name of dCache root directory
    #[arg(short = 'r', long, default_value = "/pnfs", value_name = "PATH")]
    pub root: String,

    /// Skip postprocessing steps and output raw file list
    #[arg(short = 'R', long)]
    pub raw: bool,

    /// Debug logging
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Quiet mode - no progress spinner or summary
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Database backends to try, in order
    #[arg(
        long = "backend",
        value_name = "LIST",
        value_delimiter = ',',
        default_value = "postgres,sqlite"
    )]
    pub backends: Vec<Backend>,

    /// SQLite snapshot of the chimera tables (enables the sqlite backend)
    #[arg(long, value_name = "FILE")]
    pub sqlite: Option<PathBuf>,

    /// Rows fetched from the database per batch
    #[arg(short = 'b', long, default_value_t = DEFAULT_BATCH_SIZE, value_name = "NUM")]
    pub batch_size: usize,

    /// Sort program used for the external sort
    #[arg(long, default_value = DEFAULT_SORT_PROGRAM, value_name = "PROGRAM")]
    pub sort_program: String,

    /// Directory for the sort program's temporary files
    #[arg(long, value_name = "DIR")]
    pub sort_tmpdir: Option<PathBuf>,
}

/// Contents of the credential file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    /// Read a JSON credential file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let unreadable = |reason: String| ConfigError::UnreadableConfig {
            path: path.to_path_buf(),
            reason,
        };
        let text = fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| unreadable(e.to_string()))
    }
}

/// Default credential file: `chimera-list.conf` in the executable's directory
pub fn default_config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

/// Default output name for a run started at `now`
pub fn default_output_at(now: NaiveDateTime) -> PathBuf {
    PathBuf::from(format!("chimera_{}", now.format("%Y-%m-%d_%H%M")))
}

/// Fill in missing credentials from the credential file
///
/// The file is only read when something is missing; values given directly
/// always win over the file.
pub fn resolve_credentials(
    username: Option<String>,
    password: Option<String>,
    config_path: &Path,
) -> Result<(String, String), ConfigError> {
    if let (Some(user), Some(pass)) = (&username, &password) {
        return Ok((user.clone(), pass.clone()));
    }

    let file = Credentials::load(config_path)?;
    let username = username
        .or(file.username)
        .ok_or_else(|| ConfigError::MissingUsername {
            path: config_path.to_path_buf(),
        })?;
    let password = password
        .or(file.password)
        .ok_or_else(|| ConfigError::MissingPassword {
            path: config_path.to_path_buf(),
        })?;

    Ok((username, password))
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct DumpConfig {
    /// Connection settings shared by all backends
    pub connect: ConnectParams,

    /// Backends to try, in preference order
    pub backends: Vec<Backend>,

    /// What the pipeline dumps and where
    pub dump: DumpOptions,

    /// Show spinner and summary
    pub show_progress: bool,

    /// Debug logging
    pub debug: bool,
}

impl DumpConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        if args.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        // Validate batch size
        if args.batch_size < MIN_BATCH_SIZE || args.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::InvalidBatchSize {
                size: args.batch_size,
                min: MIN_BATCH_SIZE,
                max: MAX_BATCH_SIZE,
            });
        }

        let output = args
            .output
            .unwrap_or_else(|| default_output_at(Local::now().naive_local()));

        // Validate output path
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(ConfigError::InvalidOutputPath {
                    path: output.clone(),
                    reason: format!("Parent directory '{}' does not exist", parent.display()),
                });
            }
        }

        // Only the PostgreSQL backend authenticates
        let (username, password) = if args.backends.contains(&Backend::Postgres) {
            let config_path = args.config.clone().unwrap_or_else(default_config_path);
            let (user, pass) = resolve_credentials(args.username, args.password, &config_path)?;
            (Some(user), Some(pass))
        } else {
            (args.username, args.password)
        };

        Ok(Self {
            connect: ConnectParams {
                host: args.host,
                port: args.port,
                database: args.database,
                username,
                password,
                sqlite_path: args.sqlite,
            },
            backends: args.backends,
            dump: DumpOptions {
                root: args.root,
                output,
                raw: args.raw,
                extract: ExtractOptions {
                    pattern: args.pattern.filter(|p| !p.is_empty()),
                    batch_size: args.batch_size,
                },
                sort: SortOptions {
                    program: args.sort_program,
                    tmpdir: args.sort_tmpdir,
                },
            },
            show_progress: !args.quiet,
            debug: args.debug,
        })
    }

    /// Describe the database source for display
    pub fn source_display(&self) -> String {
        self.backends
            .iter()
            .map(|backend| match backend {
                Backend::Postgres => format!(
                    "postgres://{}:{}/{}",
                    self.connect.host, self.connect.port, self.connect.database
                ),
                Backend::Sqlite => match &self.connect.sqlite_path {
                    Some(path) => format!("sqlite://{}", path.display()),
                    None => "sqlite (not configured)".to_string(),
                },
            })
            .collect::<Vec<_>>()
            .join(" | ")
    }
}
