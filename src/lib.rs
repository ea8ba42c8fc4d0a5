//! chimera-list - dCache Chimera Namespace Dump
//!
//! Lists every file below a root directory of a dCache chimera namespace
//! database, resolves each one to its absolute path and writes a compact,
//! directory-grouped listing with all replica locations of a file merged
//! onto one line.
//!
//! # Pipeline
//!
//! ```text
//! ┌──────────────────────────────┐
//! │   Chimera database           │   PostgreSQL (sqlx) or
//! │   t_inodes  t_dirs           │   SQLite snapshot (rusqlite)
//! │   t_locationinfo  checksums  │
//! └──────────────┬───────────────┘
//!                │ batched cursor + cached inumber2path
//!                ▼
//! ┌──────────────────────────────┐
//! │   Raw extractor              │ ─► <output>.raw   one line per replica
//! └──────────────┬───────────────┘
//!                ▼
//! ┌──────────────────────────────┐
//! │   External sort (LC_ALL=C)   │ ─► <output>.sorted
//! └──────────────┬───────────────┘
//!                ▼
//! ┌──────────────────────────────┐
//! │   Condenser                  │ ─► <output>       directory headers +
//! └──────────────────────────────┘                   one line per file
//! ```
//!
//! Each stage finishes its file before the next one starts, and every
//! intermediate file is removed once consumed or when its stage fails.
//!
//! # Example
//!
//! ```bash
//! # Condensed dump of /pnfs/desy.de/cms
//! chimera-list -H dbhost -U chimera -r /pnfs/desy.de/cms -o cms_dump
//!
//! # Raw dump of everything on one pool
//! chimera-list -s f01-123-123 -R -o pool_dump
//! ```

pub mod artifact;
pub mod condense;
pub mod config;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod progress;
pub mod resolver;
pub mod sort;
pub mod store;

pub use config::{CliArgs, DumpConfig};
pub use error::{DumpError, Result};
pub use pipeline::{DumpOptions, DumpSummary};
