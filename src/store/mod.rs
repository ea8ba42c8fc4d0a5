//! Metadata store access
//!
//! The dump only needs a handful of things from a chimera database: the
//! sentinel root record, child lookups by name, the absolute path of a
//! directory inode, and a batched scan of the file/location/checksum join.
//! [`MetadataStore`] captures exactly that, so the rest of the pipeline never
//! sees SQL or a driver type.
//!
//! Two backends exist:
//! - PostgreSQL through `sqlx` (feature `postgres`), talking to a live
//!   chimera database and its stored path functions
//! - SQLite through `rusqlite`, reading a snapshot with the same tables
//!
//! [`connect`] tries them in the configured order and returns the first live
//! connection.

#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sqlite;

use crate::error::{StoreError, StoreResult};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{error, info};

/// pnfsid of the namespace root record
pub const ROOT_PNFSID: &str = "000000000000000000000000000000000000";

/// Default number of rows fetched per batch
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Internal inode number of a namespace entry
///
/// Treated as an opaque key: the dump only compares and looks it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inumber(pub i64);

impl fmt::Display for Inumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of the file/location/checksum join
///
/// A file with N replicas yields N rows that differ only in `location`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRow {
    pub pnfsid: String,
    pub name: String,
    pub parent: Inumber,
    pub size: u64,
    pub location: String,
    /// Last access time, seconds since the epoch
    pub atime: u64,
    pub checksum: String,
}

/// Database backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Live chimera database on PostgreSQL
    Postgres,
    /// SQLite snapshot of the chimera tables
    Sqlite,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Postgres => "postgres",
            Backend::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Backend::Postgres),
            "sqlite" | "sqlite3" => Ok(Backend::Sqlite),
            other => Err(format!(
                "unknown backend '{}' (expected postgres or sqlite)",
                other
            )),
        }
    }
}

/// Everything a backend may need to open a connection
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Snapshot file for the SQLite backend
    pub sqlite_path: Option<PathBuf>,
}

/// Read access to a chimera namespace
///
/// All calls block until the backend answers. The file scan is cursor-like:
/// [`open_files`](MetadataStore::open_files) starts it and
/// [`next_files`](MetadataStore::next_files) hands out batches in store
/// order. Lookups may be interleaved with batches on the same connection.
pub trait MetadataStore {
    /// Which backend serves this connection
    fn backend(&self) -> Backend;

    /// Inode number of the record with the given pnfsid
    fn root_sentinel(&mut self, pnfsid: &str) -> StoreResult<Option<Inumber>>;

    /// Inode number of the entry called `name` directly below `parent`
    fn child_inumber(&mut self, parent: Inumber, name: &str) -> StoreResult<Option<Inumber>>;

    /// Absolute path of a directory inode, `None` if it is not reachable
    fn inumber_path(&mut self, inumber: Inumber) -> StoreResult<Option<String>>;

    /// Start scanning every (file, location) row
    fn open_files(&mut self, batch_size: usize) -> StoreResult<()>;

    /// Next batch of the scan, `None` once it is exhausted
    fn next_files(&mut self) -> StoreResult<Option<Vec<FileRow>>>;

    /// Release the connection
    fn close(self: Box<Self>) -> StoreResult<()>;
}

/// Open a single backend
pub fn open_backend(
    backend: Backend,
    params: &ConnectParams,
) -> StoreResult<Box<dyn MetadataStore>> {
    match backend {
        #[cfg(feature = "postgres")]
        Backend::Postgres => Ok(Box::new(postgres::PgStore::connect(params)?)),
        #[cfg(not(feature = "postgres"))]
        Backend::Postgres => Err(StoreError::Unavailable {
            backend,
            reason: "built without the 'postgres' feature".into(),
        }),
        Backend::Sqlite => Ok(Box::new(sqlite::SqliteStore::connect(params)?)),
    }
}

/// Connect to the first backend that accepts, in preference order
///
/// An unavailable driver always falls through to the next candidate. A
/// rejected connection falls through too, except on the last candidate, where
/// it is returned as is. If nothing connects the error lists every attempt.
pub fn connect(
    backends: &[Backend],
    params: &ConnectParams,
) -> StoreResult<Box<dyn MetadataStore>> {
    connect_with(backends, |backend| open_backend(backend, params))
}

/// Connector chain over an arbitrary opener
pub fn connect_with<F>(backends: &[Backend], mut open: F) -> StoreResult<Box<dyn MetadataStore>>
where
    F: FnMut(Backend) -> StoreResult<Box<dyn MetadataStore>>,
{
    let mut attempts = Vec::with_capacity(backends.len());

    for (idx, &backend) in backends.iter().enumerate() {
        info!("Trying to connect with {}...", backend);
        match open(backend) {
            Ok(store) => {
                info!(backend = %backend, "Connected to database");
                return Ok(store);
            }
            Err(e) => {
                error!("{}", e);
                let is_last = idx + 1 == backends.len();
                if is_last && !e.is_unavailable() {
                    return Err(e);
                }
                attempts.push(e.to_string());
            }
        }
    }

    Err(StoreError::NoBackend { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> StoreResult<Box<dyn MetadataStore>> {
        let conn = rusqlite::Connection::open_in_memory()?;
        sqlite::create_schema(&conn)?;
        Ok(Box::new(sqlite::SqliteStore::from_connection(conn)))
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("postgres".parse::<Backend>().unwrap(), Backend::Postgres);
        assert_eq!("PG".parse::<Backend>().unwrap(), Backend::Postgres);
        assert_eq!("sqlite".parse::<Backend>().unwrap(), Backend::Sqlite);
        assert!("oracle".parse::<Backend>().is_err());
    }

    #[test]
    fn test_unavailable_falls_through() {
        let store = connect_with(&[Backend::Postgres, Backend::Sqlite], |backend| match backend {
            Backend::Postgres => Err(StoreError::Unavailable {
                backend,
                reason: "not built".into(),
            }),
            Backend::Sqlite => memory_store(),
        })
        .unwrap();
        assert_eq!(store.backend(), Backend::Sqlite);
    }

    #[test]
    fn test_first_rejection_falls_through() {
        let mut tried = Vec::new();
        let store = connect_with(&[Backend::Postgres, Backend::Sqlite], |backend| {
            tried.push(backend);
            match backend {
                Backend::Postgres => Err(StoreError::Rejected {
                    backend,
                    reason: "password authentication failed".into(),
                }),
                Backend::Sqlite => memory_store(),
            }
        })
        .unwrap();
        assert_eq!(store.backend(), Backend::Sqlite);
        assert_eq!(tried, vec![Backend::Postgres, Backend::Sqlite]);
    }

    #[test]
    fn test_last_rejection_is_surfaced() {
        let result = connect_with(&[Backend::Postgres, Backend::Sqlite], |backend| {
            Err(match backend {
                Backend::Postgres => StoreError::Unavailable {
                    backend,
                    reason: "not built".into(),
                },
                Backend::Sqlite => StoreError::Rejected {
                    backend,
                    reason: "unable to open database file".into(),
                },
            })
        });
        assert!(matches!(result, Err(StoreError::Rejected { backend: Backend::Sqlite, .. })));
    }

    #[test]
    fn test_all_unavailable_lists_attempts() {
        let result = connect_with(&[Backend::Postgres, Backend::Sqlite], |backend| {
            Err(StoreError::Unavailable {
                backend,
                reason: "not configured".into(),
            })
        });
        match result {
            Err(StoreError::NoBackend { attempts }) => {
                assert_eq!(attempts.len(), 2);
                assert!(attempts[0].starts_with("postgres"));
                assert!(attempts[1].starts_with("sqlite"));
            }
            _ => panic!("expected NoBackend"),
        }
    }
}
