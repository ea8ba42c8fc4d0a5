//! SQLite snapshot backend
//!
//! Reads a SQLite copy of the chimera tables (`t_inodes`, `t_dirs`,
//! `t_locationinfo`, `t_inodes_checksum`). The stored functions a live
//! chimera database provides (`pnfsid2inumber`, `path2inumber`,
//! `inumber2path`) are expressed as plain queries here.
//!
//! The file scan is paged with a keyset over the rowids of the joined
//! tables, so no statement has to stay open between batches.

use super::{Backend, ConnectParams, FileRow, Inumber, MetadataStore, ROOT_PNFSID};
use crate::error::{StoreError, StoreResult};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::debug;

/// Upper bound on directory depth when building a path
const MAX_PATH_DEPTH: usize = 4096;

/// Chimera tables, reduced to the columns the dump reads
const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS t_inodes (
    inumber INTEGER PRIMARY KEY,
    ipnfsid TEXT NOT NULL UNIQUE,
    itype INTEGER NOT NULL,       -- mode bits, 0o040000 = directory
    isize INTEGER DEFAULT 0,
    iatime INTEGER DEFAULT 0      -- Unix timestamp
);
CREATE TABLE IF NOT EXISTS t_dirs (
    iparent INTEGER NOT NULL,
    iname TEXT NOT NULL,
    ichild INTEGER NOT NULL,
    PRIMARY KEY (iparent, iname)
);
CREATE TABLE IF NOT EXISTS t_locationinfo (
    inumber INTEGER NOT NULL,
    itype INTEGER DEFAULT 1,
    ilocation TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS t_inodes_checksum (
    inumber INTEGER NOT NULL,
    itype INTEGER DEFAULT 1,
    isum TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_dirs_child ON t_dirs(ichild);
"#;

const SELECT_BY_PNFSID: &str = "SELECT inumber FROM t_inodes WHERE ipnfsid = ?1";

const SELECT_CHILD: &str = "SELECT ichild FROM t_dirs WHERE iparent = ?1 AND iname = ?2";

const SELECT_PARENT_LINK: &str = r#"
SELECT iparent, iname FROM t_dirs
WHERE ichild = ?1 AND iname NOT IN ('.', '..') AND iparent <> ichild
LIMIT 1
"#;

const SELECT_FILES_PAGE: &str = r#"
SELECT t_inodes.ipnfsid, t_dirs.iname, t_dirs.iparent, t_inodes.isize,
       t_locationinfo.ilocation, t_inodes.iatime, t_inodes_checksum.isum,
       t_locationinfo.rowid, t_inodes_checksum.rowid, t_dirs.rowid
FROM t_inodes, t_locationinfo, t_dirs, t_inodes_checksum
WHERE t_dirs.ichild = t_locationinfo.inumber
  AND t_dirs.ichild = t_inodes.inumber
  AND t_dirs.ichild = t_inodes_checksum.inumber
  AND (t_locationinfo.rowid, t_inodes_checksum.rowid, t_dirs.rowid) > (?1, ?2, ?3)
ORDER BY t_locationinfo.rowid, t_inodes_checksum.rowid, t_dirs.rowid
LIMIT ?4
"#;

/// Create the chimera tables in an empty database
pub fn create_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(CREATE_TABLES)?;
    Ok(())
}

/// Position of the file scan
#[derive(Debug, Clone, Copy)]
struct ScanCursor {
    batch_size: usize,
    last_key: (i64, i64, i64),
    exhausted: bool,
}

/// Chimera namespace read from a SQLite snapshot
pub struct SqliteStore {
    conn: Connection,
    root: Option<Inumber>,
    scan: Option<ScanCursor>,
}

impl SqliteStore {
    /// Open the snapshot configured in `params`, read-only
    pub fn connect(params: &ConnectParams) -> StoreResult<Self> {
        let path = params.sqlite_path.as_ref().ok_or_else(|| StoreError::Unavailable {
            backend: Backend::Sqlite,
            reason: "no snapshot file configured (use --sqlite)".into(),
        })?;

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StoreError::Rejected {
            backend: Backend::Sqlite,
            reason: format!("{}: {}", path.display(), e),
        })?;

        // Opening is lazy; make sure this is actually a chimera snapshot
        conn.query_row("SELECT COUNT(*) FROM t_inodes LIMIT 1", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| StoreError::Rejected {
            backend: Backend::Sqlite,
            reason: format!("{}: {}", path.display(), e),
        })?;

        debug!(path = %path.display(), "Opened SQLite snapshot");
        Ok(Self::from_connection(conn))
    }

    /// Wrap an already open connection
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            root: None,
            scan: None,
        }
    }

    fn root_inumber(&mut self) -> StoreResult<Option<Inumber>> {
        if self.root.is_none() {
            self.root = self.root_sentinel(ROOT_PNFSID)?;
        }
        Ok(self.root)
    }
}

impl MetadataStore for SqliteStore {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn root_sentinel(&mut self, pnfsid: &str) -> StoreResult<Option<Inumber>> {
        let inumber = self
            .conn
            .prepare_cached(SELECT_BY_PNFSID)?
            .query_row([pnfsid], |row| row.get::<_, i64>(0))
            .optional()?;
        Ok(inumber.map(Inumber))
    }

    fn child_inumber(&mut self, parent: Inumber, name: &str) -> StoreResult<Option<Inumber>> {
        let inumber = self
            .conn
            .prepare_cached(SELECT_CHILD)?
            .query_row(params![parent.0, name], |row| row.get::<_, i64>(0))
            .optional()?;
        Ok(inumber.map(Inumber))
    }

    fn inumber_path(&mut self, inumber: Inumber) -> StoreResult<Option<String>> {
        let root = match self.root_inumber()? {
            Some(root) => root,
            None => return Ok(None),
        };

        let mut stmt = self.conn.prepare_cached(SELECT_PARENT_LINK)?;
        let mut names = Vec::new();
        let mut current = inumber;

        while current != root {
            if names.len() >= MAX_PATH_DEPTH {
                return Ok(None);
            }
            let link = stmt
                .query_row([current.0], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })
                .optional()?;
            match link {
                Some((parent, name)) => {
                    names.push(name);
                    current = Inumber(parent);
                }
                // Orphaned: the chain never reaches the root
                None => return Ok(None),
            }
        }

        names.reverse();
        Ok(Some(format!("/{}", names.join("/"))))
    }

    fn open_files(&mut self, batch_size: usize) -> StoreResult<()> {
        self.scan = Some(ScanCursor {
            batch_size: batch_size.max(1),
            last_key: (i64::MIN, i64::MIN, i64::MIN),
            exhausted: false,
        });
        Ok(())
    }

    fn next_files(&mut self) -> StoreResult<Option<Vec<FileRow>>> {
        let cursor = self
            .scan
            .as_mut()
            .ok_or_else(|| StoreError::Query("file scan was not opened".into()))?;
        if cursor.exhausted {
            return Ok(None);
        }

        let (loc, sum, dir) = cursor.last_key;
        let limit = i64::try_from(cursor.batch_size).unwrap_or(i64::MAX);

        let mut stmt = self.conn.prepare_cached(SELECT_FILES_PAGE)?;
        let mut rows = stmt.query(params![loc, sum, dir, limit])?;
        let mut batch = Vec::with_capacity(cursor.batch_size);

        while let Some(row) = rows.next()? {
            let size: i64 = row.get(3)?;
            let atime: i64 = row.get(5)?;
            batch.push(FileRow {
                pnfsid: row.get(0)?,
                name: row.get(1)?,
                parent: Inumber(row.get(2)?),
                size: u64::try_from(size).unwrap_or(0),
                location: row.get(4)?,
                atime: u64::try_from(atime).unwrap_or(0),
                checksum: row.get(6)?,
            });
            cursor.last_key = (row.get(7)?, row.get(8)?, row.get(9)?);
        }

        if batch.len() < cursor.batch_size {
            cursor.exhausted = true;
        }
        if batch.is_empty() {
            return Ok(None);
        }

        debug!(rows = batch.len(), "Fetched batch from SQLite snapshot");
        Ok(Some(batch))
    }

    fn close(self: Box<Self>) -> StoreResult<()> {
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }
}
