//! PostgreSQL backend for a live chimera database
//!
//! Path lookups go through chimera's stored functions. The file scan runs
//! through a server-side cursor inside a read-only transaction and is
//! fetched `batch_size` rows at a time, so memory stays bounded no matter how
//! large the namespace is.
//!
//! `sqlx` is async; a private current-thread runtime drives it and every
//! call blocks until the server answers.

use super::{Backend, ConnectParams, FileRow, Inumber, MetadataStore};
use crate::error::{StoreError, StoreResult};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{ConnectOptions, Connection, Row};
use tokio::runtime::Runtime;
use tracing::debug;

const CURSOR_NAME: &str = "chimera_files";

const DECLARE_FILES_CURSOR: &str = r#"
DECLARE chimera_files NO SCROLL CURSOR FOR
SELECT t_inodes.ipnfsid::text AS ipnfsid,
       t_dirs.iname::text AS iname,
       t_dirs.iparent::bigint AS iparent,
       t_inodes.isize::bigint AS isize,
       t_locationinfo.ilocation::text AS ilocation,
       date_part('epoch', t_inodes.iatime)::bigint AS iatime,
       t_inodes_checksum.isum::text AS isum
FROM t_inodes, t_locationinfo, t_dirs, t_inodes_checksum
WHERE t_dirs.ichild = t_locationinfo.inumber
  AND t_dirs.ichild = t_inodes.inumber
  AND t_dirs.ichild = t_inodes_checksum.inumber
"#;

/// Chimera namespace on a PostgreSQL server
pub struct PgStore {
    runtime: Runtime,
    conn: PgConnection,
    fetch_sql: Option<String>,
}

impl PgStore {
    /// Connect with the host, database and credentials in `params`
    pub fn connect(params: &ConnectParams) -> StoreResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Unavailable {
                backend: Backend::Postgres,
                reason: format!("failed to start runtime: {}", e),
            })?;

        let mut options = PgConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .database(&params.database)
            .application_name("chimera-list");
        if let Some(username) = &params.username {
            options = options.username(username);
        }
        if let Some(password) = &params.password {
            options = options.password(password);
        }

        let conn = runtime
            .block_on(options.connect())
            .map_err(|e| StoreError::Rejected {
                backend: Backend::Postgres,
                reason: e.to_string(),
            })?;

        debug!(host = %params.host, port = params.port, database = %params.database, "Connected to PostgreSQL");

        Ok(Self {
            runtime,
            conn,
            fetch_sql: None,
        })
    }
}

fn file_row(row: &PgRow) -> StoreResult<FileRow> {
    let size: i64 = row.try_get("isize")?;
    let atime: Option<i64> = row.try_get("iatime")?;
    Ok(FileRow {
        pnfsid: row.try_get("ipnfsid")?,
        name: row.try_get("iname")?,
        parent: Inumber(row.try_get("iparent")?),
        size: u64::try_from(size).unwrap_or(0),
        location: row.try_get("ilocation")?,
        atime: atime.and_then(|t| u64::try_from(t).ok()).unwrap_or(0),
        checksum: row.try_get::<Option<String>, _>("isum")?.unwrap_or_default(),
    })
}

impl MetadataStore for PgStore {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    fn root_sentinel(&mut self, pnfsid: &str) -> StoreResult<Option<Inumber>> {
        let query = sqlx::query_scalar::<_, Option<i64>>("SELECT pnfsid2inumber($1)::bigint")
            .bind(pnfsid);
        let value = self.runtime.block_on(query.fetch_optional(&mut self.conn))?;
        Ok(value.flatten().map(Inumber))
    }

    fn child_inumber(&mut self, parent: Inumber, name: &str) -> StoreResult<Option<Inumber>> {
        let query = sqlx::query_scalar::<_, Option<i64>>("SELECT path2inumber($1, $2)::bigint")
            .bind(parent.0)
            .bind(name);
        let value = self.runtime.block_on(query.fetch_optional(&mut self.conn))?;
        Ok(value.flatten().map(Inumber))
    }

    fn inumber_path(&mut self, inumber: Inumber) -> StoreResult<Option<String>> {
        let query = sqlx::query_scalar::<_, Option<String>>("SELECT inumber2path($1)::text")
            .bind(inumber.0);
        let value = self.runtime.block_on(query.fetch_optional(&mut self.conn))?;
        Ok(value.flatten().filter(|path| !path.is_empty()))
    }

    fn open_files(&mut self, batch_size: usize) -> StoreResult<()> {
        let Self { runtime, conn, .. } = self;
        runtime.block_on(async {
            sqlx::raw_sql("BEGIN TRANSACTION READ ONLY").execute(&mut *conn).await?;
            sqlx::raw_sql(DECLARE_FILES_CURSOR).execute(&mut *conn).await?;
            Ok::<_, sqlx::Error>(())
        })?;

        self.fetch_sql = Some(format!(
            "FETCH FORWARD {} FROM {}",
            batch_size.max(1),
            CURSOR_NAME
        ));
        Ok(())
    }

    fn next_files(&mut self) -> StoreResult<Option<Vec<FileRow>>> {
        let fetch_sql = match &self.fetch_sql {
            Some(sql) => sql.as_str(),
            None => return Err(StoreError::Query("file scan was not opened".into())),
        };

        let rows = self
            .runtime
            .block_on(sqlx::raw_sql(fetch_sql).fetch_all(&mut self.conn))?;

        if rows.is_empty() {
            let Self { runtime, conn, .. } = self;
            runtime.block_on(async {
                sqlx::raw_sql("CLOSE chimera_files").execute(&mut *conn).await?;
                sqlx::raw_sql("COMMIT").execute(&mut *conn).await?;
                Ok::<_, sqlx::Error>(())
            })?;
            self.fetch_sql = None;
            return Ok(None);
        }

        debug!(rows = rows.len(), "Fetched batch from PostgreSQL");
        rows.iter().map(file_row).collect::<StoreResult<Vec<_>>>().map(Some)
    }

    fn close(self: Box<Self>) -> StoreResult<()> {
        let PgStore { runtime, conn, .. } = *self;
        runtime.block_on(conn.close())?;
        Ok(())
    }
}
