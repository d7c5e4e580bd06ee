// ABOUTME: SQLite driver over rusqlite for file and in-memory databases
// ABOUTME: Dates and timestamps are stored as ISO-8601 text

use crate::db::{Cursor, Database, FetchedRow, Row, Value};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rusqlite::types::{Null, ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An open SQLite connection.
pub struct SqliteDatabase {
    conn: Connection,
    location: String,
    auto_commit: bool,
    in_transaction: bool,
}

/// Where a `sqlite:` URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteLocation {
    Memory,
    File(PathBuf),
}

impl SqliteLocation {
    /// Accepts `sqlite::memory:`, `sqlite://<path>` and `sqlite:<path>`.
    pub fn parse(url: &str) -> Result<SqliteLocation> {
        let Some(rest) = url.trim().strip_prefix("sqlite:") else {
            bail!("Not a SQLite URL: {}", url);
        };
        if rest == ":memory:" || rest == "//:memory:" {
            return Ok(SqliteLocation::Memory);
        }
        let path = rest.strip_prefix("//").unwrap_or(rest);
        if path.is_empty() {
            bail!("SQLite URL is missing a database path: {}", url);
        }
        Ok(SqliteLocation::File(PathBuf::from(path)))
    }
}

impl SqliteDatabase {
    /// Open (creating if needed) the database a `sqlite:` URL points at.
    pub fn open(url: &str) -> Result<Self> {
        let (conn, location) = match SqliteLocation::parse(url)? {
            SqliteLocation::Memory => (
                Connection::open_in_memory().context("Failed to open in-memory SQLite database")?,
                ":memory:".to_string(),
            ),
            SqliteLocation::File(path) => (
                Connection::open(&path)
                    .with_context(|| format!("Failed to open SQLite database {}", path.display()))?,
                path.display().to_string(),
            ),
        };
        tracing::debug!("Opened SQLite database {}", location);
        Ok(Self {
            conn,
            location,
            auto_commit: true,
            in_transaction: false,
        })
    }

    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(&format!("sqlite://{}", path.display()))
    }

    /// Run a batch of statements outside the auto-commit bookkeeping.
    pub fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.conn
            .execute_batch(sql)
            .with_context(|| format!("Failed to execute batch on {}", self.location))
    }

    fn begin_if_needed(&mut self) -> Result<()> {
        if !self.auto_commit && !self.in_transaction {
            self.conn
                .execute_batch("BEGIN")
                .context("Failed to begin transaction")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    /// The cursor's query as one page of `LIMIT ? OFFSET ?`.
    fn paged(sql: &str) -> String {
        format!(
            "SELECT * FROM ({}) LIMIT ? OFFSET ?",
            sql.trim().trim_end_matches(';').trim_end()
        )
    }

    fn end_transaction(&mut self, command: &str) -> Result<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.conn
                .execute_batch(command)
                .with_context(|| format!("Failed to {} transaction", command.to_lowercase()))?;
        }
        Ok(())
    }
}

fn decode_row(columns: &Arc<[String]>, row: &rusqlite::Row<'_>) -> FetchedRow {
    let values = columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            decode(row.get_ref(i)?)
                .with_context(|| format!("Failed to decode column '{}'", name))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(columns.clone(), values))
}

fn decode(value: ValueRef<'_>) -> Result<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int64(v),
        ValueRef::Real(v) => Value::from_f64(v),
        ValueRef::Text(bytes) => Value::Text(
            std::str::from_utf8(bytes)
                .context("Text column is not valid UTF-8")?
                .to_string(),
        ),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    })
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::from(Null),
            Value::Int16(v) => ToSqlOutput::from(i64::from(*v)),
            Value::Int32(v) => ToSqlOutput::from(i64::from(*v)),
            Value::Int64(v) => ToSqlOutput::from(*v),
            Value::Bool(v) => ToSqlOutput::from(*v),
            Value::Decimal(_) | Value::Date(_) | Value::Timestamp(_) => {
                ToSqlOutput::from(self.to_string())
            }
            Value::Text(v) => ToSqlOutput::from(v.as_str()),
            Value::Bytes(v) => ToSqlOutput::from(v.as_slice()),
        })
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn driver(&self) -> &'static str {
        "sqlite"
    }

    async fn open_cursor(&mut self, sql: &str, batch_size: usize) -> Result<Cursor> {
        self.conn
            .prepare_cached(&Self::paged(sql))
            .with_context(|| format!("Failed to prepare statement: {}", sql))?;
        Ok(Cursor::new("", sql, batch_size))
    }

    async fn fetch(&mut self, cursor: &mut Cursor) -> Result<Vec<FetchedRow>> {
        if cursor.is_exhausted() {
            return Ok(Vec::new());
        }
        self.begin_if_needed()?;
        let sql = Self::paged(cursor.sql());
        let mut statement = self
            .conn
            .prepare_cached(&sql)
            .with_context(|| format!("Failed to prepare statement: {}", cursor.sql()))?;
        let columns: Arc<[String]> = statement
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into();

        let limit = i64::try_from(cursor.batch_size()).unwrap_or(i64::MAX);
        let offset = i64::try_from(cursor.position()).unwrap_or(i64::MAX);
        let mut rows = statement
            .query([limit, offset])
            .with_context(|| format!("Query failed: {}", cursor.sql()))?;
        let mut batch = Vec::new();
        while let Some(row) = rows.next()? {
            batch.push(decode_row(&columns, row));
        }
        cursor.advance(batch.len());
        Ok(batch)
    }

    async fn close_cursor(&mut self, _cursor: Cursor) -> Result<()> {
        Ok(())
    }

    async fn prepare(&mut self, sql: &str) -> Result<()> {
        self.conn
            .prepare_cached(sql)
            .with_context(|| format!("Failed to prepare statement: {}", sql))?;
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.begin_if_needed()?;
        let mut statement = self
            .conn
            .prepare_cached(sql)
            .with_context(|| format!("Failed to prepare statement: {}", sql))?;
        let affected = statement.execute(params_from_iter(params.iter()))?;
        Ok(affected as u64)
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            self.end_transaction("COMMIT")?;
        }
        self.auto_commit = enabled;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.end_transaction("COMMIT")
    }

    async fn rollback(&mut self) -> Result<()> {
        self.end_transaction("ROLLBACK")
    }

    async fn close(&mut self) -> Result<()> {
        self.end_transaction("ROLLBACK")?;
        self.conn.flush_prepared_statement_cache();
        Ok(())
    }
}
