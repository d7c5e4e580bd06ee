// ABOUTME: Driver-neutral database access used by the transfer and compare engines
// ABOUTME: Defines the Database and LargeObjectStore traits, row values and URL dispatch

pub mod postgres;
pub mod sqlite;

use crate::changelog::TypeCategory;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Rows fetched per round trip when reading a table.
pub const DEFAULT_BATCH_SIZE: usize = 50_000;

/// A single column value as returned by a driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Decimal(Decimal),
    Bool(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Text(String),
    Bytes(Vec<u8>),
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

impl Value {
    /// Floating point columns are carried as exact decimals.
    pub fn from_f64(value: f64) -> Value {
        match Decimal::from_str(&value.to_string()) {
            Ok(d) => Value::Decimal(d),
            Err(_) => Value::Text(value.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert to the representation used for `category`.
    ///
    /// Conversion is lenient: integers widen and narrow when they fit, text
    /// is parsed, dates and timestamps convert into each other. NULL stays
    /// NULL for every category.
    ///
    /// # Errors
    ///
    /// Returns an error when the value cannot be represented, e.g. text that
    /// is not a number read as an integer, or an integer that overflows.
    ///
    /// # Examples
    ///
    /// ```
    /// # use changelog_transfer::db::Value;
    /// # use changelog_transfer::changelog::TypeCategory;
    /// let v = Value::Text(" 42 ".to_string()).coerce(TypeCategory::Int32).unwrap();
    /// assert_eq!(v, Value::Int32(42));
    ///
    /// let big = Value::Int64(1 << 40).coerce(TypeCategory::Int16);
    /// assert!(big.is_err());
    /// ```
    pub fn coerce(&self, category: TypeCategory) -> Result<Value> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        let converted = match category {
            TypeCategory::Int16 => Value::Int16(
                i16::try_from(self.integer()?)
                    .with_context(|| format!("{} does not fit in a 16-bit integer", self))?,
            ),
            TypeCategory::Int32 => Value::Int32(
                i32::try_from(self.integer()?)
                    .with_context(|| format!("{} does not fit in a 32-bit integer", self))?,
            ),
            TypeCategory::Int64 => Value::Int64(self.integer()?),
            TypeCategory::Decimal => Value::Decimal(self.decimal()?),
            TypeCategory::Boolean => Value::Bool(self.boolean()?),
            TypeCategory::Date => Value::Date(self.date()?),
            TypeCategory::Timestamp => Value::Timestamp(self.timestamp()?),
            TypeCategory::Text => Value::Text(self.text()?),
            TypeCategory::Binary => Value::Bytes(self.bytes()),
            TypeCategory::Unknown => self.clone(),
        };
        Ok(converted)
    }

    fn integer(&self) -> Result<i64> {
        match self {
            Value::Int16(v) => Ok(i64::from(*v)),
            Value::Int32(v) => Ok(i64::from(*v)),
            Value::Int64(v) => Ok(*v),
            Value::Bool(v) => Ok(i64::from(*v)),
            Value::Decimal(d) if d.fract().is_zero() => d
                .to_i64()
                .with_context(|| format!("{} does not fit in a 64-bit integer", d)),
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .with_context(|| format!("'{}' is not an integer", s)),
            other => bail!("Cannot read {} as an integer", other.kind()),
        }
    }

    fn decimal(&self) -> Result<Decimal> {
        match self {
            Value::Decimal(d) => Ok(*d),
            Value::Int16(v) => Ok(Decimal::from(*v)),
            Value::Int32(v) => Ok(Decimal::from(*v)),
            Value::Int64(v) => Ok(Decimal::from(*v)),
            Value::Bool(v) => Ok(Decimal::from(u8::from(*v))),
            Value::Text(s) => {
                let s = s.trim();
                Decimal::from_str(s)
                    .or_else(|_| Decimal::from_scientific(s))
                    .with_context(|| format!("'{}' is not a decimal number", s))
            }
            other => bail!("Cannot read {} as a decimal", other.kind()),
        }
    }

    fn boolean(&self) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            Value::Int16(_) | Value::Int32(_) | Value::Int64(_) => Ok(self.integer()? != 0),
            Value::Decimal(d) => Ok(!d.is_zero()),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" | "y" => Ok(true),
                "false" | "f" | "0" | "no" | "n" => Ok(false),
                _ => bail!("'{}' is not a boolean", s),
            },
            other => bail!("Cannot read {} as a boolean", other.kind()),
        }
    }

    fn date(&self) -> Result<NaiveDate> {
        match self {
            Value::Date(d) => Ok(*d),
            Value::Timestamp(ts) => Ok(ts.date()),
            Value::Text(s) => {
                let s = s.trim();
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .or_else(|_| parse_timestamp(s).map(|ts| ts.date()))
                    .with_context(|| format!("'{}' is not a date", s))
            }
            other => bail!("Cannot read {} as a date", other.kind()),
        }
    }

    fn timestamp(&self) -> Result<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Ok(*ts),
            Value::Date(d) => d
                .and_hms_opt(0, 0, 0)
                .context("Cannot convert date to timestamp"),
            Value::Text(s) => {
                let s = s.trim();
                parse_timestamp(s)
                    .or_else(|_| {
                        NaiveDate::parse_from_str(s, "%Y-%m-%d")
                            .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
                    })
                    .with_context(|| format!("'{}' is not a timestamp", s))
            }
            other => bail!("Cannot read {} as a timestamp", other.kind()),
        }
    }

    fn text(&self) -> Result<String> {
        match self {
            Value::Bytes(b) => {
                String::from_utf8(b.clone()).context("Binary value is not valid UTF-8 text")
            }
            other => Ok(other.to_string()),
        }
    }

    fn bytes(&self) -> Vec<u8> {
        match self {
            Value::Bytes(b) => b.clone(),
            Value::Text(s) => s.as_bytes().to_vec(),
            other => other.to_string().into_bytes(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Decimal(_) => "decimal",
            Value::Bool(_) => "boolean",
            Value::Date(_) => "date",
            Value::Timestamp(_) => "timestamp",
            Value::Text(_) => "text",
            Value::Bytes(_) => "binary",
        }
    }
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(ts);
        }
    }
    let with_zone = chrono::DateTime::parse_from_rfc3339(s)
        .or_else(|_| chrono::DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .with_context(|| format!("'{}' is not a timestamp", s))?;
    Ok(with_zone.naive_utc())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Value::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::Text(v) => f.write_str(v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// One fetched row. Column lookup is by name, ignoring case.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Raw value of a column.
    pub fn value(&self, column: &str) -> Result<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
            .with_context(|| format!("Column '{}' not found in result set", column))
    }

    /// Value of a column read as `category`.
    pub fn get(&self, column: &str, category: TypeCategory) -> Result<Value> {
        self.value(column)?
            .coerce(category)
            .with_context(|| format!("Failed to read column '{}' as {}", column, category))
    }
}

/// A fetched row, or why it could not be decoded.
pub type FetchedRow = Result<Row>;

/// Forward-only read position over one query's result.
///
/// Opened with [`Database::open_cursor`] and advanced with
/// [`Database::fetch`]. The cursor holds no borrow of the connection, so
/// the connection stays usable between batches.
#[derive(Debug)]
pub struct Cursor {
    name: String,
    sql: String,
    batch_size: usize,
    position: u64,
    exhausted: bool,
}

impl Cursor {
    pub fn new(name: impl Into<String>, sql: impl Into<String>, batch_size: usize) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            batch_size: batch_size.max(1),
            position: 0,
            exhausted: false,
        }
    }

    /// Server-side name, for drivers that declare one.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Rows handed out so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Record a fetched batch; a short batch ends the cursor.
    pub fn advance(&mut self, fetched: usize) {
        self.position += fetched as u64;
        if fetched < self.batch_size {
            self.exhausted = true;
        }
    }
}

/// Buffers one cursor's batches and hands out rows one at a time.
///
/// The connection is passed to every call rather than held, so callers can
/// run other statements on it between rows.
#[derive(Debug)]
pub struct RowReader {
    cursor: Cursor,
    buffer: VecDeque<FetchedRow>,
}

impl RowReader {
    pub async fn open(database: &mut dyn Database, sql: &str, batch_size: usize) -> Result<Self> {
        let cursor = database.open_cursor(sql, batch_size).await?;
        Ok(Self {
            cursor,
            buffer: VecDeque::new(),
        })
    }

    /// Next row, `None` once the result is exhausted.
    ///
    /// # Errors
    ///
    /// Only a failed fetch is an error here; a row that cannot be decoded
    /// comes back as `Some(Err(..))`.
    pub async fn next(&mut self, database: &mut dyn Database) -> Result<Option<FetchedRow>> {
        if self.buffer.is_empty() && !self.cursor.is_exhausted() {
            let batch = database.fetch(&mut self.cursor).await?;
            self.buffer.extend(batch);
        }
        Ok(self.buffer.pop_front())
    }

    /// Skip everything left and return how many rows that was.
    pub async fn drain(&mut self, database: &mut dyn Database) -> Result<u64> {
        let mut skipped = 0;
        while self.next(database).await?.is_some() {
            skipped += 1;
        }
        Ok(skipped)
    }

    pub async fn close(self, database: &mut dyn Database) {
        if let Err(e) = database.close_cursor(self.cursor).await {
            tracing::warn!("⚠ Failed to close cursor: {:#}", e);
        }
    }
}

/// Out-of-row object storage addressed by numeric handles.
#[async_trait]
pub trait LargeObjectStore: Send {
    /// Create an empty object and return its handle.
    async fn allocate(&mut self) -> Result<i64>;

    /// Replace the content of an object.
    async fn write(&mut self, handle: i64, bytes: &[u8]) -> Result<()>;

    /// Read the full content of an object.
    async fn read_all(&mut self, handle: i64) -> Result<Vec<u8>>;
}

/// An open connection as the engines see it.
///
/// Auto-commit is on after connecting. With auto-commit off, the first
/// statement opens a transaction that lasts until [`commit`](Self::commit)
/// or [`rollback`](Self::rollback); turning auto-commit back on commits
/// whatever is still open.
#[async_trait]
pub trait Database: Send {
    /// Driver name for log messages (`postgresql`, `sqlite`)
    fn driver(&self) -> &'static str;

    /// Start reading the result of `sql` in batches of `batch_size` rows.
    async fn open_cursor(&mut self, sql: &str, batch_size: usize) -> Result<Cursor>;

    /// Next batch of rows, empty once the cursor is exhausted.
    ///
    /// Rows are decoded one by one; a value that cannot be decoded fails
    /// only its own row.
    async fn fetch(&mut self, cursor: &mut Cursor) -> Result<Vec<FetchedRow>>;

    async fn close_cursor(&mut self, cursor: Cursor) -> Result<()>;

    /// Run a query and return every row. Meant for small results.
    ///
    /// # Errors
    ///
    /// Fails on the first row that cannot be decoded.
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        let mut cursor = self.open_cursor(sql, DEFAULT_BATCH_SIZE).await?;
        let mut rows = Vec::new();
        let mut outcome = Ok(());
        while !cursor.is_exhausted() {
            match self.fetch(&mut cursor).await {
                Ok(batch) => match batch.into_iter().collect::<Result<Vec<_>>>() {
                    Ok(batch) => rows.extend(batch),
                    Err(e) => {
                        outcome = Err(e);
                        break;
                    }
                },
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        self.close_cursor(cursor).await?;
        outcome.map(|()| rows)
    }

    /// Prepare (and cache) a statement ahead of its first execution.
    async fn prepare(&mut self, sql: &str) -> Result<()>;

    /// Execute a statement with `?` placeholders bound from `params`.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    fn auto_commit(&self) -> bool;

    async fn set_auto_commit(&mut self, enabled: bool) -> Result<()>;

    /// Commit the open transaction, if any.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction, if any.
    async fn rollback(&mut self) -> Result<()>;

    /// Large-object store of this connection.
    fn large_objects(&mut self) -> Result<&mut dyn LargeObjectStore> {
        bail!("{} connections do not support large objects", self.driver())
    }

    /// Roll back anything still open and release the connection.
    async fn close(&mut self) -> Result<()>;
}

/// Supported drivers, chosen from the connection URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Postgres,
    Sqlite,
}

impl DriverKind {
    /// Pick a driver for `url`. A leading `jdbc:` is ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// # use changelog_transfer::db::DriverKind;
    /// assert_eq!(DriverKind::from_url("postgresql://u@h/db").unwrap(), DriverKind::Postgres);
    /// assert_eq!(DriverKind::from_url("sqlite::memory:").unwrap(), DriverKind::Sqlite);
    /// assert!(DriverKind::from_url("mysql://h/db").is_err());
    /// ```
    pub fn from_url(url: &str) -> Result<DriverKind> {
        let url = strip_jdbc(url.trim());
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(DriverKind::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(DriverKind::Sqlite)
        } else {
            bail!(
                "Unsupported connection URL: {}\n\
                 Supported schemes: postgresql://, postgres://, sqlite://<path>, sqlite::memory:",
                crate::utils::redact_url(url)
            )
        }
    }
}

pub(crate) fn strip_jdbc(url: &str) -> &str {
    url.strip_prefix("jdbc:").unwrap_or(url)
}

/// Open a connection for `url`, with optional credential overrides.
///
/// # Errors
///
/// Returns an error for unsupported URLs and when the connection cannot be
/// established.
///
/// # Examples
///
/// ```no_run
/// # use changelog_transfer::db;
/// # async fn example() -> anyhow::Result<()> {
/// let mut conn = db::connect("sqlite:///tmp/legacy.db", None, None).await?;
/// let rows = conn.query("SELECT id FROM orders;").await?;
/// conn.close().await?;
/// # Ok(())
/// # }
/// ```
pub async fn connect(
    url: &str,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<Box<dyn Database>> {
    let connection: Box<dyn Database> = match DriverKind::from_url(url)? {
        DriverKind::Postgres => Box::new(
            postgres::PostgresDatabase::connect_with_retry(strip_jdbc(url.trim()), username, password)
                .await?,
        ),
        DriverKind::Sqlite => Box::new(sqlite::SqliteDatabase::open(url.trim())?),
    };
    Ok(connection)
}
