//! SQLite-backed SQL database.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections with the configured pragmas.
//! - Serialize access to the single connection owned by a database handle.
//!
//! # Invariants
//! - One connection per opened database; clones of a `SqlDatabase` share it
//!   and never pool.
//! - Connection pragmas are applied before the handle is returned.

use crate::error::DbResult;
use log::{error, info};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the connection lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlLocation {
    Memory,
    File(PathBuf),
}

impl SqlLocation {
    fn mode(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File(_) => "file",
        }
    }
}

/// Connection bootstrap options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlOptions {
    pub busy_timeout: Duration,
    pub foreign_keys: bool,
}

impl Default for SqlOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            foreign_keys: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqlDatabase {
    conn: Arc<Mutex<Connection>>,
    location: SqlLocation,
}

impl SqlDatabase {
    /// Opens a SQLite database file.
    ///
    /// # Side effects
    /// - Creates the file when it does not exist.
    /// - Emits `db_open` logging events with duration and status.
    pub fn open(path: impl AsRef<Path>, options: SqlOptions) -> DbResult<Self> {
        let location = SqlLocation::File(path.as_ref().to_path_buf());
        Self::open_at(location, options, || Connection::open(path.as_ref()))
    }

    /// Opens a private in-memory SQLite database.
    pub fn open_in_memory(options: SqlOptions) -> DbResult<Self> {
        Self::open_at(SqlLocation::Memory, options, Connection::open_in_memory)
    }

    fn open_at(
        location: SqlLocation,
        options: SqlOptions,
        connect: impl FnOnce() -> rusqlite::Result<Connection>,
    ) -> DbResult<Self> {
        let started_at = Instant::now();
        let mode = location.mode();
        info!("event=db_open module=db status=start mode={mode}");

        let conn = match connect() {
            Ok(conn) => conn,
            Err(err) => {
                error!(
                    "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                    mode,
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(err.into());
            }
        };

        if let Err(err) = configure_connection(&conn, options) {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }

        info!(
            "event=db_open module=db status=ok mode={} duration_ms={}",
            mode,
            started_at.elapsed().as_millis()
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        })
    }

    pub fn location(&self) -> &SqlLocation {
        &self.location
    }

    /// Runs `f` with exclusive access to the connection.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> DbResult<T>,
    ) -> DbResult<T> {
        let mut conn = self.lock();
        f(&mut conn)
    }

    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.with_connection(|conn| Ok(conn.execute_batch(sql)?))
    }

    /// Returns the first column of every row produced by `sql`.
    pub fn fetch_column(&self, sql: &str) -> DbResult<Vec<Value>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([])?;
            let mut values = Vec::new();
            while let Some(row) = rows.next()? {
                values.push(value_to_json(row.get_ref(0)?));
            }
            Ok(values)
        })
    }

    pub fn table_exists(&self, table: &str) -> DbResult<bool> {
        self.with_connection(|conn| Ok(table_exists(conn, table)?))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn configure_connection(conn: &Connection, options: SqlOptions) -> rusqlite::Result<()> {
    let foreign_keys = if options.foreign_keys { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys = {foreign_keys};"))?;
    conn.busy_timeout(options.busy_timeout)?;
    Ok(())
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .map(|exists| exists == 1)
}

pub(crate) fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::from(v),
        ValueRef::Real(v) => Value::from(v),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

pub(crate) fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => SqlValue::Integer(integer),
            None => SqlValue::Real(number.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
