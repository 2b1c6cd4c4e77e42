//! Structured key-value/document storage backends.
//!
//! # Responsibility
//! - Define the table-oriented `Storage` contract used by storage databases.
//! - Provide in-memory, JSON-file and SQL-table implementations.
//!
//! # Invariants
//! - Rows keep insertion order within a table.
//! - Primary keys are unique per table; missing keys are auto-assigned.
//! - `insert_all` stores every row or none of them.
//! - Memory and JSON-file tables are schemaless: declared columns are not
//!   enforced. SQL-table storage rejects columns the table does not declare.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};

mod json_file;
mod memory;
mod sql_table;

pub use json_file::JsonFileStorage;
pub use memory::MemoryStorage;
pub use sql_table::SqlTableStorage;

/// One stored record. Column order is not significant.
pub type Row = serde_json::Map<String, Value>;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug)]
pub enum StorageError {
    UnknownTable(String),
    InvalidTableName(String),
    DuplicateKey { table: String, key: String },
    /// An integer key left no room for the next auto-assigned one.
    KeyOverflow { table: String },
    UnknownColumn { table: String, column: String },
    Io(std::io::Error),
    Json(serde_json::Error),
    Sql(rusqlite::Error),
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTable(table) => write!(f, "storage table not found: {table}"),
            Self::InvalidTableName(table) => write!(f, "invalid storage table name: {table}"),
            Self::DuplicateKey { table, key } => {
                write!(f, "duplicate primary key `{key}` in storage table `{table}`")
            }
            Self::KeyOverflow { table } => {
                write!(f, "primary key space exhausted in storage table `{table}`")
            }
            Self::UnknownColumn { table, column } => {
                write!(f, "storage table `{table}` has no column `{column}`")
            }
            Self::Io(err) => write!(f, "{err}"),
            Self::Json(err) => write!(f, "{err}"),
            Self::Sql(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::Sql(err) => Some(err),
            Self::UnknownTable(_)
            | Self::InvalidTableName(_)
            | Self::DuplicateKey { .. }
            | Self::KeyOverflow { .. }
            | Self::UnknownColumn { .. } => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

/// Table-oriented storage contract.
///
/// Implementations must be safe to share across threads; every method takes
/// `&self` and synchronizes internally.
pub trait Storage: Debug + Send + Sync {
    /// Short backend identifier, e.g. `memory` or `json_file`.
    fn kind(&self) -> &'static str;

    fn has_table(&self, table: &str) -> StorageResult<bool>;

    /// Creates `table` if absent. Returns `true` when it was created.
    ///
    /// `columns` lists every declared column, the primary key included.
    fn create_table(&self, table: &str, primary_key: &str, columns: &[String])
        -> StorageResult<bool>;

    /// Drops `table` if present. Returns `true` when something was dropped.
    fn drop_table(&self, table: &str) -> StorageResult<bool>;

    /// Appends one row and returns its primary key value.
    fn insert(&self, table: &str, row: Row) -> StorageResult<Value>;

    /// Appends `rows` as one unit: on error nothing is stored.
    fn insert_all(&self, table: &str, rows: Vec<Row>) -> StorageResult<Vec<Value>>;

    /// Returns all rows in insertion order.
    fn rows(&self, table: &str) -> StorageResult<Vec<Row>>;

    fn count(&self, table: &str) -> StorageResult<usize> {
        Ok(self.rows(table)?.len())
    }

    /// Returns one column across all rows; rows without it yield `Null`.
    fn column(&self, table: &str, column: &str) -> StorageResult<Vec<Value>> {
        Ok(self
            .rows(table)?
            .into_iter()
            .map(|mut row| row.remove(column).unwrap_or(Value::Null))
            .collect())
    }
}

/// Serializable table state shared by the bundled backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TableData {
    primary_key: String,
    next_id: i64,
    rows: Vec<Row>,
}

impl TableData {
    pub fn new(primary_key: &str) -> Self {
        Self {
            primary_key: primary_key.to_string(),
            next_id: 1,
            rows: Vec::new(),
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn insert(&mut self, table: &str, mut row: Row) -> StorageResult<Value> {
        let key = match row.get(&self.primary_key) {
            None | Some(Value::Null) => {
                let assigned = Value::from(self.next_id);
                row.insert(self.primary_key.clone(), assigned.clone());
                assigned
            }
            Some(existing) => existing.clone(),
        };

        if self
            .rows
            .iter()
            .any(|stored| stored.get(&self.primary_key) == Some(&key))
        {
            return Err(StorageError::DuplicateKey {
                table: table.to_string(),
                key: key.to_string(),
            });
        }

        if let Some(id) = key.as_i64() {
            let after = id.checked_add(1).ok_or_else(|| StorageError::KeyOverflow {
                table: table.to_string(),
            })?;
            self.next_id = self.next_id.max(after);
        }
        self.rows.push(row);
        Ok(key)
    }

    /// Inserts into a copy and keeps it only when every row succeeded.
    pub fn insert_all(&mut self, table: &str, rows: Vec<Row>) -> StorageResult<Vec<Value>> {
        let mut staged = self.clone();
        let keys = rows
            .into_iter()
            .map(|row| staged.insert(table, row))
            .collect::<StorageResult<Vec<_>>>()?;
        *self = staged;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::{Row, StorageError, TableData};
    use serde_json::{json, Value};

    fn row(value: Value) -> Row {
        value.as_object().cloned().expect("object literal")
    }

    #[test]
    fn assigns_incrementing_keys_when_missing() {
        let mut data = TableData::new("id");
        let first = data.insert("products", row(json!({"sku": "pen"}))).unwrap();
        let second = data.insert("products", row(json!({"sku": "pencil"}))).unwrap();

        assert_eq!(first, json!(1));
        assert_eq!(second, json!(2));
        assert_eq!(data.rows()[1]["sku"], "pencil");
    }

    #[test]
    fn explicit_keys_advance_the_counter() {
        let mut data = TableData::new("id");
        data.insert("t", row(json!({"id": 10}))).unwrap();
        let next = data.insert("t", row(json!({}))).unwrap();
        assert_eq!(next, json!(11));
    }

    #[test]
    fn rejects_duplicate_keys() {
        let mut data = TableData::new("code");
        data.insert("countries", row(json!({"code": "CH"}))).unwrap();
        let err = data
            .insert("countries", row(json!({"code": "CH"})))
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey { .. }));
        assert_eq!(data.rows().len(), 1);
    }

    #[test]
    fn key_at_upper_bound_is_rejected_without_storing() {
        let mut data = TableData::new("id");
        let err = data
            .insert("t", row(json!({"id": i64::MAX})))
            .unwrap_err();
        assert!(matches!(err, StorageError::KeyOverflow { ref table } if table == "t"));
        assert!(data.rows().is_empty());

        let next = data.insert("t", row(json!({"id": i64::MAX - 1}))).unwrap();
        assert_eq!(next, json!(i64::MAX - 1));
    }

    #[test]
    fn insert_all_keeps_nothing_on_failure() {
        let mut data = TableData::new("id");
        data.insert("t", row(json!({"id": 1}))).unwrap();

        let err = data
            .insert_all(
                "t",
                vec![row(json!({"id": 2})), row(json!({"id": 2})), row(json!({}))],
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey { .. }));
        assert_eq!(data.rows().len(), 1);
        assert_eq!(data.insert("t", row(json!({}))).unwrap(), json!(2));

        let keys = data
            .insert_all("t", vec![row(json!({"sku": "pen"})), row(json!({"sku": "ink"}))])
            .unwrap();
        assert_eq!(keys, vec![json!(3), json!(4)]);
    }
}
