//! Storage tables kept inside a SQL database.
//!
//! # Responsibility
//! - Expose tables of a resolved SQL database through the `Storage` contract.
//!
//! # Invariants
//! - Each storage table is a real SQLite table; declared columns are enforced.
//! - Row order is rowid order, which is insertion order.
//! - Batches run in one transaction.

use super::{Row, Storage, StorageError, StorageResult};
use crate::database::sql::{json_to_sql, quote_identifier, table_exists, value_to_json};
use crate::database::{Database, SqlDatabase};
use crate::error::DbResult;
use crate::schema::is_valid_identifier;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct SqlTableStorage {
    database: String,
    sql: SqlDatabase,
}

impl SqlTableStorage {
    /// Wraps the SQL database behind `database`; any other backend is a
    /// `BackendMismatch`.
    pub fn new(database: &Database) -> DbResult<Self> {
        Ok(Self {
            database: database.name().to_string(),
            sql: database.require_sql()?.clone(),
        })
    }

    /// Name of the SQL database holding the tables.
    pub fn database(&self) -> &str {
        &self.database
    }

    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut Connection, &str) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let table = checked_name(table)?;
        let mut conn = self.sql.lock();
        if !table_exists(&conn, table)? {
            return Err(StorageError::UnknownTable(table.to_string()));
        }
        f(&mut conn, table)
    }
}

impl Storage for SqlTableStorage {
    fn kind(&self) -> &'static str {
        "sql_table"
    }

    fn has_table(&self, table: &str) -> StorageResult<bool> {
        let table = checked_name(table)?;
        Ok(table_exists(&self.sql.lock(), table)?)
    }

    fn create_table(
        &self,
        table: &str,
        primary_key: &str,
        columns: &[String],
    ) -> StorageResult<bool> {
        let table = checked_name(table)?;
        let conn = self.sql.lock();
        if table_exists(&conn, table)? {
            return Ok(false);
        }

        let mut definitions = vec![format!(
            "{} PRIMARY KEY NOT NULL",
            quote_identifier(checked_name(primary_key)?)
        )];
        for column in columns.iter().filter(|column| *column != primary_key) {
            definitions.push(quote_identifier(checked_name(column)?));
        }
        conn.execute_batch(&format!(
            "CREATE TABLE {} ({});",
            quote_identifier(table),
            definitions.join(", ")
        ))?;
        Ok(true)
    }

    fn drop_table(&self, table: &str) -> StorageResult<bool> {
        let table = checked_name(table)?;
        let conn = self.sql.lock();
        if !table_exists(&conn, table)? {
            return Ok(false);
        }
        conn.execute_batch(&format!("DROP TABLE {};", quote_identifier(table)))?;
        Ok(true)
    }

    fn insert(&self, table: &str, row: Row) -> StorageResult<Value> {
        self.with_table(table, |conn, table| {
            let tx = conn.transaction()?;
            let key = insert_row(&tx, table, row)?;
            tx.commit()?;
            Ok(key)
        })
    }

    fn insert_all(&self, table: &str, rows: Vec<Row>) -> StorageResult<Vec<Value>> {
        self.with_table(table, |conn, table| {
            let tx = conn.transaction()?;
            let keys = rows
                .into_iter()
                .map(|row| insert_row(&tx, table, row))
                .collect::<StorageResult<Vec<_>>>()?;
            tx.commit()?;
            Ok(keys)
        })
    }

    fn rows(&self, table: &str) -> StorageResult<Vec<Row>> {
        self.with_table(table, |conn, table| {
            let mut stmt = conn.prepare(&format!(
                "SELECT * FROM {} ORDER BY rowid;",
                quote_identifier(table)
            ))?;
            let names = stmt
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>();
            let mut rows = stmt.query([])?;
            let mut collected = Vec::new();
            while let Some(row) = rows.next()? {
                let mut record = Row::new();
                for (index, name) in names.iter().enumerate() {
                    record.insert(name.clone(), value_to_json(row.get_ref(index)?));
                }
                collected.push(record);
            }
            Ok(collected)
        })
    }

    fn count(&self, table: &str) -> StorageResult<usize> {
        self.with_table(table, |conn, table| {
            let count = conn.query_row(
                &format!("SELECT COUNT(*) FROM {};", quote_identifier(table)),
                [],
                |row| row.get::<_, i64>(0),
            )?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
    }
}

fn checked_name(name: &str) -> StorageResult<&str> {
    if is_valid_identifier(name) {
        Ok(name)
    } else {
        Err(StorageError::InvalidTableName(name.to_string()))
    }
}

/// Returns `(columns, primary key)` as declared by the table.
fn table_layout(conn: &Connection, table: &str) -> StorageResult<(Vec<String>, String)> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", quote_identifier(table)))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    let mut primary_key = None;
    while let Some(row) = rows.next()? {
        let name: String = row.get("name")?;
        if row.get::<_, i64>("pk")? > 0 {
            primary_key = Some(name.clone());
        }
        columns.push(name);
    }
    let primary_key = primary_key.ok_or_else(|| StorageError::UnknownColumn {
        table: table.to_string(),
        column: "<primary key>".to_string(),
    })?;
    Ok((columns, primary_key))
}

fn next_key(conn: &Connection, table: &str, primary_key: &str) -> StorageResult<i64> {
    let column = quote_identifier(primary_key);
    let max = conn.query_row(
        &format!(
            "SELECT MAX({column}) FROM {} WHERE typeof({column}) = 'integer';",
            quote_identifier(table)
        ),
        [],
        |row| row.get::<_, Option<i64>>(0),
    )?;
    max.unwrap_or(0)
        .checked_add(1)
        .ok_or_else(|| StorageError::KeyOverflow {
            table: table.to_string(),
        })
}

fn insert_row(conn: &Connection, table: &str, mut row: Row) -> StorageResult<Value> {
    let (columns, primary_key) = table_layout(conn, table)?;
    if let Some(column) = row.keys().find(|key| !columns.contains(key)) {
        return Err(StorageError::UnknownColumn {
            table: table.to_string(),
            column: column.clone(),
        });
    }

    let key = match row.get(&primary_key) {
        None | Some(Value::Null) => {
            let assigned = Value::from(next_key(conn, table, &primary_key)?);
            row.insert(primary_key.clone(), assigned.clone());
            assigned
        }
        Some(existing) => existing.clone(),
    };
    if key.as_i64().is_some_and(|id| id.checked_add(1).is_none()) {
        return Err(StorageError::KeyOverflow {
            table: table.to_string(),
        });
    }

    let exists = conn.query_row(
        &format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1);",
            quote_identifier(table),
            quote_identifier(&primary_key)
        ),
        [json_to_sql(&key)],
        |row| row.get::<_, i64>(0),
    )?;
    if exists == 1 {
        return Err(StorageError::DuplicateKey {
            table: table.to_string(),
            key: key.to_string(),
        });
    }

    let names = row
        .keys()
        .map(|name| quote_identifier(name))
        .collect::<Vec<_>>();
    let placeholders = (1..=names.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>();
    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({});",
            quote_identifier(table),
            names.join(", "),
            placeholders.join(", ")
        ),
        params_from_iter(row.values().map(json_to_sql)),
    )?;
    Ok(key)
}
