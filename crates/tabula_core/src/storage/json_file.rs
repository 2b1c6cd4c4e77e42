//! JSON-file storage backend.
//!
//! # Responsibility
//! - Persist each table as `<dir>/<table>.json`.
//! - Load tables lazily on first access and keep them cached.
//!
//! # Invariants
//! - Every mutation is flushed before the call returns.
//! - Files are replaced through a temp file + rename, never written in place.

use super::{Row, Storage, StorageError, StorageResult, TableData};
use log::debug;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

const TABLE_FILE_EXTENSION: &str = "json";

#[derive(Debug)]
pub struct JsonFileStorage {
    dir: PathBuf,
    tables: Mutex<BTreeMap<String, TableData>>,
}

impl JsonFileStorage {
    /// Opens storage rooted at `dir`, creating the directory if missing.
    pub fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            tables: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn tables(&self) -> MutexGuard<'_, BTreeMap<String, TableData>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn table_path(&self, table: &str) -> StorageResult<PathBuf> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidTableName(table.to_string()));
        }
        Ok(self.dir.join(format!("{table}.{TABLE_FILE_EXTENSION}")))
    }

    /// Ensures `table` is cached. Returns `false` when it exists nowhere.
    fn load(&self, tables: &mut BTreeMap<String, TableData>, table: &str) -> StorageResult<bool> {
        if tables.contains_key(table) {
            return Ok(true);
        }
        let path = self.table_path(table)?;
        if !path.exists() {
            return Ok(false);
        }
        let data: TableData = serde_json::from_slice(&fs::read(&path)?)?;
        debug!(
            "event=storage_load module=storage status=ok table={} rows={}",
            table,
            data.rows().len()
        );
        tables.insert(table.to_string(), data);
        Ok(true)
    }

    fn persist(&self, table: &str, data: &TableData) -> StorageResult<()> {
        let path = self.table_path(table)?;
        let tmp = path.with_extension(format!("{TABLE_FILE_EXTENSION}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(data)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read_table<T>(&self, table: &str, f: impl FnOnce(&TableData) -> T) -> StorageResult<T> {
        let mut tables = self.tables();
        if !self.load(&mut tables, table)? {
            return Err(StorageError::UnknownTable(table.to_string()));
        }
        tables
            .get(table)
            .map(f)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))
    }

    /// Applies `f` to a copy, persists it, then swaps it into the cache.
    fn write_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut TableData) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut tables = self.tables();
        if !self.load(&mut tables, table)? {
            return Err(StorageError::UnknownTable(table.to_string()));
        }
        let data = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;

        let mut updated = data.clone();
        let result = f(&mut updated)?;
        self.persist(table, &updated)?;
        *data = updated;
        Ok(result)
    }
}

impl Storage for JsonFileStorage {
    fn kind(&self) -> &'static str {
        "json_file"
    }

    fn has_table(&self, table: &str) -> StorageResult<bool> {
        let mut tables = self.tables();
        self.load(&mut tables, table)
    }

    fn create_table(
        &self,
        table: &str,
        primary_key: &str,
        _columns: &[String],
    ) -> StorageResult<bool> {
        let mut tables = self.tables();
        if self.load(&mut tables, table)? {
            return Ok(false);
        }
        let data = TableData::new(primary_key);
        self.persist(table, &data)?;
        tables.insert(table.to_string(), data);
        Ok(true)
    }

    fn drop_table(&self, table: &str) -> StorageResult<bool> {
        let path = self.table_path(table)?;
        let mut tables = self.tables();
        let cached = tables.remove(table).is_some();
        if path.exists() {
            fs::remove_file(&path)?;
            return Ok(true);
        }
        Ok(cached)
    }

    fn insert(&self, table: &str, row: Row) -> StorageResult<Value> {
        self.write_table(table, |data| data.insert(table, row))
    }

    fn insert_all(&self, table: &str, rows: Vec<Row>) -> StorageResult<Vec<Value>> {
        self.write_table(table, |data| data.insert_all(table, rows))
    }

    fn rows(&self, table: &str) -> StorageResult<Vec<Row>> {
        self.read_table(table, |data| data.rows().to_vec())
    }

    fn count(&self, table: &str) -> StorageResult<usize> {
        self.read_table(table, |data| data.rows().len())
    }
}
