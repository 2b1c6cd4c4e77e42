//! Process-local storage backend.

use super::{Row, Storage, StorageError, StorageResult, TableData};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Storage that keeps all tables in memory for the lifetime of the value.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<BTreeMap<String, TableData>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, BTreeMap<String, TableData>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut TableData) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut tables = self.tables();
        let data = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;
        f(data)
    }
}

impl Storage for MemoryStorage {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn has_table(&self, table: &str) -> StorageResult<bool> {
        Ok(self.tables().contains_key(table))
    }

    fn create_table(
        &self,
        table: &str,
        primary_key: &str,
        _columns: &[String],
    ) -> StorageResult<bool> {
        let mut tables = self.tables();
        if tables.contains_key(table) {
            return Ok(false);
        }
        tables.insert(table.to_string(), TableData::new(primary_key));
        Ok(true)
    }

    fn drop_table(&self, table: &str) -> StorageResult<bool> {
        Ok(self.tables().remove(table).is_some())
    }

    fn insert(&self, table: &str, row: Row) -> StorageResult<Value> {
        self.with_table(table, |data| data.insert(table, row))
    }

    fn insert_all(&self, table: &str, rows: Vec<Row>) -> StorageResult<Vec<Value>> {
        self.with_table(table, |data| data.insert_all(table, rows))
    }

    fn rows(&self, table: &str) -> StorageResult<Vec<Row>> {
        self.tables()
            .get(table)
            .map(|data| data.rows().to_vec())
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))
    }

    fn count(&self, table: &str) -> StorageResult<usize> {
        self.tables()
            .get(table)
            .map(|data| data.rows().len())
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))
    }
}
