//! Factories turning configuration parameters into database handles.
//!
//! # Invariants
//! - Required keys are validated before any I/O; all missing keys are
//!   reported together.

use super::{Database, SqlDatabase, SqlOptions};
use crate::config::Parameters;
use crate::error::{DatabaseError, DbResult};
use crate::registry::DatabaseRegistry;
use crate::storage::{JsonFileStorage, MemoryStorage, SqlTableStorage};
use std::path::Path;
use std::time::Duration;

const SQLITE_MEMORY: &str = ":memory:";

/// Deferred constructor for one backend kind.
///
/// `databases` is the registry resolving this entry; factories layered on
/// another database look it up there.
pub trait DatabaseFactory: Send + Sync {
    fn create_database(
        &self,
        name: &str,
        parameters: &Parameters,
        databases: &DatabaseRegistry,
    ) -> DbResult<Database>;
}

/// Builds SQL databases.
///
/// Keys: `driver` (required, `sqlite`), `database` (required, file path or
/// `:memory:`), `busy_timeout_ms`, `foreign_keys`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlDatabaseFactory;

impl DatabaseFactory for SqlDatabaseFactory {
    fn create_database(
        &self,
        name: &str,
        parameters: &Parameters,
        _databases: &DatabaseRegistry,
    ) -> DbResult<Database> {
        parameters.require(name, &["driver", "database"])?;

        let driver = parameters.required_str(name, "driver")?;
        if !driver.eq_ignore_ascii_case("sqlite") {
            return Err(DatabaseError::InvalidParameter {
                database: name.to_string(),
                key: "driver".to_string(),
                reason: format!("unsupported driver `{driver}`; expected sqlite"),
            });
        }

        let mut options = SqlOptions::default();
        if let Some(ms) = parameters.u64(name, "busy_timeout_ms")? {
            options.busy_timeout = Duration::from_millis(ms);
        }
        if let Some(enabled) = parameters.bool(name, "foreign_keys")? {
            options.foreign_keys = enabled;
        }

        let target = parameters.required_str(name, "database")?;
        let sql = if target == SQLITE_MEMORY {
            SqlDatabase::open_in_memory(options)?
        } else {
            let path = Path::new(target);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|err| {
                    DatabaseError::InvalidParameter {
                        database: name.to_string(),
                        key: "database".to_string(),
                        reason: format!("cannot create `{}`: {err}", parent.display()),
                    }
                })?;
            }
            SqlDatabase::open(path, options)?
        };

        Ok(Database::sql(name, sql))
    }
}

/// Builds structured storage databases.
///
/// Keys: `storage` (required, `memory`, `json_file` or `sql_table`), `dir`
/// (required for `json_file`), `database` (required for `sql_table`: the
/// registered SQL database holding the tables).
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageDatabaseFactory;

impl DatabaseFactory for StorageDatabaseFactory {
    fn create_database(
        &self,
        name: &str,
        parameters: &Parameters,
        databases: &DatabaseRegistry,
    ) -> DbResult<Database> {
        parameters.require(name, &["storage"])?;

        match parameters.required_str(name, "storage")? {
            "memory" => Ok(Database::storage(name, MemoryStorage::new())),
            "json_file" => {
                let dir = parameters.required_str(name, "dir")?;
                let storage = JsonFileStorage::open(dir)?;
                Ok(Database::storage(name, storage))
            }
            "sql_table" => {
                let target = parameters.required_str(name, "database")?;
                let storage = SqlTableStorage::new(&*databases.get(target)?)?;
                Ok(Database::storage(name, storage))
            }
            other => Err(DatabaseError::InvalidParameter {
                database: name.to_string(),
                key: "storage".to_string(),
                reason: format!(
                    "unsupported storage `{other}`; expected memory|json_file|sql_table"
                ),
            }),
        }
    }
}
