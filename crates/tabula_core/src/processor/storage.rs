//! Storage processor: maps `Table` declarations onto `Storage` tables.
//!
//! # Invariants
//! - Seeding stores all rows of a table or none of them.
//! - A table created by a failed install is dropped again.

use super::{InstallOutcome, Processor};
use crate::database::{BackendKind, Database};
use crate::error::DbResult;
use crate::schema::{SeedPolicy, Table};
use log::{error, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct StorageProcessor;

impl Processor for StorageProcessor {
    fn name(&self) -> &str {
        "storage"
    }

    fn supports(&self, database: &Database) -> bool {
        database.kind() == BackendKind::Storage
    }

    fn install(&self, table: &Table, database: &Database) -> DbResult<InstallOutcome> {
        table.validate()?;
        let storage = database.require_storage()?;
        // validate() guarantees a primary key.
        let primary_key = table.primary_key().unwrap_or("id");

        let created = !storage.has_table(table.name())?
            && storage.create_table(table.name(), primary_key, &table.column_names())?;
        let should_seed = match table.policy() {
            SeedPolicy::Always => true,
            SeedPolicy::WhenEmpty => created || storage.count(table.name())? == 0,
        };

        let rows = table.seed_rows().cloned().collect::<Vec<_>>();
        let seeded = if should_seed && !rows.is_empty() {
            match storage.insert_all(table.name(), rows) {
                Ok(keys) => keys.len(),
                Err(err) => {
                    error!(
                        "event=table_install module=processor processor=storage status=error database={} backend={} table={} created={} error_code=seed_failed error={}",
                        database.name(),
                        storage.kind(),
                        table.name(),
                        created,
                        err
                    );
                    if created {
                        if let Err(drop_err) = storage.drop_table(table.name()) {
                            warn!(
                                "event=table_rollback module=processor processor=storage status=error database={} table={} error={}",
                                database.name(),
                                table.name(),
                                drop_err
                            );
                        }
                    }
                    return Err(err.into());
                }
            }
        } else {
            0
        };

        info!(
            "event=table_install module=processor processor=storage status=ok database={} backend={} table={} created={} seeded={}",
            database.name(),
            storage.kind(),
            table.name(),
            created,
            seeded
        );
        Ok(InstallOutcome {
            table: table.name().to_string(),
            created,
            seeded,
        })
    }

    fn uninstall(&self, table: &Table, database: &Database) -> DbResult<()> {
        table.validate()?;
        let dropped = database.require_storage()?.drop_table(table.name())?;
        info!(
            "event=table_uninstall module=processor processor=storage status=ok database={} table={} dropped={}",
            database.name(),
            table.name(),
            dropped
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::StorageProcessor;
    use crate::database::{Database, SqlDatabase, SqlOptions};
    use crate::error::DatabaseError;
    use crate::processor::Processor;
    use crate::schema::{SeedPolicy, Table};
    use crate::storage::{JsonFileStorage, MemoryStorage, SqlTableStorage, StorageError};
    use serde_json::json;

    fn products() -> Table {
        Table::new("products")
            .primary("id")
            .string("sku")
            .items([json!({"sku": "pen"}), json!({"sku": "pencil"})])
    }

    #[test]
    fn install_seeds_once() {
        let database = Database::storage("storage", MemoryStorage::new());

        let first = StorageProcessor.install(&products(), &database).unwrap();
        assert!(first.created);
        assert_eq!(first.seeded, 2);

        let second = StorageProcessor.install(&products(), &database).unwrap();
        assert!(!second.created);
        assert_eq!(second.seeded, 0);

        let storage = database.require_storage().unwrap();
        assert_eq!(
            storage.column("products", "sku").unwrap(),
            vec![json!("pen"), json!("pencil")]
        );
        assert_eq!(
            storage.column("products", "id").unwrap(),
            vec![json!(1), json!(2)]
        );
    }

    #[test]
    fn install_writes_through_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let database = Database::storage("file", JsonFileStorage::open(dir.path()).unwrap());
        let countries = Table::new("countries")
            .primary("id")
            .string("name")
            .items([json!({"code": "USA"}), json!({"code": "CH"})]);

        StorageProcessor.install(&countries, &database).unwrap();

        let reopened = JsonFileStorage::open(dir.path()).unwrap();
        let codes = crate::storage::Storage::column(&reopened, "countries", "code").unwrap();
        assert_eq!(codes, vec![json!("USA"), json!("CH")]);

        StorageProcessor.uninstall(&countries, &database).unwrap();
        assert!(!dir.path().join("countries.json").exists());
    }

    #[test]
    fn rejects_sql_databases() {
        let database = Database::sql(
            "primary",
            SqlDatabase::open_in_memory(SqlOptions::default()).unwrap(),
        );
        assert!(!StorageProcessor.supports(&database));
        let err = StorageProcessor.install(&products(), &database).unwrap_err();
        assert!(matches!(err, DatabaseError::BackendMismatch { .. }));
    }

    #[test]
    fn failed_seed_drops_the_new_table() {
        let database = Database::storage("storage", MemoryStorage::new());
        let duplicated = Table::new("products")
            .primary("id")
            .string("sku")
            .items([
                json!({"id": 1, "sku": "pen"}),
                json!({"id": 1, "sku": "ink"}),
                json!({"id": 2, "sku": "pencil"}),
            ]);

        let err = StorageProcessor.install(&duplicated, &database).unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::Storage(StorageError::DuplicateKey { .. })
        ));
        let storage = database.require_storage().unwrap();
        assert!(!storage.has_table("products").unwrap());

        let outcome = StorageProcessor.install(&products(), &database).unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.seeded, 2);
        assert_eq!(
            storage.column("products", "id").unwrap(),
            vec![json!(1), json!(2)]
        );
    }

    #[test]
    fn failed_seed_keeps_an_existing_table_unchanged() {
        let database = Database::storage("storage", MemoryStorage::new());
        StorageProcessor.install(&products(), &database).unwrap();
        let appended = products()
            .items([json!({"id": 1, "sku": "clash"})])
            .seed_policy(SeedPolicy::Always);

        assert!(StorageProcessor.install(&appended, &database).is_err());
        let storage = database.require_storage().unwrap();
        assert_eq!(
            storage.column("products", "sku").unwrap(),
            vec![json!("pen"), json!("pencil")]
        );
    }

    #[test]
    fn key_at_upper_bound_fails_without_panicking() {
        let database = Database::storage("storage", MemoryStorage::new());
        let bounded = Table::new("limits")
            .primary("id")
            .items([json!({"id": i64::MAX})]);

        let err = StorageProcessor.install(&bounded, &database).unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::Storage(StorageError::KeyOverflow { ref table }) if table == "limits"
        ));
        assert!(!database.require_storage().unwrap().has_table("limits").unwrap());
    }

    #[test]
    fn install_into_sql_tables() {
        let sql = Database::sql(
            "mysql",
            SqlDatabase::open_in_memory(SqlOptions::default()).unwrap(),
        );
        let database = Database::storage("storage", SqlTableStorage::new(&sql).unwrap());

        let outcome = StorageProcessor.install(&products(), &database).unwrap();
        assert_eq!(outcome.seeded, 2);
        assert_eq!(
            sql.require_sql()
                .unwrap()
                .fetch_column("SELECT sku FROM products ORDER BY id")
                .unwrap(),
            vec![json!("pen"), json!("pencil")]
        );

        let undeclared = Table::new("tags")
            .primary("id")
            .string("label")
            .items([json!({"label": "a"}), json!({"colour": "red"})]);
        let err = StorageProcessor.install(&undeclared, &database).unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::Storage(StorageError::UnknownColumn { .. })
        ));
        assert!(!sql.require_sql().unwrap().table_exists("tags").unwrap());
    }
}
