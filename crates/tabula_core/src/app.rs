//! Application bootstrap: configuration in, wired registry and processors out.
//!
//! # Responsibility
//! - Translate `DatabasesConfig` selectors into factories and processors.
//! - Own the registry and processor chain for the lifetime of the app.
//! - Expose install/uninstall entry points and typed role accessors.
//!
//! # Invariants
//! - Bootstrap constructs no database; every entry stays deferred until
//!   first resolution.
//! - Unknown selectors fail bootstrap before anything is registered.

use crate::config::{DatabasesConfig, DEFAULT_SQL_ROLE, DEFAULT_STORAGE_ROLE};
use crate::database::{
    BackendKind, Database, DatabaseFactory, SqlDatabaseFactory, StorageDatabaseFactory,
};
use crate::error::{DatabaseError, DbResult};
use crate::migration::{Migration, MigrationReport, Migrator, UninstallReport};
use crate::processor::{Processor, Processors, SqliteProcessor, StorageProcessor};
use crate::registry::{DatabaseConfig, DatabaseRegistry};
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Selector -> implementation lookup used during bootstrap.
#[derive(Clone, Default)]
pub struct Catalog {
    factories: BTreeMap<String, Arc<dyn DatabaseFactory>>,
    processors: BTreeMap<String, Arc<dyn Processor>>,
}

impl Catalog {
    /// Empty catalog; every selector must be registered explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factories `sql` and `storage`, processors `sqlite` and `storage`.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::new();
        catalog.register_factory("sql", Arc::new(SqlDatabaseFactory));
        catalog.register_factory("storage", Arc::new(StorageDatabaseFactory));
        catalog.register_processor("sqlite", Arc::new(SqliteProcessor));
        catalog.register_processor("storage", Arc::new(StorageProcessor));
        catalog
    }

    /// Adds or replaces a factory selector.
    pub fn register_factory(
        &mut self,
        selector: impl Into<String>,
        factory: Arc<dyn DatabaseFactory>,
    ) -> &mut Self {
        self.factories.insert(selector.into(), factory);
        self
    }

    /// Adds or replaces a processor selector.
    pub fn register_processor(
        &mut self,
        selector: impl Into<String>,
        processor: Arc<dyn Processor>,
    ) -> &mut Self {
        self.processors.insert(selector.into(), processor);
        self
    }

    pub fn factory(&self, selector: &str) -> Option<&Arc<dyn DatabaseFactory>> {
        self.factories.get(selector)
    }

    pub fn processor(&self, selector: &str) -> Option<&Arc<dyn Processor>> {
        self.processors.get(selector)
    }
}

pub struct AppContext {
    databases: Arc<DatabaseRegistry>,
    processors: Arc<Processors>,
}

impl AppContext {
    pub fn new(databases: DatabaseRegistry, processors: Processors) -> Self {
        Self {
            databases: Arc::new(databases),
            processors: Arc::new(processors),
        }
    }

    /// Registers every configured database and processor.
    ///
    /// # Errors
    /// - `UnknownFactory` / `UnknownProcessor` for unmapped selectors.
    /// - `DuplicateName` cannot occur from a parsed config (map keys are
    ///   unique) but is propagated for completeness.
    pub fn boot(config: &DatabasesConfig, catalog: &Catalog) -> DbResult<Self> {
        let mut entries = Vec::with_capacity(config.databases.len());
        for (name, entry) in &config.databases {
            let factory = catalog.factory(&entry.factory).ok_or_else(|| {
                DatabaseError::UnknownFactory {
                    database: name.clone(),
                    factory: entry.factory.clone(),
                }
            })?;
            entries.push(DatabaseConfig::new(
                name.clone(),
                Arc::clone(factory),
                entry.config.clone(),
            ));
        }

        let mut processors = Processors::default();
        for selector in &config.processors {
            let processor = catalog
                .processor(selector)
                .ok_or_else(|| DatabaseError::UnknownProcessor(selector.clone()))?;
            processors.push(Arc::clone(processor));
        }

        let databases = DatabaseRegistry::new();
        for entry in entries {
            databases.register_config(entry)?;
        }
        for (role, name) in &config.defaults {
            if !databases.has(name) {
                warn!("event=app_boot module=app status=warn role={role} database={name} reason=unknown_database");
            }
            databases.add_default(role.clone(), name.clone());
        }

        info!(
            "event=app_boot module=app status=ok databases={} defaults={} processors={}",
            config.databases.len(),
            config.defaults.len(),
            processors.names().join(",")
        );
        Ok(Self::new(databases, processors))
    }

    pub fn databases(&self) -> &Arc<DatabaseRegistry> {
        &self.databases
    }

    pub fn processors(&self) -> &Processors {
        &self.processors
    }

    pub fn migrator(&self) -> Migrator {
        Migrator::new(
            Arc::clone(&self.databases),
            Arc::clone(&self.processors) as Arc<dyn Processor>,
        )
    }

    pub fn install(&self, migration: &dyn Migration) -> DbResult<MigrationReport> {
        self.migrator().install(migration)
    }

    pub fn uninstall(&self, migration: &dyn Migration) -> DbResult<UninstallReport> {
        self.migrator().uninstall(migration)
    }

    /// The `pdo` role, which must resolve to a SQL database.
    pub fn sql_database(&self) -> DbResult<Arc<Database>> {
        self.role_of_kind(DEFAULT_SQL_ROLE, BackendKind::Sql)
    }

    /// The `storage` role, which must resolve to a storage database.
    pub fn storage_database(&self) -> DbResult<Arc<Database>> {
        self.role_of_kind(DEFAULT_STORAGE_ROLE, BackendKind::Storage)
    }

    fn role_of_kind(&self, role: &str, expected: BackendKind) -> DbResult<Arc<Database>> {
        let database = self.databases.default(role)?;
        if database.kind() != expected {
            return Err(DatabaseError::BackendMismatch {
                database: database.name().to_string(),
                expected,
                actual: database.kind(),
            });
        }
        Ok(database)
    }
}
