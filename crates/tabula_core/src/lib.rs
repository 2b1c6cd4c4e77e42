//! Named database registry with lazy construction and pluggable migration
//! processors.

pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod migration;
pub mod processor;
pub mod registry;
pub mod schema;
pub mod storage;

pub use app::{AppContext, Catalog};
pub use config::{
    DatabaseEntry, DatabasesConfig, Parameters, DEFAULT_SQL_ROLE, DEFAULT_STORAGE_ROLE,
};
pub use database::{
    Backend, BackendKind, Database, DatabaseFactory, SqlDatabase, SqlDatabaseFactory,
    SqlLocation, SqlOptions, StorageDatabaseFactory,
};
pub use error::{DatabaseError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use migration::{Migration, MigrationReport, Migrator, TableMigration, UninstallReport};
pub use processor::{InstallOutcome, Processor, Processors, SqliteProcessor, StorageProcessor};
pub use registry::{DatabaseConfig, DatabaseRegistry};
pub use schema::{Column, ColumnType, SeedPolicy, Table};
pub use storage::{
    JsonFileStorage, MemoryStorage, Row, SqlTableStorage, Storage, StorageError, StorageResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
