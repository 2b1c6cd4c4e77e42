//! Migration runner.
//!
//! # Responsibility
//! - Collect the table migrations a `Migration` declares against the
//!   registry, then apply or revert them through a processor.
//!
//! # Invariants
//! - Tables install in declaration order and uninstall in reverse.
//! - Install stops at the first failing table. Tables installed before it
//!   stay installed; there is no cross-table rollback.
//! - Uninstall is best-effort: every table is attempted and failures are
//!   reported, not raised.

use crate::database::Database;
use crate::error::{DatabaseError, DbResult};
use crate::processor::{InstallOutcome, Processor};
use crate::registry::DatabaseRegistry;
use crate::schema::Table;
use log::{debug, info, warn};
use std::sync::Arc;

/// One table bound to the database it is installed into.
#[derive(Debug)]
pub struct TableMigration {
    pub name: String,
    pub description: String,
    pub table: Table,
    pub database: Arc<Database>,
}

impl TableMigration {
    pub fn new(name: impl Into<String>, table: Table, database: Arc<Database>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            table,
            database,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// `name=… description="…"` fields for key=value log lines.
    pub fn log_fields(&self) -> String {
        format!(
            "name={} description={:?}",
            self.name.replace(char::is_whitespace, "_"),
            self.description
        )
    }
}

/// A named group of table migrations.
///
/// `tables` receives the registry so implementations can bind each table to
/// a role default or a named database. Resolution errors abort the run
/// before any table is touched.
pub trait Migration {
    fn description(&self) -> &str;

    fn tables(&self, databases: &DatabaseRegistry) -> DbResult<Vec<TableMigration>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub description: String,
    pub outcomes: Vec<InstallOutcome>,
}

#[derive(Debug)]
pub struct UninstallReport {
    pub description: String,
    pub removed: Vec<String>,
    pub failures: Vec<(String, DatabaseError)>,
}

impl UninstallReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Migrator {
    databases: Arc<DatabaseRegistry>,
    processor: Arc<dyn Processor>,
}

impl Migrator {
    pub fn new(databases: Arc<DatabaseRegistry>, processor: Arc<dyn Processor>) -> Self {
        Self {
            databases,
            processor,
        }
    }

    /// Installs every table of `migration` in order.
    ///
    /// # Errors
    /// - Errors from `Migration::tables` are returned as-is.
    /// - A failing table yields `MigrationInstall` naming that table.
    pub fn install(&self, migration: &dyn Migration) -> DbResult<MigrationReport> {
        let tables = migration.tables(&self.databases)?;
        let mut outcomes = Vec::with_capacity(tables.len());

        for entry in &tables {
            let outcome = self
                .processor
                .install(&entry.table, &entry.database)
                .map_err(|err| {
                    warn!(
                        "event=migration_install module=migration status=error migration={} {} table={} database={} installed={} error={}",
                        migration.description(),
                        entry.log_fields(),
                        entry.table.name(),
                        entry.database.name(),
                        outcomes.len(),
                        err
                    );
                    DatabaseError::install(entry.table.name(), err)
                })?;
            debug!(
                "event=migration_table module=migration status=ok migration={} {} table={} created={} seeded={}",
                migration.description(),
                entry.log_fields(),
                outcome.table,
                outcome.created,
                outcome.seeded
            );
            outcomes.push(outcome);
        }

        info!(
            "event=migration_install module=migration status=ok migration={} tables={}",
            migration.description(),
            outcomes.len()
        );
        Ok(MigrationReport {
            description: migration.description().to_string(),
            outcomes,
        })
    }

    /// Uninstalls every table of `migration` in reverse order.
    pub fn uninstall(&self, migration: &dyn Migration) -> DbResult<UninstallReport> {
        let tables = migration.tables(&self.databases)?;
        let mut removed = Vec::new();
        let mut failures = Vec::new();

        for entry in tables.iter().rev() {
            match self.processor.uninstall(&entry.table, &entry.database) {
                Ok(()) => removed.push(entry.table.name().to_string()),
                Err(err) => {
                    warn!(
                        "event=migration_uninstall module=migration status=error migration={} {} table={} error={}",
                        migration.description(),
                        entry.log_fields(),
                        entry.table.name(),
                        err
                    );
                    failures.push((entry.table.name().to_string(), err));
                }
            }
        }

        info!(
            "event=migration_uninstall module=migration status={} migration={} removed={} failed={}",
            if failures.is_empty() { "ok" } else { "partial" },
            migration.description(),
            removed.len(),
            failures.len()
        );
        Ok(UninstallReport {
            description: migration.description().to_string(),
            removed,
            failures,
        })
    }
}
