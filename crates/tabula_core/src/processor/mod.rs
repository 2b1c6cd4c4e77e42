//! Migration processors and first-match dispatch.
//!
//! # Responsibility
//! - Apply (`install`) and revert (`uninstall`) one `Table` against one
//!   database handle.
//! - Select the processor for a handle by asking each one whether it
//!   supports it, in registration order.
//!
//! # Invariants
//! - `install` is idempotent under `SeedPolicy::WhenEmpty`.
//! - `uninstall` of an absent table succeeds.
//! - Dispatch never falls through to a processor whose `supports` is false.

use crate::database::Database;
use crate::error::{DatabaseError, DbResult};
use crate::schema::Table;
use log::debug;
use std::sync::Arc;

mod sqlite;
mod storage;

pub use sqlite::SqliteProcessor;
pub use storage::StorageProcessor;

/// Result of installing one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub table: String,
    /// Whether the table was created by this call.
    pub created: bool,
    /// Number of seed rows written by this call.
    pub seeded: usize,
}

/// Backend-specific strategy for schema and seed operations.
pub trait Processor: Send + Sync {
    /// Stable identifier used in logs and configuration.
    fn name(&self) -> &str;

    fn supports(&self, database: &Database) -> bool;

    fn install(&self, table: &Table, database: &Database) -> DbResult<InstallOutcome>;

    fn uninstall(&self, table: &Table, database: &Database) -> DbResult<()>;
}

/// Ordered processor chain; the first processor supporting a handle wins.
#[derive(Default, Clone)]
pub struct Processors {
    processors: Vec<Arc<dyn Processor>>,
}

impl Processors {
    pub fn new(processors: Vec<Arc<dyn Processor>>) -> Self {
        Self { processors }
    }

    /// Appends a processor at the lowest priority.
    pub fn push(&mut self, processor: Arc<dyn Processor>) {
        self.processors.push(processor);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Returns processor names in dispatch order.
    pub fn names(&self) -> Vec<String> {
        self.processors
            .iter()
            .map(|processor| processor.name().to_string())
            .collect()
    }

    /// Returns the first processor that supports `database`.
    pub fn select(&self, database: &Database) -> DbResult<&Arc<dyn Processor>> {
        let selected = self
            .processors
            .iter()
            .find(|processor| processor.supports(database))
            .ok_or_else(|| DatabaseError::NoProcessorFound {
                database: database.name().to_string(),
            })?;
        debug!(
            "event=processor_select module=processor status=ok database={} processor={}",
            database.name(),
            selected.name()
        );
        Ok(selected)
    }
}

impl Processor for Processors {
    fn name(&self) -> &str {
        "processors"
    }

    fn supports(&self, database: &Database) -> bool {
        self.processors
            .iter()
            .any(|processor| processor.supports(database))
    }

    fn install(&self, table: &Table, database: &Database) -> DbResult<InstallOutcome> {
        self.select(database)?.install(table, database)
    }

    fn uninstall(&self, table: &Table, database: &Database) -> DbResult<()> {
        self.select(database)?.uninstall(table, database)
    }
}

#[cfg(test)]
mod tests {
    use super::{InstallOutcome, Processor, Processors};
    use crate::database::{BackendKind, Database};
    use crate::error::{DatabaseError, DbResult};
    use crate::schema::Table;
    use crate::storage::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Recording {
        name: &'static str,
        accepts: Option<BackendKind>,
        installs: AtomicUsize,
    }

    impl Recording {
        fn new(name: &'static str, accepts: Option<BackendKind>) -> Arc<Self> {
            Arc::new(Self {
                name,
                accepts,
                installs: AtomicUsize::new(0),
            })
        }
    }

    impl Processor for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn supports(&self, database: &Database) -> bool {
            self.accepts == Some(database.kind())
        }

        fn install(&self, table: &Table, _database: &Database) -> DbResult<InstallOutcome> {
            self.installs.fetch_add(1, Ordering::SeqCst);
            Ok(InstallOutcome {
                table: table.name().to_string(),
                created: true,
                seeded: 0,
            })
        }

        fn uninstall(&self, _table: &Table, _database: &Database) -> DbResult<()> {
            Ok(())
        }
    }

    #[test]
    fn first_supporting_processor_wins() {
        let specialized = Recording::new("specialized", None);
        let generic = Recording::new("generic", Some(BackendKind::Storage));
        let shadowed = Recording::new("shadowed", Some(BackendKind::Storage));
        let chain = Processors::new(vec![
            specialized.clone() as Arc<dyn Processor>,
            generic.clone(),
            shadowed.clone(),
        ]);
        let database = Database::storage("file", MemoryStorage::new());

        chain
            .install(&Table::new("users").primary("id"), &database)
            .unwrap();

        assert_eq!(specialized.installs.load(Ordering::SeqCst), 0);
        assert_eq!(generic.installs.load(Ordering::SeqCst), 1);
        assert_eq!(shadowed.installs.load(Ordering::SeqCst), 0);
        assert_eq!(chain.names(), vec!["specialized", "generic", "shadowed"]);
    }

    #[test]
    fn empty_chain_reports_no_processor() {
        let chain = Processors::default();
        let database = Database::storage("file", MemoryStorage::new());

        assert!(!chain.supports(&database));
        let err = chain
            .install(&Table::new("users").primary("id"), &database)
            .unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::NoProcessorFound { ref database } if database == "file"
        ));
    }
}
