//! Named database registry with lazy, memoized construction.
//!
//! # Responsibility
//! - Hold deferred constructors (factory + parameters) per database name.
//! - Resolve each name at most once and hand out the shared handle.
//! - Map roles (`pdo`, `storage`, custom) to database names.
//!
//! # Invariants
//! - Names are unique; a duplicate registration leaves the first intact.
//! - A cached handle is never replaced; every caller observes the same `Arc`.
//! - Concurrent first access runs the factory once: each entry owns a
//!   `OnceCell`, so the map lock is released before construction and only
//!   callers of the same name wait on each other.
//! - A failed construction caches nothing; the next access retries.
//! - A factory may resolve other names through the registry it is given.
//!   Re-entering a name that is still under construction on the same thread
//!   fails with `ResolutionCycle` instead of deadlocking on its cell.

use crate::config::Parameters;
use crate::database::{Database, DatabaseFactory};
use crate::error::{DatabaseError, DbResult};
use log::{error, info, warn};
use once_cell::sync::OnceCell;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// Deferred constructor for one named database.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub name: String,
    pub factory: Arc<dyn DatabaseFactory>,
    pub parameters: Parameters,
}

impl DatabaseConfig {
    pub fn new(
        name: impl Into<String>,
        factory: Arc<dyn DatabaseFactory>,
        parameters: Parameters,
    ) -> Self {
        Self {
            name: name.into(),
            factory,
            parameters,
        }
    }
}

impl Debug for DatabaseConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

struct Entry {
    // `None` for handles added already constructed.
    config: Option<DatabaseConfig>,
    cell: OnceCell<Arc<Database>>,
}

pub struct DatabaseRegistry {
    defaults: RwLock<BTreeMap<String, String>>,
    entries: RwLock<BTreeMap<String, Arc<Entry>>>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self {
            defaults: RwLock::new(BTreeMap::new()),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers a deferred constructor under `name`.
    pub fn register(
        &self,
        name: impl Into<String>,
        factory: Arc<dyn DatabaseFactory>,
        parameters: Parameters,
    ) -> DbResult<()> {
        self.register_config(DatabaseConfig::new(name, factory, parameters))
    }

    pub fn register_config(&self, config: DatabaseConfig) -> DbResult<()> {
        let name = config.name.clone();
        self.insert(
            name,
            Entry {
                config: Some(config),
                cell: OnceCell::new(),
            },
        )
    }

    /// Registers an already-constructed handle under its own name.
    pub fn add(&self, database: Database) -> DbResult<Arc<Database>> {
        let database = Arc::new(database);
        let cell = OnceCell::with_value(Arc::clone(&database));
        self.insert(
            database.name().to_string(),
            Entry { config: None, cell },
        )?;
        Ok(database)
    }

    fn insert(&self, name: String, entry: Entry) -> DbResult<()> {
        let mut entries = self.entries_mut();
        if entries.contains_key(&name) {
            warn!("event=db_register module=registry status=error error_code=duplicate_name database={name}");
            return Err(DatabaseError::DuplicateName(name));
        }
        info!("event=db_register module=registry status=ok database={name}");
        entries.insert(name, Arc::new(entry));
        Ok(())
    }

    /// Points `role` at `name`. Last write wins.
    pub fn add_default(&self, role: impl Into<String>, name: impl Into<String>) {
        let (role, name) = (role.into(), name.into());
        let previous = self.defaults_mut().insert(role.clone(), name.clone());
        if let Some(previous) = previous.filter(|previous| previous != &name) {
            info!("event=db_default module=registry status=overridden role={role} database={name} previous={previous}");
        }
    }

    /// Resolves `name`, constructing it on first access.
    ///
    /// # Errors
    /// - `UnknownDatabase` when `name` was never registered.
    /// - `DatabaseConstruction` wrapping the factory's error.
    /// - `ResolutionCycle` when a factory on this thread asks for a name it
    ///   is still constructing.
    pub fn get(&self, name: &str) -> DbResult<Arc<Database>> {
        let entry = self
            .entries()
            .get(name)
            .cloned()
            .ok_or_else(|| DatabaseError::UnknownDatabase(name.to_string()))?;

        if let Some(database) = entry.cell.get() {
            return Ok(Arc::clone(database));
        }

        let _guard = ResolutionGuard::enter(self, name)?;
        entry
            .cell
            .get_or_try_init(|| self.construct(name, entry.config.as_ref()))
            .map(Arc::clone)
    }

    /// Resolves the database configured for `role`.
    pub fn default(&self, role: &str) -> DbResult<Arc<Database>> {
        let name = self
            .default_name(role)
            .ok_or_else(|| DatabaseError::UnknownRole(role.to_string()))?;
        self.get(&name)
    }

    pub fn default_name(&self, role: &str) -> Option<String> {
        self.defaults_ref().get(role).cloned()
    }

    /// Snapshot of role -> database name.
    pub fn defaults(&self) -> BTreeMap<String, String> {
        self.defaults_ref().clone()
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries().contains_key(name)
    }

    /// Whether `name` has been constructed (or was added pre-built).
    pub fn is_resolved(&self, name: &str) -> bool {
        self.entries()
            .get(name)
            .is_some_and(|entry| entry.cell.get().is_some())
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }

    fn entries(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<Entry>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn entries_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<Entry>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn defaults_ref(&self) -> RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.defaults.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn defaults_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<String, String>> {
        self.defaults.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DatabaseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for DatabaseRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseRegistry")
            .field("defaults", &*self.defaults_ref())
            .field("databases", &self.names())
            .finish()
    }
}

thread_local! {
    // (registry address, name) pairs under construction on this thread.
    static RESOLVING: RefCell<Vec<(usize, String)>> = const { RefCell::new(Vec::new()) };
}

struct ResolutionGuard;

impl ResolutionGuard {
    fn enter(registry: &DatabaseRegistry, name: &str) -> DbResult<Self> {
        let key = (registry as *const DatabaseRegistry as usize, name.to_string());
        RESOLVING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&key) {
                let chain = stack
                    .iter()
                    .filter(|(owner, _)| *owner == key.0)
                    .map(|(_, name)| name.as_str())
                    .collect::<Vec<_>>()
                    .join(" -> ");
                warn!("event=db_resolve module=registry status=error error_code=resolution_cycle database={name} chain={chain}");
                return Err(DatabaseError::ResolutionCycle(name.to_string()));
            }
            stack.push(key);
            Ok(Self)
        })
    }
}

impl Drop for ResolutionGuard {
    fn drop(&mut self) {
        RESOLVING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

impl DatabaseRegistry {
    fn construct(&self, name: &str, config: Option<&DatabaseConfig>) -> DbResult<Arc<Database>> {
        let Some(config) = config else {
            return Err(DatabaseError::UnknownDatabase(name.to_string()));
        };

        let started_at = Instant::now();
        match config
            .factory
            .create_database(&config.name, &config.parameters, self)
        {
            Ok(database) => {
                info!(
                    "event=db_resolve module=registry status=ok database={} kind={} duration_ms={}",
                    name,
                    database.kind(),
                    started_at.elapsed().as_millis()
                );
                Ok(Arc::new(database))
            }
            Err(err) => {
                error!(
                    "event=db_resolve module=registry status=error database={} duration_ms={} error_code=db_construction_failed error={}",
                    name,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(DatabaseError::construction(name, err))
            }
        }
    }
}
