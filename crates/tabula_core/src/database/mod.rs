//! Database handles and the factories that build them.
//!
//! # Responsibility
//! - Wrap one constructed backend (SQL connection or structured storage)
//!   under a stable database name.
//! - Expose typed access that fails with `BackendMismatch` instead of
//!   panicking when a caller expects the other backend kind.
//!
//! # Invariants
//! - A handle's name and backend never change after construction.

use crate::error::{DatabaseError, DbResult};
use crate::storage::Storage;
use std::fmt::{Debug, Display, Formatter};

mod factory;
pub(crate) mod sql;

pub use factory::{DatabaseFactory, SqlDatabaseFactory, StorageDatabaseFactory};
pub use sql::{SqlDatabase, SqlLocation, SqlOptions};

/// Backend kind tag used for capability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Sql,
    Storage,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::Storage => "storage",
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub enum Backend {
    Sql(SqlDatabase),
    Storage(Box<dyn Storage>),
}

impl Debug for Backend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sql(sql) => f.debug_tuple("Sql").field(sql.location()).finish(),
            Self::Storage(storage) => f.debug_tuple("Storage").field(&storage.kind()).finish(),
        }
    }
}

/// A live, constructed database.
#[derive(Debug)]
pub struct Database {
    name: String,
    backend: Backend,
}

impl Database {
    pub fn new(name: impl Into<String>, backend: Backend) -> Self {
        Self {
            name: name.into(),
            backend,
        }
    }

    pub fn sql(name: impl Into<String>, sql: SqlDatabase) -> Self {
        Self::new(name, Backend::Sql(sql))
    }

    pub fn storage(name: impl Into<String>, storage: impl Storage + 'static) -> Self {
        Self::new(name, Backend::Storage(Box::new(storage)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn kind(&self) -> BackendKind {
        match self.backend {
            Backend::Sql(_) => BackendKind::Sql,
            Backend::Storage(_) => BackendKind::Storage,
        }
    }

    pub fn as_sql(&self) -> Option<&SqlDatabase> {
        match &self.backend {
            Backend::Sql(sql) => Some(sql),
            Backend::Storage(_) => None,
        }
    }

    pub fn as_storage(&self) -> Option<&dyn Storage> {
        match &self.backend {
            Backend::Storage(storage) => Some(storage.as_ref()),
            Backend::Sql(_) => None,
        }
    }

    pub fn require_sql(&self) -> DbResult<&SqlDatabase> {
        self.as_sql().ok_or_else(|| self.mismatch(BackendKind::Sql))
    }

    pub fn require_storage(&self) -> DbResult<&dyn Storage> {
        self.as_storage()
            .ok_or_else(|| self.mismatch(BackendKind::Storage))
    }

    fn mismatch(&self, expected: BackendKind) -> DatabaseError {
        DatabaseError::BackendMismatch {
            database: self.name.clone(),
            expected,
            actual: self.kind(),
        }
    }
}
