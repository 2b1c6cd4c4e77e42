//! Error taxonomy shared by registry, factories, processors and migrations.
//!
//! # Responsibility
//! - Give every configuration and lookup failure an identifying name/role.
//! - Wrap construction and install failures without losing the root cause.
//!
//! # Invariants
//! - `DatabaseConstruction` and `MigrationInstall` always expose their cause
//!   through `Error::source`.
//! - Nothing in this crate retries on error; disposition belongs to the caller.

use crate::database::BackendKind;
use crate::storage::StorageError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub type DbResult<T> = Result<T, DatabaseError>;

#[derive(Debug)]
pub enum DatabaseError {
    DuplicateName(String),
    UnknownDatabase(String),
    UnknownRole(String),
    InvalidConfig {
        database: String,
        missing_keys: Vec<String>,
    },
    InvalidParameter {
        database: String,
        key: String,
        reason: String,
    },
    DatabaseConstruction {
        database: String,
        source: Box<DatabaseError>,
    },
    BackendMismatch {
        database: String,
        expected: BackendKind,
        actual: BackendKind,
    },
    NoProcessorFound {
        database: String,
    },
    MigrationInstall {
        table: String,
        source: Box<DatabaseError>,
    },
    InvalidSchema {
        table: String,
        reason: String,
    },
    UnknownFactory {
        database: String,
        factory: String,
    },
    UnknownProcessor(String),
    /// A factory resolved a name that was still under construction.
    ResolutionCycle(String),
    ConfigLoad {
        path: PathBuf,
        reason: String,
    },
    Sqlite(rusqlite::Error),
    Storage(StorageError),
}

impl DatabaseError {
    /// Wraps a factory failure with the database name that produced it.
    pub fn construction(database: impl Into<String>, source: DatabaseError) -> Self {
        Self::DatabaseConstruction {
            database: database.into(),
            source: Box::new(source),
        }
    }

    /// Wraps a create/seed failure with the table name that produced it.
    pub fn install(table: impl Into<String>, source: DatabaseError) -> Self {
        Self::MigrationInstall {
            table: table.into(),
            source: Box::new(source),
        }
    }

    /// Returns the innermost error, skipping construction/install wrappers.
    pub fn root_cause(&self) -> &DatabaseError {
        match self {
            Self::DatabaseConstruction { source, .. } | Self::MigrationInstall { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}

impl Display for DatabaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateName(name) => write!(f, "database already registered: {name}"),
            Self::UnknownDatabase(name) => write!(f, "database not registered: {name}"),
            Self::UnknownRole(role) => write!(f, "no default database for role: {role}"),
            Self::InvalidConfig {
                database,
                missing_keys,
            } => write!(
                f,
                "database `{database}` is missing required config keys: {}",
                missing_keys.join(", ")
            ),
            Self::InvalidParameter {
                database,
                key,
                reason,
            } => write!(
                f,
                "database `{database}` has invalid config key `{key}`: {reason}"
            ),
            Self::DatabaseConstruction { database, source } => {
                write!(f, "failed to construct database `{database}`: {source}")
            }
            Self::BackendMismatch {
                database,
                expected,
                actual,
            } => write!(
                f,
                "database `{database}` is a {actual} database, expected {expected}"
            ),
            Self::NoProcessorFound { database } => {
                write!(f, "no processor supports database `{database}`")
            }
            Self::MigrationInstall { table, source } => {
                write!(f, "failed to install table `{table}`: {source}")
            }
            Self::InvalidSchema { table, reason } => {
                write!(f, "invalid schema for table `{table}`: {reason}")
            }
            Self::UnknownFactory { database, factory } => write!(
                f,
                "database `{database}` references unknown factory `{factory}`"
            ),
            Self::UnknownProcessor(name) => write!(f, "unknown processor: {name}"),
            Self::ResolutionCycle(name) => {
                write!(f, "database `{name}` depends on itself during construction")
            }
            Self::ConfigLoad { path, reason } => write!(
                f,
                "failed to load database config `{}`: {reason}",
                path.display()
            ),
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DatabaseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::DatabaseConstruction { source, .. } | Self::MigrationInstall { source, .. } => {
                Some(source.as_ref())
            }
            Self::Sqlite(err) => Some(err),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<StorageError> for DatabaseError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}
