//! Database configuration records.
//!
//! # Responsibility
//! - Model the `defaults` / `databases` / `processors` configuration sections.
//! - Provide typed, diagnosable access to driver parameters.
//!
//! # Invariants
//! - Parsing never resolves selectors; unknown factories/processors are
//!   reported when an `AppContext` boots from the config.

use crate::error::{DatabaseError, DbResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Role resolved by `AppContext::sql_database`.
pub const DEFAULT_SQL_ROLE: &str = "pdo";
/// Role resolved by `AppContext::storage_database`.
pub const DEFAULT_STORAGE_ROLE: &str = "storage";

/// Driver-specific parameters of one database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, Value>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(|value| !value.is_null())
    }

    /// Returns every key of `required` that is absent or `null`, in order.
    pub fn missing(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|key| !self.contains(key))
            .map(|key| key.to_string())
            .collect()
    }

    /// Fails with `InvalidConfig` listing all missing keys at once.
    pub fn require(&self, database: &str, required: &[&str]) -> DbResult<()> {
        let missing_keys = self.missing(required);
        if missing_keys.is_empty() {
            return Ok(());
        }
        Err(DatabaseError::InvalidConfig {
            database: database.to_string(),
            missing_keys,
        })
    }

    pub fn str(&self, database: &str, key: &str) -> DbResult<Option<&str>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.as_str())),
            Some(_) => Err(invalid(database, key, "expected a string")),
        }
    }

    pub fn u64(&self, database: &str, key: &str) -> DbResult<Option<u64>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| invalid(database, key, "expected a non-negative integer")),
        }
    }

    pub fn bool(&self, database: &str, key: &str) -> DbResult<Option<bool>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(value)) => Ok(Some(*value)),
            Some(_) => Err(invalid(database, key, "expected a boolean")),
        }
    }

    /// Like [`Parameters::str`], but absence is an `InvalidConfig` error.
    pub fn required_str(&self, database: &str, key: &str) -> DbResult<&str> {
        self.require(database, &[key])?;
        self.str(database, key)?
            .ok_or_else(|| invalid(database, key, "expected a string"))
    }
}

fn invalid(database: &str, key: &str, reason: &str) -> DatabaseError {
    DatabaseError::InvalidParameter {
        database: database.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// One entry of the `databases` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseEntry {
    /// Factory selector resolved through the catalog, e.g. `sql`.
    pub factory: String,
    #[serde(default)]
    pub config: Parameters,
}

/// Parsed database configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabasesConfig {
    /// Role -> database name.
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
    /// Database name -> factory selector and parameters.
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseEntry>,
    /// Processor selectors in dispatch order.
    #[serde(default)]
    pub processors: Vec<String>,
}

impl DatabasesConfig {
    pub fn from_json_str(source: &str) -> DbResult<Self> {
        serde_json::from_str(source).map_err(|err| DatabaseError::ConfigLoad {
            path: PathBuf::from("<inline>"),
            reason: err.to_string(),
        })
    }

    /// Reads and parses a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let load_error = |reason: String| DatabaseError::ConfigLoad {
            path: path.to_path_buf(),
            reason,
        };
        let source = std::fs::read_to_string(path).map_err(|err| load_error(err.to_string()))?;
        serde_json::from_str(&source).map_err(|err| load_error(err.to_string()))
    }

    /// Default application layout rooted at `app_dir`.
    ///
    /// - `pdo` -> `sqlite`, a SQLite file at `<app_dir>/database/app.sqlite3`.
    /// - `storage` -> `file`, JSON tables under `<app_dir>/storage/database/file`.
    /// - Processors: `sqlite`, then `storage`.
    pub fn app_defaults(app_dir: impl AsRef<Path>) -> Self {
        let app_dir = app_dir.as_ref();
        let sqlite_path = app_dir.join("database").join("app.sqlite3");
        let file_dir = app_dir.join("storage").join("database").join("file");

        let mut config = Self::default();
        config
            .defaults
            .insert(DEFAULT_SQL_ROLE.to_string(), "sqlite".to_string());
        config
            .defaults
            .insert(DEFAULT_STORAGE_ROLE.to_string(), "file".to_string());
        config.databases.insert(
            "sqlite".to_string(),
            DatabaseEntry {
                factory: "sql".to_string(),
                config: Parameters::new()
                    .with("driver", "sqlite")
                    .with("database", sqlite_path.to_string_lossy().into_owned()),
            },
        );
        config.databases.insert(
            "file".to_string(),
            DatabaseEntry {
                factory: "storage".to_string(),
                config: Parameters::new()
                    .with("storage", "json_file")
                    .with("dir", file_dir.to_string_lossy().into_owned()),
            },
        );
        config.processors = vec!["sqlite".to_string(), "storage".to_string()];
        config
    }

    pub fn to_json_pretty(&self) -> DbResult<String> {
        serde_json::to_string_pretty(self).map_err(|err| DatabaseError::ConfigLoad {
            path: PathBuf::from("<inline>"),
            reason: err.to_string(),
        })
    }
}
