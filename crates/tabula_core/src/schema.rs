//! Declarative, backend-independent table descriptions.
//!
//! # Responsibility
//! - Let migration authors describe a table, its primary key, columns and
//!   seed rows without choosing a backend.
//! - Validate names before any processor turns them into SQL or file names.
//!
//! # Invariants
//! - Table and column names match `[A-Za-z_][A-Za-z0-9_]*` (max 64 chars).
//! - Column names are unique; the primary key is one of the columns.

use crate::error::{DatabaseError, DbResult};
use crate::storage::Row;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("identifier pattern is valid")
});

const DEFAULT_STRING_LENGTH: u32 = 255;

/// Returns whether `value` can be used as a table or column name.
pub fn is_valid_identifier(value: &str) -> bool {
    IDENTIFIER.is_match(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Auto-incrementing integer key.
    Primary,
    Integer,
    Float,
    Boolean,
    String { length: u32 },
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnType,
    pub nullable: bool,
    pub default: Option<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            default: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// When seed rows are written during install.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SeedPolicy {
    /// Seed only a table that holds no rows, so reinstalling is a no-op.
    #[default]
    WhenEmpty,
    /// Append the seed rows on every install.
    Always,
}

/// Declarative table: name, primary key, ordered columns and seed rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    primary_key: Option<String>,
    columns: Vec<Column>,
    items: Vec<Value>,
    seed_policy: SeedPolicy,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: None,
            columns: Vec::new(),
            items: Vec::new(),
            seed_policy: SeedPolicy::default(),
        }
    }

    /// Declares the auto-incrementing primary key column.
    pub fn primary(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.primary_key = Some(name.clone());
        self.columns.push(Column::new(name, ColumnType::Primary));
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn string(self, name: impl Into<String>) -> Self {
        self.column(Column::new(
            name,
            ColumnType::String {
                length: DEFAULT_STRING_LENGTH,
            },
        ))
    }

    pub fn text(self, name: impl Into<String>) -> Self {
        self.column(Column::new(name, ColumnType::Text))
    }

    pub fn integer(self, name: impl Into<String>) -> Self {
        self.column(Column::new(name, ColumnType::Integer))
    }

    pub fn float(self, name: impl Into<String>) -> Self {
        self.column(Column::new(name, ColumnType::Float))
    }

    pub fn boolean(self, name: impl Into<String>) -> Self {
        self.column(Column::new(name, ColumnType::Boolean))
    }

    pub fn json(self, name: impl Into<String>) -> Self {
        self.column(Column::new(name, ColumnType::Json))
    }

    /// Appends seed rows. Non-object values are rejected by `validate`.
    pub fn items(mut self, items: impl IntoIterator<Item = Value>) -> Self {
        self.items.extend(items);
        self
    }

    pub fn seed_policy(mut self, policy: SeedPolicy) -> Self {
        self.seed_policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    /// Seed rows in declaration order; non-object items are skipped.
    pub fn seed_rows(&self) -> impl Iterator<Item = &Row> + '_ {
        self.items.iter().filter_map(Value::as_object)
    }

    pub fn policy(&self) -> SeedPolicy {
        self.seed_policy
    }

    /// Checks naming and structural invariants.
    pub fn validate(&self) -> DbResult<()> {
        if !is_valid_identifier(&self.name) {
            return Err(self.invalid(format!("invalid table name `{}`", self.name)));
        }

        let Some(primary_key) = self.primary_key.as_deref() else {
            return Err(self.invalid("table has no primary key".to_string()));
        };

        let mut seen = BTreeSet::new();
        for column in &self.columns {
            if !is_valid_identifier(&column.name) {
                return Err(self.invalid(format!("invalid column name `{}`", column.name)));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(self.invalid(format!("duplicate column `{}`", column.name)));
            }
            if column.kind == ColumnType::Primary && column.name != primary_key {
                return Err(self.invalid(format!(
                    "column `{}` is a second primary key",
                    column.name
                )));
            }
        }

        for (index, item) in self.items.iter().enumerate() {
            let Some(row) = item.as_object() else {
                return Err(self.invalid(format!("seed item #{index} is not an object")));
            };
            if let Some(key) = row.keys().find(|key| !is_valid_identifier(key)) {
                return Err(self.invalid(format!(
                    "seed item #{index} has invalid column name `{key}`"
                )));
            }
        }

        Ok(())
    }

    fn invalid(&self, reason: String) -> DatabaseError {
        DatabaseError::InvalidSchema {
            table: self.name.clone(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{is_valid_identifier, Column, ColumnType, SeedPolicy, Table};
    use crate::error::DatabaseError;
    use serde_json::json;

    fn users() -> Table {
        Table::new("users")
            .primary("id")
            .string("name")
            .items([json!({"name": "John"}), json!({"name": "Mia"})])
    }

    #[test]
    fn builder_keeps_declaration_order() {
        let table = users();
        assert_eq!(table.primary_key(), Some("id"));
        assert_eq!(table.column_names(), vec!["id", "name"]);
        assert_eq!(table.seed_rows().count(), 2);
        assert_eq!(table.policy(), SeedPolicy::WhenEmpty);
        table.validate().unwrap();
    }

    #[test]
    fn identifiers_follow_sql_rules() {
        assert!(is_valid_identifier("users"));
        assert!(is_valid_identifier("_tmp_1"));
        assert!(!is_valid_identifier("1users"));
        assert!(!is_valid_identifier("users; DROP TABLE x"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier(&"a".repeat(65)));
    }

    #[test]
    fn validate_rejects_structural_mistakes() {
        let no_key = Table::new("users").string("name");
        assert!(matches!(
            no_key.validate(),
            Err(DatabaseError::InvalidSchema { ref reason, .. }) if reason.contains("primary key")
        ));

        let duplicate = Table::new("users").primary("id").string("id");
        assert!(duplicate.validate().is_err());

        let bad_item = Table::new("users").primary("id").items([json!("John")]);
        assert!(matches!(
            bad_item.validate(),
            Err(DatabaseError::InvalidSchema { ref reason, .. }) if reason.contains("#0")
        ));

        let bad_column = Table::new("users")
            .primary("id")
            .column(Column::new("bad name", ColumnType::Text).nullable());
        assert!(bad_column.validate().is_err());
    }
}
