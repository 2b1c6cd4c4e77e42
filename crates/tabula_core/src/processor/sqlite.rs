//! SQLite processor: renders `Table` declarations as DDL and seed inserts.
//!
//! # Invariants
//! - Create and seed of one table commit together or not at all.
//! - Identifiers are validated by `Table::validate` and always quoted.

use super::{InstallOutcome, Processor};
use crate::database::sql::{json_to_sql, quote_identifier, table_exists};
use crate::database::{BackendKind, Database};
use crate::error::DbResult;
use crate::schema::{Column, ColumnType, SeedPolicy, Table};
use crate::storage::Row;
use log::info;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteProcessor;

impl Processor for SqliteProcessor {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn supports(&self, database: &Database) -> bool {
        database.kind() == BackendKind::Sql
    }

    fn install(&self, table: &Table, database: &Database) -> DbResult<InstallOutcome> {
        table.validate()?;
        let sql = database.require_sql()?;

        let outcome = sql.with_connection(|conn| {
            let tx = conn.transaction()?;
            let created = !table_exists(&tx, table.name())?;
            if created {
                tx.execute_batch(&create_table_sql(table))?;
            }
            let seeded = seed_table(&tx, table)?;
            tx.commit()?;
            Ok(InstallOutcome {
                table: table.name().to_string(),
                created,
                seeded,
            })
        })?;

        info!(
            "event=table_install module=processor processor=sqlite status=ok database={} table={} created={} seeded={}",
            database.name(),
            outcome.table,
            outcome.created,
            outcome.seeded
        );
        Ok(outcome)
    }

    fn uninstall(&self, table: &Table, database: &Database) -> DbResult<()> {
        table.validate()?;
        database.require_sql()?.execute_batch(&format!(
            "DROP TABLE IF EXISTS {};",
            quote_identifier(table.name())
        ))?;
        info!(
            "event=table_uninstall module=processor processor=sqlite status=ok database={} table={}",
            database.name(),
            table.name()
        );
        Ok(())
    }
}

fn seed_table(conn: &Connection, table: &Table) -> DbResult<usize> {
    if table.policy() == SeedPolicy::WhenEmpty {
        let existing: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {};", quote_identifier(table.name())),
            [],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Ok(0);
        }
    }

    let mut seeded = 0;
    for row in table.seed_rows() {
        insert_row(conn, table.name(), row)?;
        seeded += 1;
    }
    Ok(seeded)
}

fn insert_row(conn: &Connection, table: &str, row: &Row) -> DbResult<()> {
    if row.is_empty() {
        conn.execute(
            &format!("INSERT INTO {} DEFAULT VALUES;", quote_identifier(table)),
            [],
        )?;
        return Ok(());
    }

    let columns = row
        .keys()
        .map(|key| quote_identifier(key))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=row.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute(
        &format!(
            "INSERT INTO {} ({columns}) VALUES ({placeholders});",
            quote_identifier(table)
        ),
        params_from_iter(row.values().map(json_to_sql)),
    )?;
    Ok(())
}

fn create_table_sql(table: &Table) -> String {
    let columns = table
        .columns()
        .iter()
        .map(column_definition)
        .collect::<Vec<_>>()
        .join(",\n    ");
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {columns}\n);",
        quote_identifier(table.name())
    )
}

fn column_definition(column: &Column) -> String {
    let name = quote_identifier(&column.name);
    let sql_type = match column.kind {
        ColumnType::Primary => return format!("{name} INTEGER PRIMARY KEY AUTOINCREMENT"),
        ColumnType::Integer | ColumnType::Boolean => "INTEGER".to_string(),
        ColumnType::Float => "REAL".to_string(),
        ColumnType::String { length } => format!("VARCHAR({length})"),
        ColumnType::Text | ColumnType::Json => "TEXT".to_string(),
    };

    let mut definition = format!("{name} {sql_type}");
    if !column.nullable {
        definition.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        definition.push_str(" DEFAULT ");
        definition.push_str(&default_literal(default));
    }
    definition
}

fn default_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(flag) => String::from(if *flag { "1" } else { "0" }),
        Value::Number(number) => number.to_string(),
        Value::String(text) => quote_literal(text),
        other => quote_literal(&other.to_string()),
    }
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}
