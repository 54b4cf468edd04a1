//! SQLite table exposed as a value source.
//!
//! # Responsibility
//! - Map one table to a source: one column carries the entity identifier,
//!   every other column is a variable.
//!
//! # Invariants
//! - Table and column names are validated before they reach any SQL text.
//! - The connection is shared by all workers behind one mutex; statements
//!   are cached per connection.
//! - Blob cells are rejected; every other storage class maps to a `Value`.

use super::{ColumnDescriptor, SourceError, SourceResult, ValueSource};
use crate::db::open_db_read_only;
use crate::model::entity::Entity;
use crate::model::value::Value;
use log::info;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

static SQL_IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,127}$").expect("valid sql identifier regex")
});

struct SqliteTable {
    table: String,
    id_column: String,
    entity_type: String,
    variables: Vec<String>,
    conn: Mutex<Connection>,
}

/// Read access to one SQLite table.
#[derive(Clone)]
pub struct SqliteTableSource {
    inner: Arc<SqliteTable>,
}

impl SqliteTableSource {
    /// Opens `path` read-only and binds `table` as a source.
    pub fn open(
        path: impl AsRef<Path>,
        table: &str,
        id_column: &str,
        entity_type: &str,
    ) -> SourceResult<Self> {
        let conn = open_db_read_only(path)?;
        Self::from_connection(conn, table, id_column, entity_type)
    }

    /// Binds `table` on an already open connection.
    ///
    /// # Errors
    /// - `InvalidIdentifier` when `table` or `id_column` is not a plain SQL
    ///   identifier.
    /// - `InvalidData` when the table does not exist or lacks `id_column`.
    pub fn from_connection(
        conn: Connection,
        table: &str,
        id_column: &str,
        entity_type: &str,
    ) -> SourceResult<Self> {
        let table = checked_identifier(table)?;
        let id_column = checked_identifier(id_column)?;
        if entity_type.trim().is_empty() {
            return Err(SourceError::InvalidData(
                "entity type must not be blank".to_string(),
            ));
        }

        let columns = table_columns(&conn, &table)?;
        if columns.is_empty() {
            return Err(SourceError::InvalidData(format!(
                "table `{table}` does not exist"
            )));
        }
        if !columns.iter().any(|column| column == &id_column) {
            return Err(SourceError::InvalidData(format!(
                "table `{table}` has no id column `{id_column}`"
            )));
        }
        let variables: Vec<String> = columns
            .into_iter()
            .filter(|column| column != &id_column)
            .map(|column| checked_identifier(&column))
            .collect::<SourceResult<_>>()?;

        info!(
            "event=source_bind module=source.sqlite status=ok table={} variables={}",
            table,
            variables.len()
        );

        Ok(Self {
            inner: Arc::new(SqliteTable {
                table,
                id_column,
                entity_type: entity_type.to_string(),
                variables,
                conn: Mutex::new(conn),
            }),
        })
    }

    pub fn entity_type(&self) -> &str {
        &self.inner.entity_type
    }
}

impl ValueSource for SqliteTableSource {
    fn name(&self) -> &str {
        &self.inner.table
    }

    fn variable_names(&self) -> Vec<String> {
        self.inner.variables.clone()
    }

    fn list_entities(&self) -> SourceResult<Vec<Entity>> {
        let table = &self.inner;
        let conn = table.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT \"{id}\" FROM \"{table}\" ORDER BY \"{id}\";",
            id = table.id_column,
            table = table.table
        ))?;
        let mut rows = stmt.query([])?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            let identifier = identifier_text(row.get_ref(0)?, &table.table)?;
            let entity = Entity::new(table.entity_type.as_str(), identifier)
                .map_err(|err| SourceError::InvalidData(err.to_string()))?;
            entities.push(entity);
        }
        Ok(entities)
    }

    fn has_data(&self, entity: &Entity) -> SourceResult<bool> {
        let table = &self.inner;
        if entity.entity_type() != table.entity_type {
            return Ok(false);
        }
        let conn = table.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT EXISTS(SELECT 1 FROM \"{table}\" WHERE {matches});",
            table = table.table,
            matches = id_match(&table.id_column)
        ))?;
        let (identifier, as_integer) = id_params(entity);
        let exists: i64 = stmt.query_row(params![identifier, as_integer], |row| row.get(0))?;
        Ok(exists == 1)
    }

    fn resolve_column(&self, variable: &str) -> SourceResult<Arc<dyn ColumnDescriptor>> {
        let Some(name) = self
            .inner
            .variables
            .iter()
            .find(|candidate| candidate.as_str() == variable)
        else {
            return Err(SourceError::VariableNotFound {
                source: self.inner.table.clone(),
                variable: variable.to_string(),
            });
        };
        let select_sql = format!(
            "SELECT \"{name}\" FROM \"{table}\" WHERE {matches} LIMIT 1;",
            table = self.inner.table,
            matches = id_match(&self.inner.id_column)
        );
        Ok(Arc::new(SqliteColumn {
            table: Arc::clone(&self.inner),
            variable: name.clone(),
            select_sql,
        }))
    }
}

struct SqliteColumn {
    table: Arc<SqliteTable>,
    variable: String,
    select_sql: String,
}

impl ColumnDescriptor for SqliteColumn {
    fn variable(&self) -> &str {
        &self.variable
    }

    fn read_value(&self, entity: &Entity) -> SourceResult<Value> {
        if entity.entity_type() != self.table.entity_type {
            return Ok(Value::Null);
        }
        let conn = self.table.conn.lock();
        let mut stmt = conn.prepare_cached(&self.select_sql)?;
        let (identifier, as_integer) = id_params(entity);
        let value = stmt
            .query_row(params![identifier, as_integer], |row| {
                Ok(cell_to_value(row.get_ref(0)?))
            })
            .optional()?;

        match value {
            None => Ok(Value::Null),
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(SourceError::ValueRead {
                variable: self.variable.clone(),
                entity: entity.clone(),
                message,
            }),
        }
    }
}

fn checked_identifier(value: &str) -> SourceResult<String> {
    if SQL_IDENTIFIER_RE.is_match(value) {
        Ok(value.to_string())
    } else {
        Err(SourceError::InvalidIdentifier(value.to_string()))
    }
}

fn table_columns(conn: &Connection, table: &str) -> SourceResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\");"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>("name"))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Matches the id column against an identifier bound both as text and, when
/// it is a canonical integer, as an integer. Columns without a declared type
/// apply no affinity, so `'1' = 1` is false there.
fn id_match(id_column: &str) -> String {
    format!("(\"{id_column}\" = ?1 OR \"{id_column}\" = ?2)")
}

fn id_params(entity: &Entity) -> (&str, Option<i64>) {
    let identifier = entity.identifier();
    let as_integer = identifier
        .parse::<i64>()
        .ok()
        .filter(|value| value.to_string() == identifier);
    (identifier, as_integer)
}

fn identifier_text(cell: ValueRef<'_>, table: &str) -> SourceResult<String> {
    match cell {
        ValueRef::Integer(value) => Ok(value.to_string()),
        ValueRef::Text(bytes) => String::from_utf8(bytes.to_vec()).map_err(|_| {
            SourceError::InvalidData(format!("non utf-8 entity identifier in `{table}`"))
        }),
        ValueRef::Null => Err(SourceError::InvalidData(format!(
            "null entity identifier in `{table}`"
        ))),
        ValueRef::Real(_) | ValueRef::Blob(_) => Err(SourceError::InvalidData(format!(
            "unsupported entity identifier type in `{table}`"
        ))),
    }
}

fn cell_to_value(cell: ValueRef<'_>) -> Result<Value, String> {
    match cell {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(value) => Ok(Value::Integer(value)),
        ValueRef::Real(value) => Ok(Value::Decimal(value)),
        ValueRef::Text(bytes) => String::from_utf8(bytes.to_vec())
            .map(Value::Text)
            .map_err(|_| "text cell is not valid utf-8".to_string()),
        ValueRef::Blob(_) => Err("blob cells are not supported".to_string()),
    }
}
