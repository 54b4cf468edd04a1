//! Contracts the read pipeline consumes from storage adapters.
//!
//! # Responsibility
//! - Define how a table-like source enumerates entities, answers "has data"
//!   and resolves per-variable column descriptors.
//! - Provide reference adapters (in-memory and SQLite table).
//!
//! # Invariants
//! - Sources and descriptors are shared by every read worker, so both are
//!   `Send + Sync` and must tolerate concurrent `read_value` calls.
//! - `resolve_column` is called once per variable per read, never per row.

use crate::db::DbError;
use crate::model::entity::Entity;
use crate::model::value::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub mod memory;
pub mod sqlite;

pub type SourceResult<T> = Result<T, SourceError>;

/// Errors raised by a source or one of its column descriptors.
#[derive(Debug)]
pub enum SourceError {
    VariableNotFound { source: String, variable: String },
    EntitiesNotEnumerable(String),
    ValueRead {
        variable: String,
        entity: Entity,
        message: String,
    },
    InvalidIdentifier(String),
    InvalidData(String),
    Db(DbError),
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VariableNotFound { source, variable } => {
                write!(f, "variable `{variable}` not found in source `{source}`")
            }
            Self::EntitiesNotEnumerable(source) => {
                write!(f, "source `{source}` cannot enumerate its entities")
            }
            Self::ValueRead {
                variable,
                entity,
                message,
            } => write!(f, "failed to read `{variable}` for {entity}: {message}"),
            Self::InvalidIdentifier(value) => write!(f, "invalid sql identifier `{value}`"),
            Self::InvalidData(message) => write!(f, "invalid source data: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SourceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for SourceError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for SourceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Per-variable handle able to produce a value for a given entity.
pub trait ColumnDescriptor: Send + Sync {
    fn variable(&self) -> &str;

    /// Reads this variable's value for `entity`.
    fn read_value(&self, entity: &Entity) -> SourceResult<Value>;

    /// Sentinel substituted when a read error is ignored.
    fn empty_value(&self) -> Value {
        Value::Null
    }
}

/// Table-like source of per-entity values.
pub trait ValueSource: Send + Sync {
    fn name(&self) -> &str;

    /// All variable names, in the source's declared order.
    fn variable_names(&self) -> Vec<String>;

    /// Whether [`ValueSource::list_entities`] is supported.
    fn can_list_entities(&self) -> bool {
        true
    }

    fn list_entities(&self) -> SourceResult<Vec<Entity>>;

    fn has_data(&self, entity: &Entity) -> SourceResult<bool>;

    fn resolve_column(&self, variable: &str) -> SourceResult<Arc<dyn ColumnDescriptor>>;
}
