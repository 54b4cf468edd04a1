//! Concurrent bulk read pipeline.
//!
//! # Responsibility
//! - Read every requested variable for a set of entities with a fixed-size
//!   worker pool.
//! - Deliver rows to one consumer callback on the calling thread, with
//!   backpressure, cooperative cancellation and transparent failures.
//!
//! # Invariants
//! - `on_begin` precedes every `on_values`; every `on_values` precedes
//!   `on_complete`; `on_complete` fires exactly once per started read, even
//!   when a worker failed.
//! - Each entity is claimed by exactly one worker.
//! - The result channel never buffers more than `buffer_capacity` rows.
//! - Row order follows channel arrival order, not entity enumeration order.

use crate::model::entity::Entity;
use crate::model::value::Value;
use crate::source::SourceError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use uuid::Uuid;

mod channel;
mod coordinator;
mod options;
mod queue;
mod worker;

pub use coordinator::{read_values, ReadCoordinator};
pub use options::{default_concurrency, OverflowPolicy, ReadOptions, ReadSettings};

pub type ReadResult<T> = Result<T, ReadError>;

/// Failures surfaced by a bulk read.
#[derive(Debug)]
pub enum ReadError {
    InvalidOptions(String),
    Source(SourceError),
    Value {
        entity: Entity,
        variable: String,
        cause: SourceError,
    },
    Callback(String),
    ResultChannelFull { capacity: usize },
    WorkerPanicked { worker: usize, message: String },
    Spawn(std::io::Error),
}

impl Display for ReadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidOptions(message) => write!(f, "invalid read options: {message}"),
            Self::Source(err) => write!(f, "{err}"),
            Self::Value {
                entity,
                variable,
                cause,
            } => write!(f, "failed to read `{variable}` for {entity}: {cause}"),
            Self::Callback(message) => write!(f, "read callback failed: {message}"),
            Self::ResultChannelFull { capacity } => {
                write!(f, "result channel full (capacity {capacity})")
            }
            Self::WorkerPanicked { worker, message } => {
                write!(f, "read worker {worker} panicked: {message}")
            }
            Self::Spawn(err) => write!(f, "failed to spawn read worker: {err}"),
        }
    }
}

impl Error for ReadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Source(err) => Some(err),
            Self::Value { cause, .. } => Some(cause),
            Self::Spawn(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SourceError> for ReadError {
    fn from(value: SourceError) -> Self {
        Self::Source(value)
    }
}

/// Consumer side of a bulk read.
///
/// Every method runs on the thread that called
/// [`ReadCoordinator::read`], one at a time, so implementations need not be
/// thread-safe. An `Err` from any hook aborts the read: workers are stopped
/// and the error is returned unchanged.
pub trait ReadCallback {
    /// Called once with the resolved entities and variables, before any
    /// worker starts.
    fn on_begin(&mut self, _entities: &[Entity], _variables: &[String]) -> ReadResult<()> {
        Ok(())
    }

    /// One row; `values[i]` belongs to `variables[i]`.
    fn on_values(
        &mut self,
        entity: &Entity,
        variables: &[String],
        values: Vec<Value>,
    ) -> ReadResult<()>;

    /// Read loop finished. Fires before any worker failure is returned.
    fn on_complete(&mut self) -> ReadResult<()> {
        Ok(())
    }

    /// Polled between rows; once `true`, workers stop claiming entities.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// One entity's full row, positionally aligned with the read's variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub entity: Entity,
    pub values: Vec<Value>,
}

/// Outcome of a successful read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadSummary {
    pub read_id: Uuid,
    pub entities: usize,
    pub delivered: usize,
    pub skipped_without_data: usize,
    pub substituted_values: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}
