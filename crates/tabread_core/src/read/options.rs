//! Read configuration: a builder for call sites plus a serde shape for host
//! config files.

use super::{ReadError, ReadResult};
use crate::cancel::CancelFlag;
use crate::model::entity::Entity;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BUFFER_CAPACITY: usize = 200;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub type ThreadNameFn = Arc<dyn Fn(usize) -> String + Send + Sync>;

/// What a worker does when the result channel is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for the consumer to make room.
    #[default]
    Block,
    /// Fail the worker with `ReadError::ResultChannelFull`.
    FailFast,
}

/// Twice the available hardware parallelism, at least 2.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_mul(2))
        .unwrap_or(2)
}

/// Options for one bulk read.
#[derive(Clone)]
pub struct ReadOptions {
    pub(crate) concurrency: usize,
    pub(crate) buffer_capacity: usize,
    pub(crate) variables: Option<Vec<String>>,
    pub(crate) entities: Option<Vec<Entity>>,
    pub(crate) ignore_read_errors: bool,
    pub(crate) overflow_policy: OverflowPolicy,
    pub(crate) poll_interval: Duration,
    pub(crate) cancel_flag: Option<CancelFlag>,
    pub(crate) thread_name: ThreadNameFn,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            variables: None,
            entities: None,
            ignore_read_errors: false,
            overflow_policy: OverflowPolicy::Block,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel_flag: None,
            thread_name: Arc::new(|index| format!("tabread-read-{index}")),
        }
    }
}

impl Debug for ReadOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOptions")
            .field("concurrency", &self.concurrency)
            .field("buffer_capacity", &self.buffer_capacity)
            .field("variables", &self.variables)
            .field("entities", &self.entities.as_ref().map(Vec::len))
            .field("ignore_read_errors", &self.ignore_read_errors)
            .field("overflow_policy", &self.overflow_policy)
            .field("poll_interval", &self.poll_interval)
            .field("cancel_flag", &self.cancel_flag)
            .finish_non_exhaustive()
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds options from plain settings; unset fields keep their defaults.
    pub fn from_settings(settings: &ReadSettings) -> Self {
        let defaults = Self::default();
        Self {
            concurrency: settings.concurrency.unwrap_or(defaults.concurrency),
            buffer_capacity: settings.buffer_capacity.unwrap_or(defaults.buffer_capacity),
            ignore_read_errors: settings.ignore_read_errors,
            overflow_policy: settings.overflow_policy,
            poll_interval: settings
                .poll_interval_ms
                .map_or(defaults.poll_interval, Duration::from_millis),
            ..defaults
        }
    }

    /// Worker thread count.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Maximum rows buffered between workers and the consumer.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Restricts the read to these variables, in this order.
    pub fn variables<I, S>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables = Some(variables.into_iter().map(Into::into).collect());
        self
    }

    /// Restricts the read to these entities. Duplicates are read once.
    pub fn entities(mut self, entities: impl IntoIterator<Item = Entity>) -> Self {
        self.entities = Some(entities.into_iter().collect());
        self
    }

    /// Substitute a column's empty value instead of failing the read.
    pub fn ignore_read_errors(mut self, ignore: bool) -> Self {
        self.ignore_read_errors = ignore;
        self
    }

    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// How long the consumer waits for a row before re-checking worker
    /// completion and cancellation.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// External cancellation, observed by workers between entities.
    pub fn cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    /// Names worker threads; receives the worker index.
    pub fn thread_name(mut self, name: impl Fn(usize) -> String + Send + Sync + 'static) -> Self {
        self.thread_name = Arc::new(name);
        self
    }

    pub fn worker_count(&self) -> usize {
        self.concurrency
    }

    pub fn result_capacity(&self) -> usize {
        self.buffer_capacity
    }

    pub(crate) fn validate(&self) -> ReadResult<()> {
        if self.concurrency == 0 {
            return Err(ReadError::InvalidOptions(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(ReadError::InvalidOptions(
                "buffer capacity must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ReadError::InvalidOptions(
                "poll interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serializable subset of [`ReadOptions`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReadSettings {
    pub concurrency: Option<usize>,
    pub buffer_capacity: Option<usize>,
    pub ignore_read_errors: bool,
    pub overflow_policy: OverflowPolicy,
    pub poll_interval_ms: Option<u64>,
}
