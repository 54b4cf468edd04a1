//! Concurrent bulk reads over table-like value sources, plus a named lock
//! manager for coordinating access to shared resources.

pub mod cancel;
pub mod db;
pub mod lock;
pub mod logging;
pub mod model;
pub mod read;
pub mod source;

pub use cancel::CancelFlag;
pub use lock::{global_lock_manager, LockError, LockResult, LockSetGuard, NamedLockManager};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::entity::{Entity, EntityValidationError};
pub use model::value::Value;
pub use read::{
    default_concurrency, read_values, OverflowPolicy, ReadCallback, ReadCoordinator, ReadError,
    ReadOptions, ReadResult, ReadSettings, ReadSummary, ResultRecord,
};
pub use source::memory::MemorySource;
pub use source::sqlite::SqliteTableSource;
pub use source::{ColumnDescriptor, SourceError, SourceResult, ValueSource};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
