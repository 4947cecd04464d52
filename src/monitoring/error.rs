//! Error types for the monitoring tree and its counters

use thiserror::Error;

use crate::queue::QueueError;
use crate::storage::StorageError;

/// Result type alias for monitoring operations
pub type MonitoringResult<T> = Result<T, MonitoringError>;

/// Misuse of a performance counter
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CounterError {
    /// Raw mutator called on a counter backed by a function or the OS
    #[error("counter '{0}' is read-only")]
    ReadonlyViolation(String),

    /// Operation that does not apply to this counter type
    #[error("counter '{counter}' does not support {operation}")]
    UnsupportedOperation {
        counter: String,
        operation: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum MonitoringError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Storage read failed; writes are retried by the sink instead
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Counter(#[from] CounterError),

    #[error("component '{0}' is already attached")]
    ComponentExists(String),

    #[error("counter '{0}' is already attached")]
    CounterExists(String),

    #[error("the root of module '{0}' cannot be removed from monitoring")]
    RootRemoval(String),

    #[error("failed to build monitoring runtime: {0}")]
    Runtime(#[from] std::io::Error),
}
