//! Error types for queue lifecycle misuse

use thiserror::Error;

/// Result type alias for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors surfaced by queue backends
///
/// All variants are caller bugs; none of them is retried.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Item offered before `start_processing` or after `stop_processing`
    #[error("queue '{0}' is not started")]
    NotStarted(String),

    /// `start_processing` called while the consumer is running
    #[error("queue '{0}' is already started")]
    AlreadyStarted(String),

    /// Backend configuration rejected at construction
    #[error("invalid queue configuration: {0}")]
    InvalidConfig(String),

    /// The consumer thread could not be spawned
    #[error("failed to spawn consumer thread: {0}")]
    Spawn(#[from] std::io::Error),
}
