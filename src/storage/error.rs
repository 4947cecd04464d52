//! Errors raised by monitoring storage backends

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// Failure of a storage backend
///
/// Writes failing with any variant are retried by the sink; fetch errors are
/// returned to the caller.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Opening the database or pool failed
    #[error("failed to connect to storage backend: {0}")]
    ConnectionFailed(String),

    /// A statement or transaction failed
    #[error("storage query failed: {0}")]
    QueryFailed(String),

    #[error("database migration failed: {0}")]
    MigrationFailed(String),

    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),

    /// A stored row could not be mapped back to an event
    #[error("event serialization error: {0}")]
    SerializationError(String),

    #[error("storage backend error: {0}")]
    BackendError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The backend is not healthy or already closed
    #[error("storage backend unhealthy: {0}")]
    UnhealthyBackend(String),
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::IoError(io_err),
            sqlx::Error::RowNotFound => StorageError::QueryFailed("no matching event".to_string()),
            sqlx::Error::PoolClosed => StorageError::UnhealthyBackend("pool closed".to_string()),
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::MigrationFailed(err.to_string())
    }
}
