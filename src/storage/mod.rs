//! Storage backends for monitoring events
//!
//! ## Design
//!
//! - **Trait-based**: `MonitoringStorage` allows swapping implementations
//! - **Async**: All operations are async; the pipeline drives them from its
//!   consumer thread through a Tokio runtime handle
//! - **Batch-oriented**: one transaction per chunk of events
//!
//! ## Backends
//!
//! - **SQLite** (default feature `storage-sqlite`): embedded database
//! - **In-Memory**: no persistence, for tests and notification-only modules
//!
//! ## Usage
//!
//! ```no_run
//! use module_monitoring::storage::{FetchQuery, MonitoringStorage, SqliteStorage};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = SqliteStorage::new("./monitoring.db").await?;
//!     let latest = storage.fetch(&FetchQuery::all().backward().page_size(10)).await?;
//!     println!("{} events", latest.len());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod sink;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{DEFAULT_PAGE_SIZE, FetchQuery, HealthStatus, MonitoringStorage};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStorage;
pub use sink::{FlushConfig, SinkStats, StorageSink};
#[cfg(feature = "storage-sqlite")]
pub use sqlite::SqliteStorage;
