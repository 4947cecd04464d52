//! Chunked, retrying writer between the event queue and a storage backend
//!
//! [`StorageSink::flush_to_storage`] splits a batch into chunks of at most
//! `chunk_size` events and stores each chunk in one transaction. A failed
//! chunk is retried as a whole until it succeeds; only the first failure of
//! a batch is logged at error level, later ones at trace level.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, instrument, trace};

use super::backend::{FetchQuery, MonitoringStorage};
use super::error::StorageResult;
use crate::monitoring::MonitoringEvent;

/// Default number of events per transaction
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Flush behaviour of a [`StorageSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Events per transaction
    pub chunk_size: usize,

    /// Pause between retries of a failed chunk
    pub retry_delay_ms: u64,

    /// Give up on a chunk after this many failed attempts; `None` retries
    /// until the chunk is stored
    pub max_retries: Option<u32>,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry_delay_ms: 100,
            max_retries: None,
        }
    }
}

/// Counters kept by a [`StorageSink`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub stored: u64,
    pub failed_attempts: u64,
    pub dropped: u64,
}

pub struct StorageSink {
    storage: Arc<dyn MonitoringStorage>,
    config: FlushConfig,
    stored: AtomicU64,
    failed_attempts: AtomicU64,
    dropped: AtomicU64,
}

impl StorageSink {
    pub fn new(storage: Arc<dyn MonitoringStorage>, config: FlushConfig) -> Self {
        Self {
            storage,
            config: FlushConfig {
                chunk_size: config.chunk_size.max(1),
                ..config
            },
            stored: AtomicU64::new(0),
            failed_attempts: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn storage(&self) -> &Arc<dyn MonitoringStorage> {
        &self.storage
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            stored: self.stored.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Persist a batch chunk by chunk, returning how many events were stored
    #[instrument(skip(self, batch), fields(count = batch.len()))]
    pub async fn flush_to_storage(&self, batch: &[MonitoringEvent]) -> usize {
        let mut logged = false;
        let mut stored = 0;

        for chunk in batch.chunks(self.config.chunk_size) {
            let mut attempts = 0u32;
            loop {
                match self.storage.store_batch(chunk).await {
                    Ok(ids) => {
                        trace!("stored chunk of {} events", ids.len());
                        stored += chunk.len();
                        break;
                    }
                    Err(e) => {
                        attempts += 1;
                        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
                        if !logged {
                            error!(
                                "failed to store {} monitoring events, retrying: {}",
                                chunk.len(),
                                e
                            );
                            logged = true;
                        } else {
                            trace!("retry {} of chunk failed: {}", attempts, e);
                        }

                        if let Some(max) = self.config.max_retries
                            && attempts > max
                        {
                            error!(
                                "giving up on {} monitoring events after {} attempts",
                                chunk.len(),
                                attempts
                            );
                            self.dropped.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                            break;
                        }

                        tokio::task::yield_now().await;
                        tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                    }
                }
            }
        }

        self.stored.fetch_add(stored as u64, Ordering::Relaxed);
        if logged && stored == batch.len() {
            debug!("batch of {} events stored after retries", stored);
        }
        stored
    }

    /// Fetch a page of events; read errors are logged and returned
    pub async fn fetch(&self, query: &FetchQuery) -> StorageResult<Vec<MonitoringEvent>> {
        self.storage.fetch(query).await.inspect_err(|e| {
            error!("failed to fetch monitoring events: {}", e);
        })
    }
}
