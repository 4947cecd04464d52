//! Helper functions for integration tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use module_monitoring::notify::{Channel, NotificationSink, NotifyResult};
use module_monitoring::storage::{
    FetchQuery, FlushConfig, HealthStatus, MemoryStorage, MonitoringStorage, StorageError,
    StorageResult,
};
use module_monitoring::{Monitoring, MonitoringEvent};
use parking_lot::{Condvar, Mutex};

pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Monitoring for module `billing` on `test-host` without automatic counter updates
pub fn create_test_monitoring(storage: Arc<dyn MonitoringStorage>) -> Monitoring {
    Monitoring::builder("billing")
        .machine("test-host")
        .counter_interval(None)
        .flush(FlushConfig {
            retry_delay_ms: 1,
            ..FlushConfig::default()
        })
        .storage(storage)
        .build()
        .unwrap()
}

/// Every stored event in id order, after waiting for the pipeline to drain
pub fn stored_events(monitoring: &Monitoring) -> Vec<MonitoringEvent> {
    assert!(
        monitoring.wait_flushed(FLUSH_TIMEOUT),
        "pipeline did not drain"
    );
    monitoring
        .fetch_blocking(&FetchQuery::all().page_size(usize::MAX >> 1))
        .unwrap()
}

/// Memory storage that fails the first `failures` writes
pub struct FlakyStorage {
    pub inner: MemoryStorage,
    failures_left: AtomicUsize,
    pub attempts: AtomicUsize,
}

impl FlakyStorage {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: MemoryStorage::new(),
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MonitoringStorage for FlakyStorage {
    async fn store_batch(&self, events: &[MonitoringEvent]) -> StorageResult<Vec<i64>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(StorageError::QueryFailed("database is locked".to_string()));
        }
        self.inner.store_batch(events).await
    }

    async fn fetch(&self, query: &FetchQuery) -> StorageResult<Vec<MonitoringEvent>> {
        self.inner.fetch(query).await
    }

    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        self.inner.cleanup_before(before).await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.inner.health_check().await
    }

    async fn get_stats(&self) -> StorageResult<String> {
        self.inner.get_stats().await
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Memory storage whose writes wait while the gate is closed
///
/// A closed gate holds the pipeline consumer inside its write, so events
/// pile up in the queue deterministically.
#[derive(Default)]
pub struct GatedStorage {
    pub inner: MemoryStorage,
    closed: Mutex<bool>,
    changed: Condvar,
}

impl GatedStorage {
    pub fn closed() -> Self {
        let storage = Self::default();
        storage.close_gate();
        storage
    }

    pub fn close_gate(&self) {
        *self.closed.lock() = true;
    }

    pub fn open_gate(&self) {
        *self.closed.lock() = false;
        self.changed.notify_all();
    }
}

#[async_trait]
impl MonitoringStorage for GatedStorage {
    async fn store_batch(&self, events: &[MonitoringEvent]) -> StorageResult<Vec<i64>> {
        {
            let mut closed = self.closed.lock();
            while *closed {
                self.changed.wait(&mut closed);
            }
        }
        self.inner.store_batch(events).await
    }

    async fn fetch(&self, query: &FetchQuery) -> StorageResult<Vec<MonitoringEvent>> {
        self.inner.fetch(query).await
    }

    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        self.inner.cleanup_before(before).await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.inner.health_check().await
    }

    async fn get_stats(&self) -> StorageResult<String> {
        self.inner.get_stats().await
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Notification sink that records what it receives
#[derive(Default)]
pub struct RecordingNotifier {
    pub received: Mutex<Vec<(Channel, String)>>,
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, channel: Channel, event: &MonitoringEvent) -> NotifyResult<()> {
        self.received.lock().push((channel, event.title.clone()));
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
