//! Storage failures and queue overflow inside the pipeline

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use module_monitoring::queue::{OverflowPolicy, QueueConfig, QueueError};
use module_monitoring::storage::{
    FetchQuery, FlushConfig, HealthStatus, MemoryStorage, MonitoringStorage, StorageError,
    StorageResult,
};
use module_monitoring::{ComponentState, Monitoring, MonitoringError, MonitoringEvent, Severity};
use pretty_assertions::assert_eq;

use crate::helpers::{FlakyStorage, GatedStorage, create_test_monitoring, stored_events};

#[test]
fn test_storage_failures_delay_but_never_drop() {
    let storage = Arc::new(FlakyStorage::new(5));
    let monitoring = create_test_monitoring(storage.clone());

    for i in 0..250 {
        monitoring
            .register(Severity::INFO, &format!("event {i}"), "")
            .unwrap();
    }

    let events = stored_events(&monitoring);
    let titles: Vec<_> = events.iter().map(|e| e.title.clone()).collect();
    let expected: Vec<_> = (0..250).map(|i| format!("event {i}")).collect();
    assert_eq!(titles, expected);

    let stats = monitoring.sink_stats();
    assert_eq!(stats.stored, 250);
    assert_eq!(stats.failed_attempts, 5);
    assert_eq!(stats.dropped, 0);
    assert!(storage.attempts.load(Ordering::SeqCst) >= 8);
}

#[test]
fn test_bounded_retries_drop_loudly() {
    let storage = Arc::new(FlakyStorage::new(usize::MAX));
    let monitoring = Monitoring::builder("billing")
        .counter_interval(None)
        .flush(FlushConfig {
            retry_delay_ms: 1,
            max_retries: Some(1),
            ..FlushConfig::default()
        })
        .storage(storage)
        .build()
        .unwrap();

    monitoring.register(Severity::ERROR, "lost", "").unwrap();
    assert!(monitoring.wait_flushed(Duration::from_secs(5)));

    let stats = monitoring.sink_stats();
    assert_eq!(stats.stored, 0);
    assert_eq!(stats.dropped, 1);
}

/// Storage whose reads always fail
struct UnreadableStorage;

#[async_trait]
impl MonitoringStorage for UnreadableStorage {
    async fn store_batch(&self, events: &[MonitoringEvent]) -> StorageResult<Vec<i64>> {
        Ok((1..=events.len() as i64).collect())
    }

    async fn fetch(&self, _query: &FetchQuery) -> StorageResult<Vec<MonitoringEvent>> {
        Err(StorageError::QueryFailed(
            "no such table: monitoring_events".to_string(),
        ))
    }

    async fn cleanup_before(&self, _before: DateTime<Utc>) -> StorageResult<usize> {
        Ok(0)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(HealthStatus {
            healthy: false,
            message: "schema missing".to_string(),
            metadata: HashMap::new(),
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        Ok(String::new())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[test]
fn test_fetch_errors_propagate() {
    let monitoring = create_test_monitoring(Arc::new(UnreadableStorage));
    let result = monitoring.fetch_blocking(&FetchQuery::all());
    assert!(matches!(
        result,
        Err(MonitoringError::Storage(StorageError::QueryFailed(_)))
    ));
}

/// Register `count` events titled `{prefix} {i}`, returning how many were enqueued
fn burst(monitoring: &Monitoring, prefix: &str, count: usize) -> usize {
    (0..count)
        .map(|i| {
            monitoring
                .register(Severity::INFO, &format!("{prefix} {i}"), "")
                .unwrap()
        })
        .filter(|registration| registration.is_enqueued())
        .count()
}

#[test]
fn test_overflow_marks_root_and_rearms() {
    let storage = Arc::new(GatedStorage::closed());
    let monitoring = Monitoring::builder("billing")
        .counter_interval(None)
        .queue(QueueConfig::with_overflow(OverflowPolicy::Error, 10))
        .storage(storage.clone())
        .build()
        .unwrap();

    // the consumer holds at most one batch inside the closed gate, and that
    // batch still counts against capacity
    let enqueued = burst(&monitoring, "first", 15);
    let root_state = monitoring.root().state();
    let overflowing = monitoring.is_overflow_error();
    let excursions = monitoring.overflow_count();
    storage.open_gate();

    assert_eq!(enqueued, 10);
    assert_eq!(root_state, ComponentState::Overflow);
    assert!(overflowing);
    assert_eq!(excursions, 1);

    assert_eq!(stored_events(&monitoring).len(), 10);
    assert!(!monitoring.is_overflow_error());

    storage.close_gate();
    let enqueued = burst(&monitoring, "second", 15);
    let overflowing = monitoring.is_overflow_error();
    let excursions = monitoring.overflow_count();
    storage.open_gate();

    assert_eq!(enqueued, 10);
    assert!(overflowing);
    assert_eq!(excursions, 2);
    assert_eq!(stored_events(&monitoring).len(), 20);
    assert_eq!(monitoring.sink_stats().dropped, 0);
}

#[test]
fn test_register_after_shutdown_is_rejected() {
    let monitoring = create_test_monitoring(Arc::new(MemoryStorage::new()));
    let node = monitoring.create_monitoring("db").unwrap();
    monitoring.shutdown();

    thread::sleep(Duration::from_millis(10));
    assert!(matches!(
        node.register(Severity::FATAL, "late", ""),
        Err(MonitoringError::Queue(QueueError::NotStarted(_)))
    ));
}
