//! End-to-end behaviour of the state tree and the event pipeline

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use module_monitoring::monitoring::{CounterType, CounterValue, StringSource, SystemCounter};
use module_monitoring::notify::Channel;
use module_monitoring::storage::{FlushConfig, MemoryStorage, MonitoringStorage};
use module_monitoring::{ComponentState, Monitoring, MonitoringError, Registration, Severity};
use pretty_assertions::assert_eq;

use crate::helpers::{FlakyStorage, RecordingNotifier, create_test_monitoring, stored_events};

fn memory_monitoring() -> Monitoring {
    create_test_monitoring(Arc::new(MemoryStorage::new()))
}

#[test]
fn test_events_carry_component_paths() {
    let monitoring = memory_monitoring();
    let db = monitoring.create_monitoring("db").unwrap();
    let pool = db.attach_component("pool", None).unwrap();

    monitoring.register(Severity::INFO, "started", "").unwrap();
    pool.register(Severity::WARNING, "exhausted", "32 of 32 in use")
        .unwrap();

    let events = stored_events(&monitoring);
    let paths: Vec<_> = events.iter().map(|e| e.component.as_str()).collect();
    assert_eq!(paths, vec!["billing", "billing.db.pool"]);
    assert!(events.iter().all(|e| e.module == "billing" && e.machine == "test-host"));
    assert!(events.windows(2).all(|w| w[0].id < w[1].id));
    assert_eq!(events[1].description, "32 of 32 in use");
}

#[test]
fn test_threshold_per_node() {
    let monitoring = memory_monitoring();
    let noisy = monitoring
        .root()
        .attach_component("noisy", Some(Severity::ERROR))
        .unwrap();

    for severity in [
        Severity::DEBUG,
        Severity::INFO,
        Severity::WARNING,
        Severity::ERROR,
        Severity::FATAL,
    ] {
        let expected = if severity.reaches(Severity::ERROR) {
            Registration::Enqueued
        } else {
            Registration::BelowThreshold
        };
        assert_eq!(noisy.register(severity, "disk check", "").unwrap(), expected);
    }

    let events = stored_events(&monitoring);
    let severities: Vec<_> = events.iter().map(|e| e.severity).collect();
    assert_eq!(severities, vec![Severity::ERROR, Severity::FATAL]);
}

#[test]
fn test_repeat_suppression_follows_window() {
    let monitoring = memory_monitoring();
    let window = Duration::from_secs(1);

    let started = Instant::now();
    for _ in 0..150 {
        monitoring
            .register_repeat(window, Severity::WARNING, "queue backlog", "")
            .unwrap();
        thread::sleep(Duration::from_millis(10));
    }
    let elapsed = started.elapsed();

    let stored = stored_events(&monitoring).len() as f64;
    let expected = (elapsed.as_secs_f64() / window.as_secs_f64()).ceil();
    assert!(
        (stored - expected).abs() <= 1.0,
        "{stored} events for {elapsed:?} with a {window:?} window"
    );
    assert!(stored >= 2.0);
}

#[test]
fn test_repeat_is_keyed_by_title() {
    let monitoring = memory_monitoring();
    let node = monitoring.create_monitoring("api").unwrap();
    node.setup_states_repeat(Some(Duration::from_secs(60)));

    assert!(node.register(Severity::ERROR, "timeout", "").unwrap().is_enqueued());
    assert_eq!(
        node.register(Severity::FATAL, "timeout", "").unwrap(),
        Registration::Suppressed
    );
    assert!(node.register(Severity::ERROR, "refused", "").unwrap().is_enqueued());

    // other nodes keep their own anchors
    assert!(monitoring
        .register(Severity::ERROR, "timeout", "")
        .unwrap()
        .is_enqueued());

    node.setup_states_repeat(None);
    assert!(node.register(Severity::ERROR, "timeout", "").unwrap().is_enqueued());

    assert_eq!(stored_events(&monitoring).len(), 4);
}

#[test]
fn test_removed_nodes_are_orphaned() {
    let monitoring = memory_monitoring();
    let db = monitoring.create_monitoring("db").unwrap();
    let pool = db.attach_component("pool", None).unwrap();
    let counter = pool
        .attach_numeric_counter("connections", CounterType::Count)
        .unwrap();
    counter.increment_by(3).unwrap();

    db.remove_from_monitoring().unwrap();

    assert!(db.parent().is_none());
    assert!(monitoring.root().children().is_empty());
    assert!(!pool.is_attached());
    assert_eq!(pool.parent().unwrap().component(), "billing.db");

    // the orphaned subtree is no longer updated from the root
    assert_eq!(monitoring.update_counters(), 0);
    assert!(monitoring.counter_samples().is_empty());
    assert_eq!(counter.counter_value(), 0.0);

    // handles still work
    assert_eq!(counter.update(), 3.0);
    assert!(pool.register(Severity::ERROR, "late", "").unwrap().is_enqueued());

    // a fresh node takes the name
    let replacement = monitoring.create_monitoring("db").unwrap();
    assert!(replacement.children().is_empty());
    assert!(matches!(
        monitoring.root().remove_from_monitoring(),
        Err(MonitoringError::RootRemoval(_))
    ));
}

#[test]
fn test_counter_samples_cover_reachable_nodes() {
    let monitoring = memory_monitoring();
    let api = monitoring.create_monitoring("api").unwrap();

    let requests = api
        .attach_numeric_counter("requests", CounterType::Delta)
        .unwrap();
    api.attach_string_counter("version", StringSource::Snapshot("1.4.2".to_string()))
        .unwrap();
    monitoring
        .root()
        .attach_system_counter("memory_total", SystemCounter::MemoryTotal)
        .unwrap();
    assert!(matches!(
        api.attach_numeric_counter("requests", CounterType::Count),
        Err(MonitoringError::CounterExists(_))
    ));

    requests.increment_by(7).unwrap();
    assert_eq!(monitoring.update_counters(), 3);

    let samples = monitoring.counter_samples();
    let names: Vec<_> = samples
        .iter()
        .map(|s| format!("{}/{}", s.path, s.name))
        .collect();
    assert_eq!(
        names,
        vec!["billing/memory_total", "billing.api/requests", "billing.api/version"]
    );
    assert_eq!(samples[1].value, CounterValue::Number(7.0));
    assert_eq!(samples[2].value, CounterValue::Text("1.4.2".to_string()));
    assert_eq!(samples[2].kind, CounterType::StringValue);
}

#[test]
fn test_housekeeping_updates_counters() {
    let monitoring = Monitoring::builder("billing")
        .machine("test-host")
        .counter_interval(Some(Duration::from_millis(20)))
        .build()
        .unwrap();
    let counter = monitoring
        .root()
        .attach_numeric_counter("jobs", CounterType::Count)
        .unwrap();
    counter.increment_by(5).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while counter.counter_value() != 5.0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(counter.counter_value(), 5.0);
}

#[test]
fn test_state_changes_and_notifications() {
    let notifier = Arc::new(RecordingNotifier::default());
    let monitoring = Monitoring::builder("billing")
        .machine("test-host")
        .counter_interval(None)
        .notifier(Channel::Plain, notifier.clone())
        .notifier(Channel::Email, notifier.clone())
        .build()
        .unwrap();

    let db = monitoring.create_monitoring("db").unwrap();
    db.change_state(ComponentState::Connected, "connected", "").unwrap();
    db.change_state_with(
        ComponentState::Broken,
        Severity::FATAL.with_email(),
        "replica lost",
        "",
    )
    .unwrap();
    monitoring
        .register(Severity::WARNING.with_notify(), "slow", "")
        .unwrap();

    assert_eq!(db.state(), ComponentState::Broken);
    assert_eq!(stored_events(&monitoring).len(), 3);

    let received = notifier.received.lock().clone();
    assert_eq!(
        received,
        vec![
            (Channel::Plain, "replica lost".to_string()),
            (Channel::Email, "replica lost".to_string()),
            (Channel::Plain, "slow".to_string()),
        ]
    );
}

#[test]
fn test_shutdown_drains_queue() {
    let storage = Arc::new(MemoryStorage::new());
    let monitoring = create_test_monitoring(storage.clone());
    for i in 0..500 {
        monitoring
            .register(Severity::INFO, &format!("event {i}"), "")
            .unwrap();
    }
    drop(monitoring);

    assert_eq!(storage.len(), 500);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_fetch_inside_runtime() {
    let storage = Arc::new(MemoryStorage::new());
    let monitoring = create_test_monitoring(storage.clone());
    monitoring.register(Severity::ERROR, "from async", "").unwrap();
    assert!(monitoring.wait_flushed(crate::helpers::FLUSH_TIMEOUT));

    let page = monitoring
        .fetch(&module_monitoring::FetchQuery::all())
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(storage.get_stats().await.unwrap(), "In-Memory: 1 events, last id 1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_close_drains_without_holding_the_worker() {
    // retries sleep on the runtime's timer, which only advances while the
    // single worker is free
    let storage = Arc::new(FlakyStorage::new(3));
    let monitoring = Monitoring::builder("billing")
        .machine("test-host")
        .counter_interval(None)
        .flush(FlushConfig {
            retry_delay_ms: 20,
            ..FlushConfig::default()
        })
        .storage(storage.clone())
        .build()
        .unwrap();

    for i in 0..50 {
        monitoring
            .register(Severity::INFO, &format!("event {i}"), "")
            .unwrap();
    }

    tokio::time::timeout(Duration::from_secs(10), monitoring.close())
        .await
        .expect("close did not finish");

    assert!(monitoring.is_shut_down());
    let stats = monitoring.sink_stats();
    assert_eq!(stats.stored, 50);
    assert_eq!(stats.dropped, 0);
    assert_eq!(storage.inner.get_stats().await.unwrap(), "In-Memory: 50 events, last id 50");
}
