//! Pipeline against a real SQLite file

use std::sync::Arc;

use module_monitoring::config::parse_config;
use module_monitoring::storage::{FetchQuery, MonitoringStorage, SqliteStorage};
use module_monitoring::{Monitoring, MonitoringEvent, Severity};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::runtime::Runtime;

use crate::helpers::FLUSH_TIMEOUT;

struct Fixture {
    _dir: TempDir,
    path: std::path::PathBuf,
    runtime: Runtime,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitoring.db");
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        Self {
            _dir: dir,
            path,
            runtime,
        }
    }

    fn open(&self) -> Arc<SqliteStorage> {
        Arc::new(self.runtime.block_on(SqliteStorage::new(&self.path)).unwrap())
    }

    fn monitoring(&self) -> Monitoring {
        Monitoring::builder("billing")
            .machine("test-host")
            .counter_interval(None)
            .storage(self.open())
            .runtime(self.runtime.handle().clone())
            .build()
            .unwrap()
    }

    fn fetch_all(&self, storage: &SqliteStorage, query: FetchQuery) -> Vec<MonitoringEvent> {
        self.runtime.block_on(async {
            let mut events = Vec::new();
            let mut next = Some(query);
            while let Some(query) = next {
                let page = storage.fetch(&query).await.unwrap();
                next = query.next_page(&page);
                events.extend(page);
            }
            events
        })
    }
}

#[test]
fn test_events_survive_restart() {
    let fixture = Fixture::new();

    let monitoring = fixture.monitoring();
    let db = monitoring.create_monitoring("db").unwrap();
    for i in 0..120 {
        db.register(Severity::WARNING, &format!("slow query {i}"), "over 2s")
            .unwrap();
    }
    assert!(monitoring.wait_flushed(FLUSH_TIMEOUT));
    monitoring.shutdown();
    drop(monitoring);

    let storage = fixture.open();
    let events = fixture.fetch_all(&storage, FetchQuery::all().page_size(50));
    assert_eq!(events.len(), 120);
    assert!(events.iter().all(|e| e.component == "billing.db"));
    assert!(events.iter().all(|e| e.severity == Severity::WARNING));
    assert_eq!(events[0].title, "slow query 0");
    assert_eq!(events[119].title, "slow query 119");
}

#[test]
fn test_paging_covers_every_event_once() {
    let fixture = Fixture::new();
    let monitoring = fixture.monitoring();
    let api = monitoring.create_monitoring("api").unwrap();
    for i in 0..95 {
        let node = if i % 3 == 0 { &api } else { monitoring.root() };
        node.register(Severity::INFO, &i.to_string(), "").unwrap();
    }
    assert!(monitoring.wait_flushed(FLUSH_TIMEOUT));

    let storage = fixture.open();
    let forward = fixture.fetch_all(&storage, FetchQuery::all().page_size(10));
    let ids: Vec<_> = forward.iter().map(|e| e.id).collect();
    assert_eq!(ids.len(), 95);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let backward = fixture.fetch_all(&storage, FetchQuery::all().backward().page_size(7));
    let mut reversed: Vec<_> = backward.iter().map(|e| e.id).collect();
    reversed.reverse();
    assert_eq!(reversed, ids);

    let api_only = fixture.fetch_all(
        &storage,
        FetchQuery::all().component("billing.api").page_size(4),
    );
    assert_eq!(api_only.len(), 32);

    let other_machine = fixture.fetch_all(&storage, FetchQuery::all().machine("elsewhere"));
    assert!(other_machine.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_from_config_opens_sqlite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("configured.db");
    let config = parse_config(&format!(
        r#"{{
            "module": "checkout",
            "machine": "box-1",
            "counters": {{ "update_interval_ms": 0 }},
            "storage": {{ "backend": "sqlite", "path": "{}", "retention_days": 7 }}
        }}"#,
        path.display()
    ))
    .unwrap();

    let monitoring = Monitoring::from_config(&config).await.unwrap();
    assert_eq!(monitoring.module(), "checkout");
    assert_eq!(monitoring.machine(), "box-1");

    monitoring
        .register(Severity::ERROR, "payment declined", "card expired")
        .unwrap();

    let events = tokio::task::spawn_blocking(move || {
        assert!(monitoring.wait_flushed(FLUSH_TIMEOUT));
        let events = monitoring.fetch_blocking(&FetchQuery::all()).unwrap();
        monitoring.shutdown();
        events
    })
    .await
    .unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].module, "checkout");
    assert_eq!(events[0].machine, "box-1");
    assert!(path.exists());
}
