//! Many producers against one pipeline and against the raw queues

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;

use module_monitoring::Severity;
use module_monitoring::queue::{
    ClaimStrategy, QueueBackend, QueueConfig, QueueHandlers, QueueKind, RingQueue, WaitStrategy,
};
use module_monitoring::storage::MemoryStorage;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use crate::helpers::{create_test_monitoring, stored_events};

const PRODUCERS: usize = 8;
const PER_PRODUCER: usize = 250;

#[test]
fn test_concurrent_registrations_keep_producer_order() {
    let monitoring = create_test_monitoring(Arc::new(MemoryStorage::new()));

    thread::scope(|scope| {
        for producer in 0..PRODUCERS {
            let node = monitoring
                .create_monitoring(&format!("worker{producer}"))
                .unwrap();
            scope.spawn(move || {
                for i in 0..PER_PRODUCER {
                    node.register(Severity::INFO, &i.to_string(), "").unwrap();
                }
            });
        }
    });

    let events = stored_events(&monitoring);
    assert_eq!(events.len(), PRODUCERS * PER_PRODUCER);

    let ids: HashSet<_> = events.iter().map(|e| e.id).collect();
    assert_eq!(ids.len(), events.len());

    let mut per_worker: HashMap<&str, Vec<usize>> = HashMap::new();
    for event in &events {
        per_worker
            .entry(event.component.as_str())
            .or_default()
            .push(event.title.parse().unwrap());
    }
    assert_eq!(per_worker.len(), PRODUCERS);
    for titles in per_worker.values() {
        assert_eq!(*titles, (0..PER_PRODUCER).collect::<Vec<_>>());
    }
}

#[test]
fn test_concurrent_attach_is_unique() {
    let monitoring = create_test_monitoring(Arc::new(MemoryStorage::new()));
    let root = monitoring.root().clone();

    let created: Vec<bool> = thread::scope(|scope| {
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let root = root.clone();
                scope.spawn(move || root.attach_component("shared", None).is_ok())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(created.iter().filter(|ok| **ok).count(), 1);
    assert_eq!(monitoring.root().children().len(), 1);
}

fn run_producers(queue: &dyn QueueBackend<(usize, usize)>) {
    thread::scope(|scope| {
        for producer in 0..PRODUCERS {
            scope.spawn(move || {
                for i in 0..PER_PRODUCER {
                    queue.add_item((producer, i)).unwrap();
                }
            });
        }
    });
}

fn assert_per_producer_fifo(seen: &[(usize, usize)]) {
    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
    for producer in 0..PRODUCERS {
        let items: Vec<_> = seen
            .iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, i)| *i)
            .collect();
        assert_eq!(items, (0..PER_PRODUCER).collect::<Vec<_>>());
    }
}

#[test]
fn test_every_backend_delivers_all_items_in_producer_order() {
    for kind in [QueueKind::Blocking, QueueKind::HotSwap, QueueKind::Ring] {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handlers = QueueHandlers::new().on_item(move |item: &(usize, usize)| {
            sink.lock().push(*item);
        });

        let config = match kind {
            QueueKind::Ring => QueueConfig::ring(
                256,
                ClaimStrategy::MultiWriter,
                WaitStrategy::Blocking,
            ),
            _ => QueueConfig::default(),
        };

        let queue = kind.build("concurrency", config, handlers).unwrap();
        queue.start_processing().unwrap();
        run_producers(queue.as_ref());
        queue.stop_processing();

        assert_per_producer_fifo(&seen.lock());
    }
}

#[test]
fn test_ring_low_contention_claims() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let queue = RingQueue::new(
        "low-contention",
        QueueConfig::ring(
            128,
            ClaimStrategy::MultiWriterLowContention,
            WaitStrategy::Sleeping,
        ),
        QueueHandlers::new().on_item(move |item: &(usize, usize)| sink.lock().push(*item)),
    )
    .unwrap();

    queue.start_processing().unwrap();
    run_producers(&queue);
    queue.stop_processing();

    assert_per_producer_fifo(&seen.lock());
}
