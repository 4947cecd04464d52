//! In-memory storage backend (no persistence)
//!
//! This backend keeps every stored event in a vector behind a lock.
//! It's useful for:
//! - Testing without database dependencies
//! - Modules that only need notifications (default if no storage configured)
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Unbounded**: Only retention cleanup removes events

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::backend::{FetchQuery, HealthStatus, MonitoringStorage};
use super::error::StorageResult;
use crate::monitoring::MonitoringEvent;

struct Events {
    /// Sorted by id
    rows: Vec<MonitoringEvent>,
    last_id: i64,
}

/// In-memory storage backend
pub struct MemoryStorage {
    events: RwLock<Events>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Events {
                rows: Vec::new(),
                last_id: 0,
            }),
        }
    }

    /// Number of events currently held
    pub fn len(&self) -> usize {
        self.events.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MonitoringStorage for MemoryStorage {
    async fn store_batch(&self, events: &[MonitoringEvent]) -> StorageResult<Vec<i64>> {
        let mut stored = self.events.write();
        let mut ids = Vec::with_capacity(events.len());

        for event in events {
            stored.last_id += 1;
            let id = stored.last_id;
            stored.rows.push(MonitoringEvent {
                id,
                ..event.clone()
            });
            ids.push(id);
        }

        debug!("in-memory storage: stored {} events", ids.len());
        Ok(ids)
    }

    async fn fetch(&self, query: &FetchQuery) -> StorageResult<Vec<MonitoringEvent>> {
        let stored = self.events.read();
        let candidates = stored
            .rows
            .iter()
            .filter(|event| query.in_page(event.id) && query.matches(event));

        let page = if query.forward {
            candidates.take(query.page_size).cloned().collect()
        } else {
            candidates.rev().take(query.page_size).cloned().collect()
        };
        Ok(page)
    }

    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut stored = self.events.write();
        let count = stored.rows.len();
        stored.rows.retain(|event| event.timestamp >= before);
        let deleted = count - stored.rows.len();
        debug!("in-memory storage: removed {} events before {}", deleted, before);
        Ok(deleted)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("total_events".to_string(), self.len().to_string()),
            ]),
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let stored = self.events.read();
        Ok(format!(
            "In-Memory: {} events, last id {}",
            stored.rows.len(),
            stored.last_id
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory storage (no-op)");
        Ok(())
    }
}
