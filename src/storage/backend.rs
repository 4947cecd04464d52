//! Storage contract for monitoring events
//!
//! The pipeline only needs two things from a persistent engine: store a batch
//! of events in one transaction, and fetch a page of events. Everything else
//! on [`MonitoringStorage`] is maintenance surface used by the housekeeping
//! thread and the ctl binary.

use std::collections::HashMap;
use std::slice;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::{StorageError, StorageResult};
use crate::monitoring::MonitoringEvent;

/// Default page size for [`FetchQuery`]
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Paged query over stored events
///
/// Forward pages return events with an id strictly greater than `page_id`
/// in ascending id order; backward pages return ids strictly smaller than
/// `page_id`, descending. Without a `page_id`, forward starts at the
/// beginning and backward at the end. The time window is inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,

    /// Exact match filters; `None` matches everything
    pub machine: Option<String>,
    pub module: Option<String>,
    pub component: Option<String>,

    pub page_id: Option<i64>,
    pub page_size: usize,
    pub forward: bool,
}

fn non_empty(value: impl Into<String>) -> Option<String> {
    let value = value.into();
    (!value.is_empty()).then_some(value)
}

impl FetchQuery {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            machine: None,
            module: None,
            component: None,
            page_id: None,
            page_size: DEFAULT_PAGE_SIZE,
            forward: true,
        }
    }

    /// Query over every event ever stored
    pub fn all() -> Self {
        Self::new(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
    }

    /// Filter by machine; an empty string clears the filter
    pub fn machine(mut self, machine: impl Into<String>) -> Self {
        self.machine = non_empty(machine);
        self
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = non_empty(module);
        self
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = non_empty(component);
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn after(mut self, page_id: i64) -> Self {
        self.page_id = Some(page_id);
        self.forward = true;
        self
    }

    pub fn before(mut self, page_id: i64) -> Self {
        self.page_id = Some(page_id);
        self.forward = false;
        self
    }

    pub fn backward(mut self) -> Self {
        self.forward = false;
        self
    }

    /// Query for the page following `page` in the same direction
    ///
    /// Returns `None` when `page` is shorter than the page size.
    pub fn next_page(&self, page: &[MonitoringEvent]) -> Option<Self> {
        if page.len() < self.page_size {
            return None;
        }
        let last = page.last()?;
        Some(Self {
            page_id: Some(last.id),
            ..self.clone()
        })
    }

    /// Whether an event passes the window and the filters, ignoring paging
    pub fn matches(&self, event: &MonitoringEvent) -> bool {
        fn filter(wanted: &Option<String>, value: &str) -> bool {
            wanted.as_deref().is_none_or(|wanted| wanted == value)
        }

        event.timestamp >= self.from
            && event.timestamp <= self.to
            && filter(&self.machine, &event.machine)
            && filter(&self.module, &event.module)
            && filter(&self.component, &event.component)
    }

    /// Whether an event id lies on the requested side of `page_id`
    pub fn in_page(&self, id: i64) -> bool {
        match (self.page_id, self.forward) {
            (None, _) => true,
            (Some(page_id), true) => id > page_id,
            (Some(page_id), false) => id < page_id,
        }
    }
}

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Persistent engine for monitoring events
///
/// Implementations must be `Send + Sync`; the pipeline calls them from its
/// consumer thread while other threads fetch.
#[async_trait]
pub trait MonitoringStorage: Send + Sync {
    /// Store one event and return the id assigned to it
    async fn store(&self, event: &MonitoringEvent) -> StorageResult<i64> {
        let ids = self.store_batch(slice::from_ref(event)).await?;
        ids.first()
            .copied()
            .ok_or_else(|| StorageError::BackendError("no id assigned".to_string()))
    }

    /// Store a batch of events in one transaction
    ///
    /// Either every event is stored or none is. Ids are assigned in slice
    /// order and strictly increase across calls.
    async fn store_batch(&self, events: &[MonitoringEvent]) -> StorageResult<Vec<i64>>;

    /// Fetch one page of events (see [`FetchQuery`])
    async fn fetch(&self, query: &FetchQuery) -> StorageResult<Vec<MonitoringEvent>>;

    /// Delete events older than `before`, returning how many were removed
    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Lightweight check that the backend is operational
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Human-readable statistics (e.g. "SQLite: 1200 events, 0.45 MB on disk")
    async fn get_stats(&self) -> StorageResult<String>;

    /// Release connections; later calls may fail
    async fn close(&self) -> StorageResult<()>;
}
