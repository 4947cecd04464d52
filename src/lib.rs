//! In-process monitoring for long-running server modules
//!
//! - [`queue`]: producer/consumer queues with blocking, ring and hot-swap backends
//! - [`monitoring`]: state tree, severity gating, repeat suppression, counters
//! - [`storage`]: event persistence with chunked, retried flushes and paged fetch
//! - [`notify`]: severity-routed notification sinks

pub mod config;
pub mod monitoring;
pub mod notify;
pub mod queue;
pub mod storage;
pub mod util;

pub use monitoring::{
    ComponentState, Monitoring, MonitoringError, MonitoringEvent, MonitoringResult, Registration,
    Severity, StateNode,
};
pub use storage::FetchQuery;
