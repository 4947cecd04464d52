//! Hierarchical monitoring for one module
//!
//! A [`Monitoring`] instance owns the state tree of a module, the event
//! queue and the storage sink. Components register events through
//! [`StateNode`] handles; accepted events are flushed to storage and routed
//! to notification sinks by a single consumer thread.
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use module_monitoring::monitoring::{ComponentState, Monitoring, Severity};
//!
//! # fn main() -> anyhow::Result<()> {
//! let monitoring = Monitoring::builder("billing").severity(Severity::INFO).build()?;
//!
//! let db = monitoring.root().attach_component("db", None)?;
//! db.setup_states_repeat(Some(Duration::from_secs(60)));
//! db.change_state(ComponentState::Connected, "connected", "primary replica")?;
//! db.register(Severity::ERROR.with_email(), "slow query", "12s on invoices")?;
//!
//! monitoring.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod counter;
pub mod error;
pub mod event;
mod pipeline;
pub mod severity;
pub mod state;
pub mod tree;

use std::error::Error as StdError;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tracing::{debug, warn};

pub use counter::{
    Counter, CounterSample, CounterSource, CounterType, CounterValue, NumericCounter,
    StringCounter, StringSource, SystemCounter,
};
pub use error::{CounterError, MonitoringError, MonitoringResult};
pub use event::MonitoringEvent;
pub use severity::{Level, Severity};
pub use state::ComponentState;
pub use tree::{Registration, StateNode};

use crate::config::MonitoringConfig;
use crate::notify::{Channel, NotificationRouter, NotificationSink};
use crate::queue::{QueueBackend, QueueConfig};
use crate::storage::{FetchQuery, FlushConfig, MemoryStorage, MonitoringStorage, SinkStats};
use pipeline::{Core, PipelineOptions};

/// Default interval of automatic counter updates
pub const DEFAULT_COUNTER_INTERVAL: Duration = Duration::from_secs(1);

/// Builder for [`Monitoring`]
pub struct MonitoringBuilder {
    module: String,
    machine: Option<String>,
    severity: Severity,
    queue: QueueConfig,
    flush: FlushConfig,
    counter_interval: Option<Duration>,
    retention_days: Option<u32>,
    storage: Option<Arc<dyn MonitoringStorage>>,
    router: NotificationRouter,
    runtime: Option<Handle>,
}

impl MonitoringBuilder {
    fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            machine: None,
            severity: Severity::INFO,
            queue: QueueConfig::default(),
            flush: FlushConfig::default(),
            counter_interval: Some(DEFAULT_COUNTER_INTERVAL),
            retention_days: None,
            storage: None,
            router: NotificationRouter::new(),
            runtime: None,
        }
    }

    /// Machine name written into events (see [`crate::util::machine_name`])
    pub fn machine(mut self, machine: impl Into<String>) -> Self {
        self.machine = Some(machine.into());
        self
    }

    /// Severity threshold of the root node
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn flush(mut self, flush: FlushConfig) -> Self {
        self.flush = flush;
        self
    }

    /// Interval of automatic counter updates; `None` leaves updates to the caller
    pub fn counter_interval(mut self, interval: Option<Duration>) -> Self {
        self.counter_interval = interval.filter(|interval| !interval.is_zero());
        self
    }

    /// Delete stored events older than `days`, checked once a day
    pub fn retention_days(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }

    /// Storage backend; defaults to [`MemoryStorage`]
    pub fn storage(mut self, storage: Arc<dyn MonitoringStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn notifier(mut self, channel: Channel, sink: Arc<dyn NotificationSink>) -> Self {
        self.router.add(channel, sink);
        self
    }

    /// Multi-threaded runtime used for storage and notification I/O
    ///
    /// Without one, the current runtime is used if it is multi-threaded;
    /// otherwise the pipeline starts its own.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Start the pipeline
    pub fn build(self) -> MonitoringResult<Monitoring> {
        let core = Core::start(PipelineOptions {
            machine: self.machine.unwrap_or_else(crate::util::machine_name),
            module: self.module,
            severity: self.severity,
            queue: self.queue,
            flush: self.flush,
            counter_interval: self.counter_interval,
            retention_days: self.retention_days,
            storage: self
                .storage
                .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
            router: self.router,
            runtime: self.runtime,
        })?;

        Ok(Monitoring {
            root: StateNode::root(core.clone()),
            core,
        })
    }
}

/// Monitoring pipeline of one module
///
/// Dropping it shuts the pipeline down; see [`Monitoring::shutdown`].
pub struct Monitoring {
    core: Arc<Core>,
    root: StateNode,
}

impl Monitoring {
    pub fn builder(module: impl Into<String>) -> MonitoringBuilder {
        MonitoringBuilder::new(module)
    }

    /// Build a pipeline from a configuration file's contents
    ///
    /// Opens the configured storage, so this must run inside a Tokio runtime.
    pub async fn from_config(config: &MonitoringConfig) -> MonitoringResult<Self> {
        let storage = config.storage.open().await?;
        let mut builder = Monitoring::builder(&config.module)
            .severity(config.severity)
            .queue(config.queue)
            .flush(config.flush)
            .counter_interval(config.counters.interval())
            .storage(storage);

        if let Some(machine) = &config.machine {
            builder = builder.machine(machine);
        }
        if let Some(days) = config.storage.retention_days() {
            builder = builder.retention_days(days);
        }
        for notification in &config.notifications {
            builder = builder.notifier(notification.channel, notification.target.sink());
        }

        builder.build()
    }

    pub fn module(&self) -> &str {
        &self.core.module
    }

    pub fn machine(&self) -> &str {
        &self.core.machine
    }

    /// Root node of the module's state tree
    pub fn root(&self) -> &StateNode {
        &self.root
    }

    /// Child of the root for a sub-component, created on first use
    pub fn create_monitoring(&self, name: &str) -> MonitoringResult<StateNode> {
        match self.root.child(name) {
            Some(node) => Ok(node),
            None => self.root.attach_component(name, None),
        }
    }

    pub fn register(
        &self,
        severity: Severity,
        title: &str,
        description: &str,
    ) -> MonitoringResult<Registration> {
        self.root.register(severity, title, description)
    }

    pub fn register_with(
        &self,
        severity: Severity,
        title: &str,
        describe: impl FnOnce() -> String,
    ) -> MonitoringResult<Registration> {
        self.root.register_with(severity, title, describe)
    }

    pub fn register_error(
        &self,
        severity: Severity,
        title: &str,
        description: &str,
        error: &(dyn StdError + 'static),
    ) -> MonitoringResult<Registration> {
        self.root.register_error(severity, title, description, error)
    }

    pub fn register_repeat(
        &self,
        window: Duration,
        severity: Severity,
        title: &str,
        description: &str,
    ) -> MonitoringResult<Registration> {
        self.root.register_repeat(window, severity, title, description)
    }

    pub fn register_repeat_with(
        &self,
        window: Duration,
        severity: Severity,
        title: &str,
        describe: impl FnOnce() -> String,
    ) -> MonitoringResult<Registration> {
        self.root.register_repeat_with(window, severity, title, describe)
    }

    /// Fetch one page of stored events; errors are logged and returned
    pub async fn fetch(&self, query: &FetchQuery) -> MonitoringResult<Vec<MonitoringEvent>> {
        Ok(self.core.sink.fetch(query).await?)
    }

    /// [`fetch`](Self::fetch) for synchronous callers
    pub fn fetch_blocking(&self, query: &FetchQuery) -> MonitoringResult<Vec<MonitoringEvent>> {
        let sink = &self.core.sink;
        Ok(self.core.block_on(sink.fetch(query))?)
    }

    /// Refresh every counter reachable from the root, returning how many
    pub fn update_counters(&self) -> usize {
        self.core.tree.read().update_counters()
    }

    /// Current values of every counter reachable from the root
    pub fn counter_samples(&self) -> Vec<CounterSample> {
        self.core.tree.read().counter_samples()
    }

    /// Events accepted but not yet persisted, including the batch in flight
    pub fn flush_queue_size(&self) -> usize {
        self.core.queue.async_queue_size()
    }

    /// Wait until every accepted event has been persisted
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_flushed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.flush_queue_size() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }

    /// Whether the event queue is inside an overflow excursion
    pub fn is_overflow_error(&self) -> bool {
        self.core.queue.is_overflow_error()
    }

    pub fn storage(&self) -> &Arc<dyn MonitoringStorage> {
        self.core.sink.storage()
    }

    pub fn sink_stats(&self) -> SinkStats {
        self.core.sink.stats()
    }

    pub fn is_shut_down(&self) -> bool {
        self.core.is_closed()
    }

    /// Drain outstanding events into storage and stop all threads
    ///
    /// Idempotent. Registrations after shutdown fail with
    /// [`QueueError::NotStarted`](crate::queue::QueueError::NotStarted).
    ///
    /// Blocks the calling thread until the consumer has drained and joined,
    /// which includes any storage retries. From async code use
    /// [`close`](Self::close) instead.
    pub fn shutdown(&self) {
        debug!("shutting down monitoring for '{}'", self.core.module);
        self.core.shutdown();
    }

    /// Async variant of [`shutdown`](Self::shutdown) that drains on the
    /// blocking pool instead of the calling worker
    pub async fn close(&self) {
        let core = self.core.clone();
        if tokio::task::spawn_blocking(move || core.shutdown()).await.is_err() {
            warn!("shutdown of monitoring for '{}' panicked", self.core.module);
        }
    }

    /// Number of overflow excursions reported by the event queue
    pub fn overflow_count(&self) -> u64 {
        self.core.overflow_count()
    }
}

/// Dropping runs [`Monitoring::shutdown`] and so blocks like it does; call
/// [`Monitoring::close`] first when dropping inside a runtime.
impl Drop for Monitoring {
    fn drop(&mut self) {
        self.shutdown();
    }
}
