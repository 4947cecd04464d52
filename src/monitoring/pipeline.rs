//! Event pipeline shared by all nodes of one module
//!
//! ```text
//! StateNode::register ──► HotSwapQueue ──► consumer thread
//!                                            ├─► StorageSink::flush_to_storage
//!                                            └─► NotificationRouter::dispatch
//! ```
//!
//! The consumer thread and the housekeeping thread are plain OS threads; they
//! drive the async storage and notification code through a Tokio runtime
//! handle. The handle is either the caller's multi-threaded runtime or a
//! small runtime owned by the pipeline.

use std::future::Future;
use std::panic;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};
use tracing::{debug, info, trace, warn};

use super::error::MonitoringResult;
use super::event::MonitoringEvent;
use super::severity::Severity;
use super::tree::Tree;
use crate::notify::NotificationRouter;
use crate::queue::{HotSwapQueue, QueueBackend, QueueConfig, QueueHandlers};
use crate::storage::{FlushConfig, MonitoringStorage, StorageSink};

/// Minimum time between two retention cleanups
const CLEANUP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Housekeeping tick when counters are not refreshed automatically
const IDLE_TICK: Duration = Duration::from_secs(60);

pub(crate) struct PipelineOptions {
    pub machine: String,
    pub module: String,
    pub severity: Severity,
    pub queue: QueueConfig,
    pub flush: FlushConfig,
    pub counter_interval: Option<Duration>,
    pub retention_days: Option<u32>,
    pub storage: Arc<dyn MonitoringStorage>,
    pub router: NotificationRouter,
    pub runtime: Option<Handle>,
}

struct Housekeeping {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

pub(crate) struct Core {
    pub(crate) machine: String,
    pub(crate) module: String,
    pub(crate) tree: Arc<RwLock<Tree>>,
    pub(crate) queue: HotSwapQueue<MonitoringEvent>,
    pub(crate) sink: Arc<StorageSink>,
    overflows: Arc<AtomicU64>,
    runtime: Handle,
    owned_runtime: Mutex<Option<Runtime>>,
    housekeeping: Mutex<Option<Housekeeping>>,
    closed: AtomicBool,
}

impl Core {
    pub(crate) fn start(options: PipelineOptions) -> MonitoringResult<Arc<Self>> {
        let (runtime, owned_runtime) = match options
            .runtime
            .or_else(|| Handle::try_current().ok())
            .filter(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
        {
            Some(handle) => (handle, None),
            None => {
                debug!("starting dedicated runtime for module '{}'", options.module);
                let runtime = Builder::new_multi_thread()
                    .worker_threads(1)
                    .thread_name(format!("{}-monitoring-rt", options.module))
                    .enable_all()
                    .build()?;
                (runtime.handle().clone(), Some(runtime))
            }
        };

        let tree = Arc::new(RwLock::new(Tree::new(&options.module, options.severity)));
        let sink = Arc::new(StorageSink::new(options.storage, options.flush));
        let overflows = Arc::new(AtomicU64::new(0));
        let handlers = Self::handlers(
            &options.module,
            &tree,
            &sink,
            &overflows,
            options.router,
            &runtime,
        );
        let queue = HotSwapQueue::new(
            format!("{}-monitoring", options.module),
            options.queue,
            handlers,
        );
        queue.start_processing()?;

        let core = Arc::new(Self {
            machine: options.machine,
            module: options.module,
            tree,
            queue,
            sink,
            overflows,
            runtime,
            owned_runtime: Mutex::new(owned_runtime),
            housekeeping: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        if options.counter_interval.is_some() || options.retention_days.is_some() {
            let housekeeping =
                core.spawn_housekeeping(options.counter_interval, options.retention_days);
            match housekeeping {
                Ok(housekeeping) => *core.housekeeping.lock() = Some(housekeeping),
                Err(e) => {
                    core.shutdown();
                    return Err(e.into());
                }
            }
        }

        info!(
            "monitoring started for module '{}' on '{}'",
            core.module, core.machine
        );
        Ok(core)
    }

    fn handlers(
        module: &str,
        tree: &Arc<RwLock<Tree>>,
        sink: &Arc<StorageSink>,
        overflows: &Arc<AtomicU64>,
        router: NotificationRouter,
        runtime: &Handle,
    ) -> QueueHandlers<MonitoringEvent> {
        let flush_sink = sink.clone();
        let overflows = overflows.clone();
        let runtime = runtime.clone();
        let overflow_tree = tree.clone();
        let module = module.to_string();

        QueueHandlers::new()
            .on_range(move |batch: &[MonitoringEvent]| {
                runtime.block_on(async {
                    flush_sink.flush_to_storage(batch).await;
                    if !router.is_empty() {
                        router.dispatch(batch).await;
                    }
                });
            })
            .on_overflow(move |limit| {
                overflows.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "monitoring queue of module '{}' overflowed at {} events",
                    module, limit
                );
                overflow_tree.read().mark_overflow();
            })
    }

    fn spawn_housekeeping(
        &self,
        counter_interval: Option<Duration>,
        retention_days: Option<u32>,
    ) -> std::io::Result<Housekeeping> {
        let (stop, stopped) = crossbeam_channel::bounded(1);
        let tree = self.tree.clone();
        let sink = self.sink.clone();
        let runtime = self.runtime.clone();

        let thread = thread::Builder::new()
            .name(format!("{}-housekeeping", self.module))
            .spawn(move || {
                housekeeping(tree, sink, runtime, counter_interval, retention_days, stopped)
            })?;

        Ok(Housekeeping { stop, thread })
    }

    /// Hand an event to the queue, `false` if the overflow policy dropped it
    pub(crate) fn enqueue(&self, event: MonitoringEvent) -> MonitoringResult<bool> {
        trace!("enqueueing '{}' from {}", event.title, event.component);
        Ok(self.queue.try_add_item(event)?)
    }

    /// Overflow excursions of the event queue so far
    pub(crate) fn overflow_count(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    /// Run a future to completion on the pipeline runtime
    ///
    /// The future runs on a scoped helper thread, so this is safe to call
    /// from inside an async context as well.
    pub(crate) fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send,
        F::Output: Send,
    {
        let runtime = &self.runtime;
        thread::scope(|scope| {
            scope
                .spawn(move || runtime.block_on(future))
                .join()
                .unwrap_or_else(|payload| panic::resume_unwind(payload))
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop housekeeping, drain the queue, close storage
    pub(crate) fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(housekeeping) = self.housekeeping.lock().take() {
            let _ = housekeeping.stop.send(());
            if housekeeping.thread.join().is_err() {
                warn!("housekeeping thread of module '{}' panicked", self.module);
            }
        }

        self.queue.stop_processing();

        let storage = self.sink.storage().clone();
        if let Err(e) = self.block_on(async move { storage.close().await }) {
            warn!("failed to close monitoring storage: {}", e);
        }

        if let Some(runtime) = self.owned_runtime.lock().take() {
            runtime.shutdown_background();
        }

        let stats = self.sink.stats();
        info!(
            "monitoring stopped for module '{}' ({} events stored, {} dropped)",
            self.module, stats.stored, stats.dropped
        );
    }
}

fn housekeeping(
    tree: Arc<RwLock<Tree>>,
    sink: Arc<StorageSink>,
    runtime: Handle,
    counter_interval: Option<Duration>,
    retention_days: Option<u32>,
    stop: Receiver<()>,
) {
    let tick = counter_interval.unwrap_or(IDLE_TICK);
    let mut last_cleanup: Option<Instant> = None;

    loop {
        match stop.recv_timeout(tick) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        if counter_interval.is_some() {
            tree.read().update_counters();
        }

        if let Some(days) = retention_days
            && last_cleanup.is_none_or(|at| at.elapsed() >= CLEANUP_PERIOD)
        {
            let before = Utc::now() - chrono::Duration::days(i64::from(days));
            match runtime.block_on(sink.storage().cleanup_before(before)) {
                Ok(deleted) => debug!("retention cleanup removed {} events", deleted),
                Err(e) => warn!("retention cleanup failed: {}", e),
            }
            last_cleanup = Some(Instant::now());
        }
    }

    debug!("housekeeping stopped");
}
