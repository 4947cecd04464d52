//! Asynchronous producer/consumer queues
//!
//! Every backend owns exactly one consumer thread, spawned by
//! [`QueueBackend::start_processing`] and joined by
//! [`QueueBackend::stop_processing`]. Producers on any thread call
//! [`QueueBackend::add_item`] without external locking.
//!
//! ## Backends
//!
//! - [`BlockingQueue`]: bounded channel with the four [`OverflowPolicy`] variants
//! - [`RingQueue`]: pre-allocated ring with pluggable [`ClaimStrategy`] and
//!   [`WaitStrategy`], for minimum producer latency
//! - [`HotSwapQueue`]: two swapped lists, delivers whole batches to a range
//!   handler before the per-item handler
//!
//! ## Lifecycle callbacks
//!
//! ```text
//! on_start     caller thread of start_processing
//! on_stop      caller thread of stop_processing (after the drain)
//! on_item      consumer thread, once per item
//! on_range     consumer thread, once per batch (hot-swap only)
//! on_overflow  producer thread, once per overflow excursion
//! ```

pub mod blocking;
pub mod error;
pub mod hot_swap;
mod overflow;
pub mod ring;

use std::sync::Arc;

use serde::Deserialize;

pub use blocking::BlockingQueue;
pub use error::{QueueError, QueueResult};
pub use hot_swap::HotSwapQueue;
pub use ring::{ClaimStrategy, RingQueue, WaitStrategy};

/// Default capacity of bounded backends
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Default ring size for [`RingQueue`]
pub const DEFAULT_RING_SIZE: usize = 1024;

/// Rule applied when a bounded queue is full at enqueue time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the item and signal `on_overflow(capacity)` once per excursion
    Error,

    /// Drop the item silently
    Skip,

    /// Never drop, the buffer is unbounded
    #[default]
    Grow,

    /// Suspend the producer until space frees up
    Block,
}

/// Static configuration of a queue backend
///
/// Captured when the backend is created; it cannot change while the consumer
/// is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub overflow: OverflowPolicy,

    /// Capacity for bounded backends, ring size for [`RingQueue`]
    pub capacity: usize,

    pub claim: ClaimStrategy,

    pub wait: WaitStrategy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            overflow: OverflowPolicy::default(),
            capacity: DEFAULT_CAPACITY,
            claim: ClaimStrategy::default(),
            wait: WaitStrategy::default(),
        }
    }
}

impl QueueConfig {
    pub fn with_overflow(overflow: OverflowPolicy, capacity: usize) -> Self {
        Self {
            overflow,
            capacity,
            ..Self::default()
        }
    }

    pub fn ring(capacity: usize, claim: ClaimStrategy, wait: WaitStrategy) -> Self {
        Self {
            overflow: OverflowPolicy::Block,
            capacity,
            claim,
            wait,
        }
    }
}

type LifecycleHandler = Arc<dyn Fn() + Send + Sync>;
type ItemHandler<T> = Arc<dyn Fn(&T) + Send + Sync>;
type RangeHandler<T> = Arc<dyn Fn(&[T]) + Send + Sync>;
type OverflowHandler = Arc<dyn Fn(usize) + Send + Sync>;

/// Callbacks fired by a queue backend
///
/// Handlers are plain closures; a backend clones the set into its consumer
/// thread on start.
pub struct QueueHandlers<T> {
    on_start: Option<LifecycleHandler>,
    on_stop: Option<LifecycleHandler>,
    on_item: Option<ItemHandler<T>>,
    on_range: Option<RangeHandler<T>>,
    on_overflow: Option<OverflowHandler>,
}

impl<T> Default for QueueHandlers<T> {
    fn default() -> Self {
        Self {
            on_start: None,
            on_stop: None,
            on_item: None,
            on_range: None,
            on_overflow: None,
        }
    }
}

impl<T> Clone for QueueHandlers<T> {
    fn clone(&self) -> Self {
        Self {
            on_start: self.on_start.clone(),
            on_stop: self.on_stop.clone(),
            on_item: self.on_item.clone(),
            on_range: self.on_range.clone(),
            on_overflow: self.on_overflow.clone(),
        }
    }
}

impl<T> QueueHandlers<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(handler));
        self
    }

    pub fn on_stop(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_stop = Some(Arc::new(handler));
        self
    }

    pub fn on_item(mut self, handler: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_item = Some(Arc::new(handler));
        self
    }

    /// Batch handler, only invoked by range backends
    pub fn on_range(mut self, handler: impl Fn(&[T]) + Send + Sync + 'static) -> Self {
        self.on_range = Some(Arc::new(handler));
        self
    }

    pub fn on_overflow(mut self, handler: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_overflow = Some(Arc::new(handler));
        self
    }

    pub(crate) fn started(&self) {
        if let Some(handler) = &self.on_start {
            handler();
        }
    }

    pub(crate) fn stopped(&self) {
        if let Some(handler) = &self.on_stop {
            handler();
        }
    }

    pub(crate) fn item(&self, item: &T) {
        if let Some(handler) = &self.on_item {
            handler(item);
        }
    }

    pub(crate) fn range(&self, items: &[T]) {
        if let Some(handler) = &self.on_range {
            handler(items);
        }
    }

    pub(crate) fn overflow(&self, limit: usize) {
        if let Some(handler) = &self.on_overflow {
            handler(limit);
        }
    }
}

/// Uniform producer/consumer contract shared by all backends
pub trait QueueBackend<T>: Send + Sync {
    /// Spawn the consumer thread
    ///
    /// Fails with [`QueueError::AlreadyStarted`] while running.
    fn start_processing(&self) -> QueueResult<()>;

    /// Drain outstanding items and join the consumer thread
    ///
    /// Idempotent: a no-op when not running.
    fn stop_processing(&self);

    /// Enqueue one item
    ///
    /// Fails with [`QueueError::NotStarted`] before start and after stop.
    /// Dropping an item because of the overflow policy is not an error.
    fn add_item(&self, item: T) -> QueueResult<()>;

    /// Best-effort count of items not yet delivered to the consumer
    fn async_queue_size(&self) -> usize;

    /// Whether the backend is currently inside an overflow excursion
    fn is_overflow_error(&self) -> bool;

    fn is_running(&self) -> bool;
}

/// Backend that also accepts whole ranges and delivers batches
pub trait RangeQueueBackend<T>: QueueBackend<T> {
    fn add_range(&self, items: Vec<T>) -> QueueResult<()>;
}

/// Backend selector used by configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Blocking,
    Ring,
    #[default]
    HotSwap,
}

impl QueueKind {
    /// Build a boxed single-item backend of this kind
    pub fn build<T: Send + 'static>(
        self,
        name: &str,
        config: QueueConfig,
        handlers: QueueHandlers<T>,
    ) -> QueueResult<Box<dyn QueueBackend<T>>> {
        let backend: Box<dyn QueueBackend<T>> = match self {
            QueueKind::Blocking => Box::new(BlockingQueue::new(name, config, handlers)),
            QueueKind::Ring => Box::new(RingQueue::new(name, config, handlers)?),
            QueueKind::HotSwap => Box::new(HotSwapQueue::new(name, config, handlers)),
        };
        Ok(backend)
    }
}
