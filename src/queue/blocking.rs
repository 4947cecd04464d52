//! Bounded-buffer backend
//!
//! A channel between producers and one consumer thread. The overflow policy
//! decides what happens when `capacity` items are outstanding:
//!
//! - `Block`: bounded channel, `send` suspends the producer
//! - `Error` / `Skip`: a slot is reserved against the outstanding count
//!   before sending; a failed reservation drops the item
//! - `Grow`: unbounded channel, nothing is ever dropped

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::overflow::OverflowGate;
use super::{OverflowPolicy, QueueBackend, QueueConfig, QueueError, QueueHandlers, QueueResult};

pub struct BlockingQueue<T> {
    name: String,
    config: QueueConfig,
    handlers: QueueHandlers<T>,
    outstanding: Arc<AtomicUsize>,
    overflow: Arc<OverflowGate>,
    sender: RwLock<Option<Sender<T>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> BlockingQueue<T> {
    pub fn new(name: impl Into<String>, config: QueueConfig, handlers: QueueHandlers<T>) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            name: name.into(),
            config: QueueConfig { capacity, ..config },
            handlers,
            outstanding: Arc::new(AtomicUsize::new(0)),
            overflow: Arc::new(OverflowGate::new(capacity)),
            sender: RwLock::new(None),
            consumer: Mutex::new(None),
        }
    }

    fn consume(
        receiver: Receiver<T>,
        handlers: QueueHandlers<T>,
        outstanding: Arc<AtomicUsize>,
        overflow: Arc<OverflowGate>,
    ) {
        // ends once every sender is dropped and the channel is empty
        for item in receiver.iter() {
            handlers.item(&item);
            overflow.rearm(outstanding.load(Ordering::Acquire).saturating_sub(1));
            outstanding.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Reserve one slot against the capacity, `false` when full
    fn reserve(&self) -> bool {
        let capacity = self.config.capacity;
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .is_ok()
    }

    fn reject(&self) {
        if self.config.overflow == OverflowPolicy::Error && self.overflow.trip() {
            warn!(
                "queue '{}' overflowed (capacity {})",
                self.name, self.config.capacity
            );
            self.handlers.overflow(self.config.capacity);
        } else {
            trace!("queue '{}' full, dropping item", self.name);
        }
    }
}

impl<T: Send + 'static> QueueBackend<T> for BlockingQueue<T> {
    fn start_processing(&self) -> QueueResult<()> {
        let mut sender = self.sender.write();
        if sender.is_some() {
            return Err(QueueError::AlreadyStarted(self.name.clone()));
        }

        let (tx, rx) = match self.config.overflow {
            OverflowPolicy::Block => crossbeam_channel::bounded(self.config.capacity),
            _ => crossbeam_channel::unbounded(),
        };

        let handlers = self.handlers.clone();
        let outstanding = self.outstanding.clone();
        let overflow = self.overflow.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-consumer", self.name))
            .spawn(move || Self::consume(rx, handlers, outstanding, overflow))?;

        *self.consumer.lock() = Some(handle);
        *sender = Some(tx);
        drop(sender);

        debug!(
            "queue '{}' started ({:?}, capacity {})",
            self.name, self.config.overflow, self.config.capacity
        );
        self.handlers.started();
        Ok(())
    }

    fn stop_processing(&self) {
        let Some(sender) = self.sender.write().take() else {
            return;
        };
        drop(sender);

        if let Some(handle) = self.consumer.lock().take()
            && handle.join().is_err()
        {
            warn!("consumer of queue '{}' panicked", self.name);
        }

        debug!("queue '{}' stopped", self.name);
        self.handlers.stopped();
    }

    fn add_item(&self, item: T) -> QueueResult<()> {
        // a send blocked by the Block policy must not hold off stop_processing
        let Some(sender) = self.sender.read().clone() else {
            return Err(QueueError::NotStarted(self.name.clone()));
        };

        match self.config.overflow {
            OverflowPolicy::Grow | OverflowPolicy::Block => {
                self.outstanding.fetch_add(1, Ordering::AcqRel);
            }
            OverflowPolicy::Error | OverflowPolicy::Skip => {
                if !self.reserve() {
                    self.reject();
                    return Ok(());
                }
            }
        }

        if sender.send(item).is_err() {
            // consumer is gone, only possible if a handler panicked
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            return Err(QueueError::NotStarted(self.name.clone()));
        }
        Ok(())
    }

    fn async_queue_size(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    fn is_overflow_error(&self) -> bool {
        self.overflow.is_tripped()
    }

    fn is_running(&self) -> bool {
        self.sender.read().is_some()
    }
}

impl<T> Drop for BlockingQueue<T> {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.get_mut().take() {
            drop(sender);
            if let Some(handle) = self.consumer.get_mut().take() {
                let _ = handle.join();
            }
        }
    }
}
