//! Double-buffered backend
//!
//! Producers append to `current` under a short lock. The consumer swaps
//! `current` with its private `processing` list, releases the lock and
//! delivers the whole batch to `on_range`, then every item to `on_item`.
//!
//! Overflow policies behave like [`BlockingQueue`](super::BlockingQueue)'s,
//! but occupancy is the length of both lists combined. Stopping plants a
//! terminator; the consumer exits after the swap that picks it up.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use super::overflow::OverflowGate;
use super::{
    OverflowPolicy, QueueBackend, QueueConfig, QueueError, QueueHandlers, QueueResult,
    RangeQueueBackend,
};

struct Buffers<T> {
    current: Vec<T>,
    /// length of the list the consumer is draining
    processing: usize,
    accepting: bool,
    terminate: bool,
}

impl<T> Buffers<T> {
    fn occupancy(&self) -> usize {
        self.current.len() + self.processing
    }
}

struct Shared<T> {
    buffers: Mutex<Buffers<T>>,
    wake: Condvar,
    space: Condvar,
    outstanding: AtomicUsize,
    overflow: OverflowGate,
}

enum Offer {
    Accepted,
    Dropped,
    Overflowed,
}

pub struct HotSwapQueue<T> {
    name: String,
    config: QueueConfig,
    handlers: QueueHandlers<T>,
    shared: Arc<Shared<T>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> HotSwapQueue<T> {
    pub fn new(name: impl Into<String>, config: QueueConfig, handlers: QueueHandlers<T>) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            name: name.into(),
            config: QueueConfig { capacity, ..config },
            handlers,
            shared: Arc::new(Shared {
                buffers: Mutex::new(Buffers {
                    current: Vec::new(),
                    processing: 0,
                    accepting: false,
                    terminate: false,
                }),
                wake: Condvar::new(),
                space: Condvar::new(),
                outstanding: AtomicUsize::new(0),
                overflow: OverflowGate::new(capacity),
            }),
            consumer: Mutex::new(None),
        }
    }

    fn consume(shared: Arc<Shared<T>>, handlers: QueueHandlers<T>) {
        let mut processing: Vec<T> = Vec::new();

        loop {
            let terminate = {
                let mut buffers = shared.buffers.lock();
                while buffers.current.is_empty() && !buffers.terminate {
                    shared.wake.wait(&mut buffers);
                }
                mem::swap(&mut buffers.current, &mut processing);
                buffers.processing = processing.len();
                buffers.terminate
            };

            let delivered = processing.len();
            if delivered > 0 {
                trace!("delivering batch of {delivered} items");
                handlers.range(&processing);
                for item in &processing {
                    handlers.item(item);
                }
                processing.clear();
            }

            {
                let mut buffers = shared.buffers.lock();
                buffers.processing = 0;
                shared.overflow.rearm(buffers.occupancy());
                shared.outstanding.fetch_sub(delivered, Ordering::AcqRel);
                shared.space.notify_all();
            }

            if terminate {
                break;
            }
        }
    }

    /// Apply the overflow policy to one item, with the lock held
    fn offer(
        &self,
        buffers: &mut parking_lot::MutexGuard<'_, Buffers<T>>,
        item: T,
    ) -> QueueResult<Offer> {
        let capacity = self.config.capacity;

        if buffers.occupancy() >= capacity {
            match self.config.overflow {
                OverflowPolicy::Grow => {}
                OverflowPolicy::Skip => return Ok(Offer::Dropped),
                OverflowPolicy::Error => return Ok(Offer::Overflowed),
                OverflowPolicy::Block => {
                    while buffers.occupancy() >= capacity && buffers.accepting {
                        self.shared.space.wait(buffers);
                    }
                    if !buffers.accepting {
                        return Err(QueueError::NotStarted(self.name.clone()));
                    }
                }
            }
        }

        if buffers.current.is_empty() {
            self.shared.wake.notify_one();
        }
        buffers.current.push(item);
        self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(Offer::Accepted)
    }

    /// Enqueue one item, returning `false` if the overflow policy dropped it
    pub fn try_add_item(&self, item: T) -> QueueResult<bool> {
        let mut buffers = self.shared.buffers.lock();
        if !buffers.accepting {
            return Err(QueueError::NotStarted(self.name.clone()));
        }

        let offer = self.offer(&mut buffers, item)?;
        drop(buffers);

        match offer {
            Offer::Accepted => return Ok(true),
            Offer::Dropped => trace!("queue '{}' full, dropping item", self.name),
            Offer::Overflowed => self.signal_overflow(),
        }
        Ok(false)
    }

    fn signal_overflow(&self) {
        if self.shared.overflow.trip() {
            warn!(
                "queue '{}' overflowed (capacity {})",
                self.name, self.config.capacity
            );
            self.handlers.overflow(self.config.capacity);
        }
    }
}

impl<T: Send + 'static> QueueBackend<T> for HotSwapQueue<T> {
    fn start_processing(&self) -> QueueResult<()> {
        let mut consumer = self.consumer.lock();
        if consumer.is_some() {
            return Err(QueueError::AlreadyStarted(self.name.clone()));
        }

        let shared = self.shared.clone();
        let handlers = self.handlers.clone();
        {
            let mut buffers = self.shared.buffers.lock();
            buffers.terminate = false;
            buffers.accepting = true;
        }
        let spawned = thread::Builder::new()
            .name(format!("{}-consumer", self.name))
            .spawn(move || Self::consume(shared, handlers));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.buffers.lock().accepting = false;
                return Err(e.into());
            }
        };
        *consumer = Some(handle);
        drop(consumer);

        debug!(
            "hot-swap queue '{}' started ({:?}, capacity {})",
            self.name, self.config.overflow, self.config.capacity
        );
        self.handlers.started();
        Ok(())
    }

    fn stop_processing(&self) {
        let mut consumer = self.consumer.lock();
        {
            let mut buffers = self.shared.buffers.lock();
            if !buffers.accepting {
                return;
            }
            buffers.accepting = false;
            buffers.terminate = true;
            self.shared.wake.notify_one();
            self.shared.space.notify_all();
        }

        if let Some(handle) = consumer.take()
            && handle.join().is_err()
        {
            warn!("consumer of hot-swap queue '{}' panicked", self.name);
        }
        drop(consumer);

        debug!("hot-swap queue '{}' stopped", self.name);
        self.handlers.stopped();
    }

    fn add_item(&self, item: T) -> QueueResult<()> {
        self.try_add_item(item).map(|_| ())
    }

    fn async_queue_size(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    fn is_overflow_error(&self) -> bool {
        self.shared.overflow.is_tripped()
    }

    fn is_running(&self) -> bool {
        self.shared.buffers.lock().accepting
    }
}

impl<T: Send + 'static> RangeQueueBackend<T> for HotSwapQueue<T> {
    fn add_range(&self, items: Vec<T>) -> QueueResult<()> {
        let mut buffers = self.shared.buffers.lock();
        if !buffers.accepting {
            return Err(QueueError::NotStarted(self.name.clone()));
        }

        let mut overflowed = false;
        let mut dropped = 0;
        for item in items {
            match self.offer(&mut buffers, item)? {
                Offer::Accepted => {}
                Offer::Dropped => dropped += 1,
                Offer::Overflowed => overflowed = true,
            }
        }
        drop(buffers);

        if dropped > 0 {
            trace!("queue '{}' full, dropped {dropped} items", self.name);
        }
        if overflowed {
            self.signal_overflow();
        }
        Ok(())
    }
}

impl<T> Drop for HotSwapQueue<T> {
    fn drop(&mut self) {
        let Some(handle) = self.consumer.get_mut().take() else {
            return;
        };
        {
            let mut buffers = self.shared.buffers.lock();
            buffers.accepting = false;
            buffers.terminate = true;
            self.shared.wake.notify_one();
            self.shared.space.notify_all();
        }
        let _ = handle.join();
    }
}
