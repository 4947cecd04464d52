//! Ring-buffer backend
//!
//! Producers claim a sequence number, write into the slot `sequence & mask`
//! and publish it. The consumer walks the sequences in order and idles
//! according to its [`WaitStrategy`] when the next one is not yet published.
//!
//! ```text
//!            claim            publish           consume
//! producer ─────────► slot ─────────► cursor ◄──────────── consumer
//!     ▲                                                        │
//!     └──────────── gate: seq - size <= consumed ◄─────────────┘
//! ```
//!
//! A full ring stalls the claiming producer until the consumer frees the
//! slot, so this backend has no overflow policy.

use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{QueueBackend, QueueConfig, QueueError, QueueHandlers, QueueResult};

/// Smallest accepted ring size
pub const MIN_RING_SIZE: usize = 128;

const SPIN_TRIES: u32 = 100;
const YIELD_TRIES: u32 = 200;
const SLEEP_INTERVAL: Duration = Duration::from_micros(100);

/// How producers reserve the next slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStrategy {
    /// Plain load and store on claim and publish, only valid with exactly one
    /// producer thread
    ///
    /// `add_item` still passes the start/stop gate, which costs two atomic
    /// updates per item, so a concurrent `stop_processing` never loses a
    /// claimed slot.
    SingleWriter,

    /// CAS on claim plus CAS on publish, safe under any contention
    #[default]
    MultiWriter,

    /// One atomic add on claim and a per-slot lazy publish; meant for fewer
    /// producers than hardware threads
    MultiWriterLowContention,
}

/// How the consumer idles while waiting for the next sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Condition variable, cheapest on CPU
    Blocking,

    /// Spin without backing off, lowest latency
    BusySpin,

    /// Spin, yield, then sleep; latency spikes after idle periods
    Sleeping,

    /// Spin then yield
    #[default]
    Yielding,
}

struct Slot<T> {
    value: Mutex<Option<T>>,
    published: AtomicI64,
}

struct Ring<T> {
    slots: Box<[Slot<T>]>,
    mask: i64,
    size: i64,
    claim: ClaimStrategy,
    wait: WaitStrategy,
    /// highest claimed sequence
    claimed: CachePadded<AtomicI64>,
    /// highest published sequence (single/multi writer)
    cursor: CachePadded<AtomicI64>,
    /// highest consumed sequence
    consumed: CachePadded<AtomicI64>,
    halt: AtomicBool,
    lock: Mutex<()>,
    signal: Condvar,
}

impl<T> Ring<T> {
    fn new(size: usize, claim: ClaimStrategy, wait: WaitStrategy) -> Self {
        let slots = (0..size)
            .map(|_| Slot {
                value: Mutex::new(None),
                published: AtomicI64::new(-1),
            })
            .collect();

        Self {
            slots,
            mask: size as i64 - 1,
            size: size as i64,
            claim,
            wait,
            claimed: CachePadded::new(AtomicI64::new(-1)),
            cursor: CachePadded::new(AtomicI64::new(-1)),
            consumed: CachePadded::new(AtomicI64::new(-1)),
            halt: AtomicBool::new(false),
            lock: Mutex::new(()),
            signal: Condvar::new(),
        }
    }

    fn slot(&self, sequence: i64) -> &Slot<T> {
        &self.slots[(sequence & self.mask) as usize]
    }

    fn claim(&self) -> i64 {
        let sequence = match self.claim {
            ClaimStrategy::SingleWriter => {
                let sequence = self.claimed.load(Ordering::Relaxed) + 1;
                self.claimed.store(sequence, Ordering::Relaxed);
                sequence
            }
            ClaimStrategy::MultiWriter => {
                let mut current = self.claimed.load(Ordering::Relaxed);
                loop {
                    match self.claimed.compare_exchange_weak(
                        current,
                        current + 1,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break current + 1,
                        Err(actual) => current = actual,
                    }
                }
            }
            ClaimStrategy::MultiWriterLowContention => {
                self.claimed.fetch_add(1, Ordering::AcqRel) + 1
            }
        };

        // wrap point: wait until the consumer has freed this slot
        let mut tries = 0;
        while sequence - self.size > self.consumed.load(Ordering::Acquire) {
            backoff(&mut tries);
        }
        sequence
    }

    fn publish(&self, sequence: i64) {
        match self.claim {
            ClaimStrategy::SingleWriter => self.cursor.store(sequence, Ordering::Release),
            ClaimStrategy::MultiWriter => {
                let mut tries = 0;
                while self
                    .cursor
                    .compare_exchange_weak(
                        sequence - 1,
                        sequence,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_err()
                {
                    backoff(&mut tries);
                }
            }
            ClaimStrategy::MultiWriterLowContention => {
                self.slot(sequence)
                    .published
                    .store(sequence, Ordering::Release);
            }
        }

        if self.wait == WaitStrategy::Blocking {
            let _guard = self.lock.lock();
            self.signal.notify_all();
        }
    }

    fn is_available(&self, sequence: i64) -> bool {
        match self.claim {
            ClaimStrategy::SingleWriter | ClaimStrategy::MultiWriter => {
                self.cursor.load(Ordering::Acquire) >= sequence
            }
            ClaimStrategy::MultiWriterLowContention => {
                self.slot(sequence).published.load(Ordering::Acquire) == sequence
            }
        }
    }

    fn idle(&self, next: i64, tries: &mut u32) {
        match self.wait {
            WaitStrategy::BusySpin => hint::spin_loop(),
            WaitStrategy::Yielding => {
                if *tries < SPIN_TRIES {
                    *tries += 1;
                    hint::spin_loop();
                } else {
                    thread::yield_now();
                }
            }
            WaitStrategy::Sleeping => {
                if *tries < SPIN_TRIES {
                    *tries += 1;
                    hint::spin_loop();
                } else if *tries < YIELD_TRIES {
                    *tries += 1;
                    thread::yield_now();
                } else {
                    thread::sleep(SLEEP_INTERVAL);
                }
            }
            WaitStrategy::Blocking => {
                let mut guard = self.lock.lock();
                if !self.is_available(next) && !self.halt.load(Ordering::Acquire) {
                    self.signal.wait(&mut guard);
                }
            }
        }
    }

    fn request_halt(&self) {
        self.halt.store(true, Ordering::Release);
        let _guard = self.lock.lock();
        self.signal.notify_all();
    }
}

fn backoff(tries: &mut u32) {
    if *tries < SPIN_TRIES {
        *tries += 1;
        hint::spin_loop();
    } else {
        thread::yield_now();
    }
}

pub struct RingQueue<T> {
    name: String,
    config: QueueConfig,
    handlers: QueueHandlers<T>,
    ring: Arc<Ring<T>>,
    outstanding: Arc<AtomicUsize>,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> RingQueue<T> {
    /// Create a ring of `config.capacity` slots
    ///
    /// The size must be a power of two and at least [`MIN_RING_SIZE`].
    pub fn new(
        name: impl Into<String>,
        config: QueueConfig,
        handlers: QueueHandlers<T>,
    ) -> QueueResult<Self> {
        let size = config.capacity;
        if size < MIN_RING_SIZE || !size.is_power_of_two() {
            return Err(QueueError::InvalidConfig(format!(
                "ring size must be a power of two >= {MIN_RING_SIZE}, got {size}"
            )));
        }

        Ok(Self {
            name: name.into(),
            config,
            handlers,
            ring: Arc::new(Ring::new(size, config.claim, config.wait)),
            outstanding: Arc::new(AtomicUsize::new(0)),
            accepting: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            consumer: Mutex::new(None),
        })
    }

    fn consume(ring: Arc<Ring<T>>, handlers: QueueHandlers<T>, outstanding: Arc<AtomicUsize>) {
        let mut next = ring.consumed.load(Ordering::Acquire) + 1;
        let mut tries = 0;

        loop {
            // read before the availability check: once halted, every claimed
            // sequence is already published
            let halted = ring.halt.load(Ordering::Acquire);

            if ring.is_available(next) {
                let item = ring.slot(next).value.lock().take();
                if let Some(item) = item {
                    handlers.item(&item);
                }
                ring.consumed.store(next, Ordering::Release);
                outstanding.fetch_sub(1, Ordering::AcqRel);
                next += 1;
                tries = 0;
                continue;
            }

            if halted {
                break;
            }
            ring.idle(next, &mut tries);
        }
    }
}

impl<T: Send + 'static> QueueBackend<T> for RingQueue<T> {
    fn start_processing(&self) -> QueueResult<()> {
        let mut consumer = self.consumer.lock();
        if consumer.is_some() {
            return Err(QueueError::AlreadyStarted(self.name.clone()));
        }

        self.ring.halt.store(false, Ordering::Release);
        let ring = self.ring.clone();
        let handlers = self.handlers.clone();
        let outstanding = self.outstanding.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-consumer", self.name))
            .spawn(move || Self::consume(ring, handlers, outstanding))?;

        *consumer = Some(handle);
        self.accepting.store(true, Ordering::SeqCst);
        drop(consumer);

        debug!(
            "ring queue '{}' started (size {}, {:?}, {:?})",
            self.name, self.config.capacity, self.config.claim, self.config.wait
        );
        self.handlers.started();
        Ok(())
    }

    fn stop_processing(&self) {
        let mut consumer = self.consumer.lock();
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }

        // let producers that passed the gate finish their publish
        let mut tries = 0;
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            backoff(&mut tries);
        }

        self.ring.request_halt();
        if let Some(handle) = consumer.take()
            && handle.join().is_err()
        {
            warn!("consumer of ring queue '{}' panicked", self.name);
        }
        drop(consumer);

        debug!("ring queue '{}' stopped", self.name);
        self.handlers.stopped();
    }

    fn add_item(&self, item: T) -> QueueResult<()> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if !self.accepting.load(Ordering::SeqCst) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::NotStarted(self.name.clone()));
        }

        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let sequence = self.ring.claim();
        *self.ring.slot(sequence).value.lock() = Some(item);
        self.ring.publish(sequence);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn async_queue_size(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    fn is_overflow_error(&self) -> bool {
        false
    }

    fn is_running(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }
}

impl<T> Drop for RingQueue<T> {
    fn drop(&mut self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            self.ring.request_halt();
            if let Some(handle) = self.consumer.get_mut().take() {
                let _ = handle.join();
            }
        }
    }
}
