use std::sync::atomic::{AtomicBool, Ordering};

/// Hysteresis latch for the `Error` overflow policy
///
/// Trips once when the queue first rejects an item and only re-arms after
/// occupancy has fallen to half the capacity, so a queue hovering around its
/// limit reports one overflow instead of a storm.
#[derive(Debug)]
pub(crate) struct OverflowGate {
    capacity: usize,
    tripped: AtomicBool,
}

impl OverflowGate {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tripped: AtomicBool::new(false),
        }
    }

    /// Returns `true` if this call opened a new excursion
    pub(crate) fn trip(&self) -> bool {
        !self.tripped.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn rearm(&self, occupancy: usize) {
        if occupancy <= self.capacity / 2 && self.tripped.load(Ordering::Acquire) {
            self.tripped.store(false, Ordering::Release);
        }
    }

    pub(crate) fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }
}
