//! Counting limiter that bounds how many entries are processed at once.

use parking_lot::{Condvar, Mutex};

/// A counting semaphore.
///
/// [`Limiter::acquire`] blocks until a slot is free and returns a [`Permit`]
/// that gives the slot back when dropped, including on error and unwind
/// paths.
#[derive(Debug)]
pub struct Limiter {
    capacity: usize,
    available: Mutex<usize>,
    released: Condvar,
}

impl Limiter {
    /// Create a limiter with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            available: Mutex::new(capacity),
            released: Condvar::new(),
        }
    }

    /// Processor count, or 1 if it cannot be determined.
    pub fn processor_count() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently taken.
    pub fn in_use(&self) -> usize {
        self.capacity - *self.available.lock()
    }

    /// Block until a slot is free and take it.
    pub fn acquire(&self) -> Permit<'_> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.released.wait(&mut available);
        }
        *available -= 1;
        Permit { limiter: self }
    }

    /// Take a slot if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut available = self.available.lock();
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(Permit { limiter: self })
    }

    fn release(&self) {
        let mut available = self.available.lock();
        *available += 1;
        self.released.notify_one();
    }
}

/// A held limiter slot.
#[derive(Debug)]
pub struct Permit<'a> {
    limiter: &'a Limiter,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.limiter.release();
    }
}
