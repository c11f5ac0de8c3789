//! Ordered hand-off from parallel compression to the single output writer.
//!
//! Every entry reserves a [`Ticket`] when it is added. Tickets are numbered
//! in reservation order. In ordered mode a completed entry waits until every
//! lower-numbered ticket has completed or been dropped, then the whole
//! unbroken prefix moves to the ready list. In unordered mode completions go
//! straight to the ready list.
//!
//! [`OrderedQueue::drain`] moves ready entries into a sink. At most one
//! drain runs at a time; a caller that finds a drain in progress returns at
//! once and its entries are picked up by the running drain.

use oxizip_core::Result;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug)]
struct QueueState<T> {
    next_id: u64,
    next_expected: u64,
    /// Completed out of order; `None` marks a dropped ticket.
    pending: BTreeMap<u64, Option<T>>,
    ready: VecDeque<T>,
    draining: bool,
}

/// Reorder buffer with a single-drainer guarantee.
#[derive(Debug)]
pub struct OrderedQueue<T> {
    ordered: bool,
    state: Mutex<QueueState<T>>,
    idle: Condvar,
}

impl<T> OrderedQueue<T> {
    /// New queue; `ordered` keeps reservation order on output.
    pub fn new(ordered: bool) -> Self {
        Self {
            ordered,
            state: Mutex::new(QueueState {
                next_id: 1,
                next_expected: 1,
                pending: BTreeMap::new(),
                ready: VecDeque::new(),
                draining: false,
            }),
            idle: Condvar::new(),
        }
    }

    /// True if output follows reservation order.
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Reserve the next position.
    pub fn reserve(&self) -> Ticket<'_, T> {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        Ticket {
            queue: self,
            id,
            done: false,
        }
    }

    fn complete(&self, id: u64, item: Option<T>) {
        let mut state = self.state.lock();
        if !self.ordered {
            if let Some(item) = item {
                state.ready.push_back(item);
            }
            return;
        }

        state.pending.insert(id, item);
        loop {
            let expected = state.next_expected;
            let Some(slot) = state.pending.remove(&expected) else {
                break;
            };
            state.next_expected += 1;
            if let Some(item) = slot {
                state.ready.push_back(item);
            }
        }
    }

    /// Feed ready items to `sink` until none are left.
    ///
    /// Returns `Ok(false)` without doing anything if another drain is running.
    /// A sink error stops the drain; items still queued stay queued.
    pub fn drain<F>(&self, mut sink: F) -> Result<bool>
    where
        F: FnMut(T) -> Result<()>,
    {
        {
            let mut state = self.state.lock();
            if state.draining {
                return Ok(false);
            }
            state.draining = true;
        }
        let mut guard = DrainGuard {
            queue: self,
            armed: true,
        };

        loop {
            let next = {
                let mut state = self.state.lock();
                let next = state.ready.pop_front();
                if next.is_none() {
                    // Cleared under the same lock as the empty check, so a
                    // racing push finds no drain running and starts one.
                    state.draining = false;
                    guard.armed = false;
                    self.idle.notify_all();
                }
                next
            };
            match next {
                Some(item) => sink(item)?,
                None => return Ok(true),
            }
        }
    }

    /// Block until no drain is running.
    pub fn wait_idle(&self) {
        let mut state = self.state.lock();
        while state.draining {
            self.idle.wait(&mut state);
        }
    }

    /// Items completed but not yet drained, including out-of-order ones.
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.ready.len() + state.pending.values().filter(|slot| slot.is_some()).count()
    }

    /// True if nothing is waiting to be drained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct DrainGuard<'a, T> {
    queue: &'a OrderedQueue<T>,
    armed: bool,
}

impl<T> Drop for DrainGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.queue.state.lock();
            state.draining = false;
            self.queue.idle.notify_all();
        }
    }
}

/// A reserved queue position.
///
/// Dropping a ticket without calling [`Ticket::complete`] records the
/// position as skipped, so a failed entry never stalls ordered output.
#[derive(Debug)]
pub struct Ticket<'a, T> {
    queue: &'a OrderedQueue<T>,
    id: u64,
    done: bool,
}

impl<T> Ticket<'_, T> {
    /// Sequence number, starting at 1.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Hand the finished item to the queue.
    pub fn complete(mut self, item: T) {
        self.done = true;
        self.queue.complete(self.id, Some(item));
    }
}

impl<T> Drop for Ticket<'_, T> {
    fn drop(&mut self) {
        if !self.done {
            self.queue.complete(self.id, None);
        }
    }
}
