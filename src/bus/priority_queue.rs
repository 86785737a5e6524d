use super::bus_message::Envelope;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;

/// Heap entry: higher priority first, then lower ticket (FIFO) first.
#[derive(Debug)]
struct Queued(Envelope);

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.priority.cmp(&other.0.priority).then_with(|| other.0.ticket.cmp(&self.0.ticket))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl Eq for Queued {}

/// Bounded, mutex-guarded priority queue of non-critical envelopes.
#[derive(Debug)]
pub(crate) struct LockedPriorityQueue {
    queue: Mutex<BinaryHeap<Queued>>,
    capacity: usize,
}

impl LockedPriorityQueue {
    pub fn new(capacity: usize) -> Self { Self { queue: Mutex::new(BinaryHeap::new()), capacity } }

    fn lock_queue(&self) -> std::sync::MutexGuard<BinaryHeap<Queued>> {
        self.queue.lock().expect("[FATAL] Mutex poisoned: Failed to acquire lock")
    }

    /// Inserts `envelope`, handing it back if the queue is at capacity.
    pub fn push(&self, envelope: Envelope) -> Result<(), Envelope> {
        let mut queue = self.lock_queue();
        if queue.len() >= self.capacity {
            return Err(envelope);
        }
        queue.push(Queued(envelope));
        Ok(())
    }

    /// Removes and returns the most urgent envelope.
    pub fn pop(&self) -> Option<Envelope> { self.lock_queue().pop().map(|q| q.0) }

    pub fn len(&self) -> usize { self.lock_queue().len() }

    pub fn is_empty(&self) -> bool { self.lock_queue().is_empty() }

    pub fn capacity(&self) -> usize { self.capacity }

    /// Drops every queued envelope and returns how many there were.
    pub fn clear(&self) -> usize {
        let mut queue = self.lock_queue();
        let n = queue.len();
        queue.clear();
        n
    }
}
