//! Priority inbound queue (C3, spec.md §4.3): a concurrent priority queue
//! ordering inbound commands by numeric priority, weak FIFO on ties.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Initial capacity hint, matching spec.md's "small fixed number (e.g. 1000)
/// for growth hysteresis"; the heap still grows past this, it's just sized
/// up front to avoid reallocating on the common case.
const INITIAL_CAPACITY: usize = 1000;

struct QueueEntry<T> {
    priority: i32,
    sequence: u64,
    item: T,
}

impl<T> PartialEq for QueueEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl<T> Eq for QueueEntry<T> {}

impl<T> PartialOrd for QueueEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for QueueEntry<T> {
    /// `BinaryHeap` is a max-heap: the "greatest" entry pops first. Higher
    /// priority must pop first, so higher priority compares greater. Among
    /// equal priorities, the earlier sequence number must pop first, so it
    /// must also compare greater -- hence the reversed sequence comparison.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Bounded only by memory; safe for many producers and many consumers.
pub struct PriorityQueue<T> {
    heap: Mutex<BinaryHeap<QueueEntry<T>>>,
    notify: Notify,
    next_sequence: AtomicU64,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        PriorityQueue {
            heap: Mutex::new(BinaryHeap::with_capacity(INITIAL_CAPACITY)),
            notify: Notify::new(),
            next_sequence: AtomicU64::new(0),
        }
    }

    pub fn push(&self, priority: i32, item: T) {
        let sequence = self.next_sequence.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap.lock().push(QueueEntry { priority, sequence, item });
        self.notify.notify_one();
    }

    /// Blocks up to `timeout` for an item, returning `None` if none arrives.
    pub async fn poll(&self, timeout: Duration) -> Option<T> {
        loop {
            if let Some(entry) = self.heap.lock().pop() {
                return Some(entry.item);
            }

            // Register for a notification before re-checking so a push that
            // races between the failed pop above and this wait isn't missed.
            let notified = self.notify.notified();
            tokio::select! {
                _ = notified => continue,
                _ = tokio::time::sleep(timeout) => return None,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn higher_priority_dispatched_first() {
        let queue: PriorityQueue<&'static str> = PriorityQueue::new();
        queue.push(1, "low");
        queue.push(10, "high");

        let first = queue.poll(Duration::from_millis(50)).await;
        assert_eq!(first, Some("high"));
        let second = queue.poll(Duration::from_millis(50)).await;
        assert_eq!(second, Some("low"));
    }

    #[tokio::test]
    async fn equal_priority_preserves_arrival_order() {
        let queue: PriorityQueue<u32> = PriorityQueue::new();
        for i in 0..5 {
            queue.push(5, i);
        }

        for expected in 0..5 {
            assert_eq!(queue.poll(Duration::from_millis(50)).await, Some(expected));
        }
    }

    #[tokio::test]
    async fn poll_times_out_when_empty() {
        let queue: PriorityQueue<u32> = PriorityQueue::new();
        let result = queue.poll(Duration::from_millis(20)).await;
        assert_eq!(result, None);
    }
}
