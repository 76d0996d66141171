//! Shared blocking priority queue drained by every worker group.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Instant;

use crate::error::SchedulerError;
use crate::item::WorkItem;
use crate::sync::lock;

/// Concurrent priority-ordered store of pending [`WorkItem`]s.
///
/// Implementations must be linearizable: `take` always yields the eligible
/// item that sorts first by [`WorkItem::dequeue_order`] at that instant,
/// across every lane sharing the queue.
pub trait TaskQueue: Send + Sync {
    /// Insert an item. Never blocks. Fails once the queue is closed.
    fn offer(&self, item: Arc<WorkItem>) -> Result<(), SchedulerError>;

    /// Block until an eligible item is available and remove it.
    ///
    /// Returns `None` once the queue has been closed; workers treat that as
    /// their termination signal.
    fn take(&self) -> Option<Arc<WorkItem>>;

    /// Remove `item` by identity. Returns whether it was still queued.
    fn remove(&self, item: &WorkItem) -> bool;

    /// Number of queued items, delayed ones included.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject further offers, wake every blocked taker and hand back
    /// whatever was still queued.
    fn close(&self) -> Vec<Arc<WorkItem>>;

    fn is_closed(&self) -> bool;
}

/// Max-heap entry: the item that dequeues first compares greatest.
struct Ready(Arc<WorkItem>);

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.dequeue_order(&self.0)
    }
}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ready {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ready {}

/// Entry waiting for its ready time: earliest deadline compares greatest.
struct Delayed(Arc<WorkItem>);

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .ready_at()
            .cmp(&self.0.ready_at())
            .then_with(|| other.0.sequence().cmp(&self.0.sequence()))
    }
}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Delayed {}

#[derive(Default)]
struct QueueState {
    ready: BinaryHeap<Ready>,
    delayed: BinaryHeap<Delayed>,
    closed: bool,
}

impl QueueState {
    /// Move every delayed item whose ready time has passed into the ready heap.
    fn promote_due(&mut self, now: Instant) {
        while let Some(next) = self.delayed.peek() {
            if !next.0.is_ready(now) {
                break;
            }
            if let Some(Delayed(item)) = self.delayed.pop() {
                self.ready.push(Ready(item));
            }
        }
    }

    fn len(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }
}

/// Default [`TaskQueue`]: two binary heaps behind one mutex, with a condvar
/// for blocked takers.
///
/// Delayed items wait in a deadline-ordered heap and only join the priority
/// heap once due, so a delayed item never blocks an eligible one.
#[derive(Default)]
pub struct PriorityQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskQueue for PriorityQueue {
    fn offer(&self, item: Arc<WorkItem>) -> Result<(), SchedulerError> {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(SchedulerError::ShutDown);
            }
            if item.is_ready(Instant::now()) {
                state.ready.push(Ready(item));
            } else {
                state.delayed.push(Delayed(item));
            }
        }
        self.available.notify_one();
        Ok(())
    }

    fn take(&self) -> Option<Arc<WorkItem>> {
        let mut state = lock(&self.state);
        loop {
            if state.closed {
                return None;
            }
            let now = Instant::now();
            state.promote_due(now);

            if let Some(Ready(item)) = state.ready.pop() {
                // Another taker may be parked without a timeout.
                if state.len() > 0 {
                    self.available.notify_one();
                }
                return Some(item);
            }

            let next_deadline = state.delayed.peek().map(|d| d.0.ready_at());
            state = match next_deadline {
                Some(deadline) => {
                    self.available
                        .wait_timeout(state, deadline.saturating_duration_since(now))
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    fn remove(&self, item: &WorkItem) -> bool {
        let sequence = item.sequence();
        let mut state = lock(&self.state);
        let before = state.len();
        state.ready.retain(|e| e.0.sequence() != sequence);
        state.delayed.retain(|e| e.0.sequence() != sequence);
        state.len() != before
    }

    fn len(&self) -> usize {
        lock(&self.state).len()
    }

    fn close(&self) -> Vec<Arc<WorkItem>> {
        let drained = {
            let mut state = lock(&self.state);
            state.closed = true;
            let mut drained: Vec<Arc<WorkItem>> =
                state.ready.drain().map(|Ready(item)| item).collect();
            drained.extend(state.delayed.drain().map(|Delayed(item)| item));
            drained
        };
        self.available.notify_all();
        drained
    }

    fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::item::Sequencer;

    fn item(seq: &Sequencer, priority: i32) -> Arc<WorkItem> {
        Arc::new(WorkItem::new(Box::new(|| {}), priority, Duration::ZERO, seq))
    }

    fn delayed(seq: &Sequencer, priority: i32, delay: Duration) -> Arc<WorkItem> {
        Arc::new(WorkItem::new(Box::new(|| {}), priority, delay, seq))
    }

    fn drain_priorities(queue: &PriorityQueue, n: usize) -> Vec<i32> {
        (0..n).map(|_| queue.take().unwrap().priority()).collect()
    }

    #[test]
    fn take_returns_highest_priority_first() {
        let seq = Sequencer::new();
        let queue = PriorityQueue::new();
        for p in [5, 1, 9, 3] {
            queue.offer(item(&seq, p)).unwrap();
        }
        assert_eq!(drain_priorities(&queue, 4), vec![9, 5, 3, 1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn equal_priorities_come_out_fifo() {
        let seq = Sequencer::new();
        let queue = PriorityQueue::new();
        let items: Vec<_> = (0..20).map(|_| item(&seq, 7)).collect();
        for i in &items {
            queue.offer(Arc::clone(i)).unwrap();
        }
        let taken: Vec<u64> = (0..20).map(|_| queue.take().unwrap().sequence()).collect();
        let expected: Vec<u64> = items.iter().map(|i| i.sequence()).collect();
        assert_eq!(taken, expected);
    }

    #[test]
    fn remove_by_identity() {
        let seq = Sequencer::new();
        let queue = PriorityQueue::new();
        let a = item(&seq, 1);
        let b = item(&seq, 1);
        queue.offer(Arc::clone(&a)).unwrap();
        queue.offer(Arc::clone(&b)).unwrap();

        assert!(queue.remove(&a));
        assert!(!queue.remove(&a), "second remove must observe the item absent");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.take().unwrap().sequence(), b.sequence());
    }

    #[test]
    fn remove_loses_to_take() {
        let seq = Sequencer::new();
        let queue = PriorityQueue::new();
        let a = item(&seq, 1);
        queue.offer(Arc::clone(&a)).unwrap();
        let taken = queue.take().unwrap();
        assert_eq!(taken.sequence(), a.sequence());
        assert!(!queue.remove(&a));
    }

    #[test]
    fn remove_delayed_item() {
        let seq = Sequencer::new();
        let queue = PriorityQueue::new();
        let a = delayed(&seq, 1, Duration::from_secs(60));
        queue.offer(Arc::clone(&a)).unwrap();
        assert_eq!(queue.len(), 1);
        assert!(queue.remove(&a));
        assert!(queue.is_empty());
    }

    #[test]
    fn delayed_item_does_not_block_ready_one() {
        let seq = Sequencer::new();
        let queue = PriorityQueue::new();
        queue.offer(delayed(&seq, 100, Duration::from_millis(200))).unwrap();
        queue.offer(item(&seq, 1)).unwrap();

        let start = Instant::now();
        assert_eq!(queue.take().unwrap().priority(), 1);
        assert!(start.elapsed() < Duration::from_millis(200));

        assert_eq!(queue.take().unwrap().priority(), 100);
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn due_delayed_item_competes_on_priority() {
        let seq = Sequencer::new();
        let queue = PriorityQueue::new();
        queue.offer(delayed(&seq, 10, Duration::from_millis(20))).unwrap();
        queue.offer(item(&seq, 5)).unwrap();
        thread::sleep(Duration::from_millis(40));
        assert_eq!(drain_priorities(&queue, 2), vec![10, 5]);
    }

    #[test]
    fn take_blocks_until_offer() {
        let seq = Arc::new(Sequencer::new());
        let queue = Arc::new(PriorityQueue::new());
        let (tx, rx) = mpsc::channel();

        let taker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let got = queue.take().map(|i| i.priority());
                tx.send(got).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        queue.offer(item(&seq, 42)).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Some(42));
        taker.join().unwrap();
    }

    #[test]
    fn close_wakes_takers_and_drains() {
        let seq = Sequencer::new();
        let queue = Arc::new(PriorityQueue::new());
        let takers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.take().is_none())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        queue.offer(delayed(&seq, 1, Duration::from_secs(60))).unwrap();
        let drained = queue.close();

        assert_eq!(drained.len(), 1);
        for t in takers {
            assert!(t.join().unwrap(), "taker should observe the closed queue");
        }
        assert!(queue.is_closed());
        assert!(matches!(queue.offer(item(&seq, 1)), Err(SchedulerError::ShutDown)));
    }

    #[test]
    fn concurrent_takers_each_item_once() {
        let seq = Sequencer::new();
        let queue = Arc::new(PriorityQueue::new());
        for p in 0..400 {
            queue.offer(item(&seq, p % 13)).unwrap();
        }

        let takers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    (0..100)
                        .map(|_| queue.take().unwrap().sequence())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u64> = takers.into_iter().flat_map(|t| t.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 400);
    }
}
