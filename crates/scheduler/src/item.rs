//! Work items and their dequeue ordering.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::sync::lock;

/// Boxed unit of work accepted by the scheduler.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle of a submitted item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Queued (or dequeued but not yet claimed by a worker).
    Pending,
    /// A worker is running the action.
    Running,
    /// The action returned or panicked.
    Completed,
    /// Cancelled before it started; it will never run.
    Cancelled,
}

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const COMPLETED: u8 = 2;
const CANCELLED: u8 = 3;

impl TaskState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            PENDING => TaskState::Pending,
            RUNNING => TaskState::Running,
            COMPLETED => TaskState::Completed,
            _ => TaskState::Cancelled,
        }
    }
}

/// Monotonic submission counter, one per scheduler instance.
#[derive(Debug, Default)]
pub struct Sequencer(AtomicU64);

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, AtomicOrdering::Relaxed)
    }
}

fn deadline_after(now: Instant, delay: Duration) -> Instant {
    let mut delay = delay;
    loop {
        if let Some(at) = now.checked_add(delay) {
            return at;
        }
        delay /= 2;
    }
}

/// A deferred action annotated with priority, sequence and ready time.
pub struct WorkItem {
    priority: i32,
    sequence: u64,
    ready_at: Instant,
    state: AtomicU8,
    action: Mutex<Option<Action>>,
}

impl WorkItem {
    /// Wrap `action`, drawing a fresh sequence number from `sequencer`.
    /// The item becomes eligible `delay` from now. A delay past what
    /// [`Instant`] can represent is clamped to the furthest reachable deadline.
    pub fn new(action: Action, priority: i32, delay: Duration, sequencer: &Sequencer) -> Self {
        Self {
            priority,
            sequence: sequencer.next(),
            ready_at: deadline_after(Instant::now(), delay),
            state: AtomicU8::new(PENDING),
            action: Mutex::new(Some(action)),
        }
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Identity of the item within its scheduler.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn ready_at(&self) -> Instant {
        self.ready_at
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.ready_at <= now
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_raw(self.state.load(AtomicOrdering::Acquire))
    }

    /// `Ordering::Less` means `self` is dequeued before `other`.
    pub fn dequeue_order(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }

    /// Move `Pending -> Running` and hand out the action. Returns `None`
    /// if the item was cancelled (or already claimed).
    pub fn claim(&self) -> Option<Action> {
        self.state
            .compare_exchange(PENDING, RUNNING, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .ok()?;
        lock(&self.action).take()
    }

    /// Mark a claimed item as finished.
    pub fn complete(&self) {
        self.state.store(COMPLETED, AtomicOrdering::Release);
    }

    /// Move `Pending -> Cancelled`, dropping the action. Returns `true` if
    /// this call performed the transition.
    pub fn mark_cancelled(&self) -> bool {
        let won = self
            .state
            .compare_exchange(PENDING, CANCELLED, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_ok();
        if won {
            lock(&self.action).take();
        }
        won
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .field("ready_at", &self.ready_at)
            .field("state", &self.state())
            .finish()
    }
}
