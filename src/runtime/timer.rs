//! Timer service
//!
//! Schedules task wakeups after a delay. Design:
//! - min-heap of entries sorted by deadline, creation order breaks ties
//! - each timer wakes exactly one task when it expires
//! - `now` is passed in by the caller, so tests drive virtual time
//! - cancellation marks the timer; stale heap entries are skipped lazily

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use super::task::TaskId;

/// Unique identifier for a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Timer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Pending,
    Cancelled,
}

#[derive(Debug)]
struct Timer {
    deadline: Instant,
    wake: TaskId,
    state: TimerState,
}

/// Entry in the timer heap (for ordering)
#[derive(Debug, PartialEq, Eq)]
struct TimerEntry {
    deadline: Instant,
    id: TimerId,
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap: earliest deadline first, then lowest
        // id so simultaneous deadlines fire in creation order
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.0.cmp(&self.id.0))
    }
}

/// Timer queue managing all pending timers of one runtime instance
#[derive(Debug)]
pub struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    timers: HashMap<TimerId, Timer>,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            timers: HashMap::new(),
            next_id: 1,
        }
    }

    /// Schedule a one-shot timer that wakes `wake` once `delay` has elapsed
    pub fn schedule(&mut self, delay: Duration, now: Instant, wake: TaskId) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let deadline = now + delay;
        self.heap.push(TimerEntry { deadline, id });
        self.timers.insert(
            id,
            Timer {
                deadline,
                wake,
                state: TimerState::Pending,
            },
        );

        id
    }

    /// Cancel a timer. Returns true if it was pending and is now cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.timers.get_mut(&id) {
            Some(timer) if timer.state == TimerState::Pending => {
                timer.state = TimerState::Cancelled;
                true
            }
            _ => false,
        }
    }

    /// Fire all timers due at `now`, returning the tasks to wake in firing
    /// order (deadline, then creation order)
    pub fn tick(&mut self, now: Instant) -> Vec<TaskId> {
        let mut tasks_to_wake = Vec::new();

        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let entry = self.heap.pop().expect("peeked entry must pop");

            if let Some(timer) = self.timers.remove(&entry.id)
                && timer.state == TimerState::Pending
            {
                tasks_to_wake.push(timer.wake);
            }
        }

        // Drop cancelled timers whose heap entries are still ahead of us
        self.timers.retain(|_, t| t.state == TimerState::Pending);

        tasks_to_wake
    }

    /// Earliest pending deadline, for idle parking. Pops stale heap entries
    /// left behind by cancellation.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(entry) = self.heap.peek() {
            match self.timers.get(&entry.id) {
                Some(timer) if timer.state == TimerState::Pending => {
                    return Some(timer.deadline);
                }
                _ => {
                    self.heap.pop();
                }
            }
        }
        None
    }

    /// Number of pending timers
    pub fn pending_count(&self) -> usize {
        self.timers
            .values()
            .filter(|t| t.state == TimerState::Pending)
            .count()
    }

    /// Check if a timer exists and is pending
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.timers
            .get(&id)
            .map(|t| t.state == TimerState::Pending)
            .unwrap_or(false)
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}
