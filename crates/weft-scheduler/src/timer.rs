//! Per-thread timer heap
//!
//! Each task thread owns one of these. Tasks that return `Reschedule::After`
//! are parked here until their due time, then handed back to the thread's
//! dispatch loop ahead of anything in the queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Longest delay a timer can be parked for (about 136 years)
pub const MAX_TIMER_DELAY: Duration = Duration::from_secs(u32::MAX as u64);

/// Due time `delay` after `now`, with `delay` clamped to [`MAX_TIMER_DELAY`]
pub fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(MAX_TIMER_DELAY))
        .or_else(|| now.checked_add(Duration::from_secs(u16::MAX as u64)))
        .unwrap_or(now)
}

/// Entry in the timer heap
struct TimerEntry<T> {
    /// When the item becomes due
    due: Instant,
    /// Insertion order, breaks ties between equal due times
    seq: u64,
    item: T,
}

// Reverse ordering for min-heap (earliest due time first)
impl<T> Ord for TimerEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for TimerEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for TimerEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<T> Eq for TimerEntry<T> {}

/// Min-heap of items keyed by due time
pub struct TimerHeap<T> {
    entries: BinaryHeap<TimerEntry<T>>,
    next_seq: u64,
}

impl<T> TimerHeap<T> {
    /// Create an empty heap
    pub fn new() -> Self {
        Self {
            entries: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Park `item` until `due`
    pub fn insert(&mut self, due: Instant, item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(TimerEntry { due, seq, item });
    }

    /// Due time of the earliest entry
    pub fn peek_due(&self) -> Option<Instant> {
        self.entries.peek().map(|entry| entry.due)
    }

    /// Remove and return the earliest entry if it is due at `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<T> {
        match self.entries.peek() {
            Some(entry) if entry.due <= now => self.entries.pop().map(|entry| entry.item),
            _ => None,
        }
    }

    /// Whether any parked item matches `pred`. Linear scan, diagnostics only.
    pub fn any(&self, pred: impl Fn(&T) -> bool) -> bool {
        self.entries.iter().any(|entry| pred(&entry.item))
    }

    /// Number of parked items
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is parked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for TimerHeap<T> {
    fn default() -> Self {
        Self::new()
    }
}
