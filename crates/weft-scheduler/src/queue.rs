//! Blocking FIFO feeding a task thread

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

enum Message<T> {
    Item(T),
    Wake,
}

/// Outcome of a bounded wait on a [`TaskQueue`]
#[derive(Debug)]
pub enum Dequeue<T> {
    /// An item was enqueued
    Item(T),
    /// Someone called [`TaskQueue::wake`]
    Woken,
    /// The wait elapsed without an item
    TimedOut,
}

/// Unbounded multi-producer queue with a timed blocking pop
pub struct TaskQueue<T> {
    tx: Sender<Message<T>>,
    rx: Receiver<Message<T>>,
}

impl<T> TaskQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    /// Push an item and wake the consumer if it is parked
    pub fn enqueue(&self, item: T) {
        // Both ends live in `self`, so the channel cannot be disconnected here.
        let _ = self.tx.send(Message::Item(item));
    }

    /// Block for at most `timeout` waiting for an item
    pub fn dequeue_blocking(&self, timeout: Duration) -> Dequeue<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(Message::Item(item)) => Dequeue::Item(item),
            Ok(Message::Wake) => Dequeue::Woken,
            Err(RecvTimeoutError::Timeout) => Dequeue::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Dequeue::Woken,
        }
    }

    /// Release a consumer blocked in `dequeue_blocking` without handing it an item
    pub fn wake(&self) {
        let _ = self.tx.send(Message::Wake);
    }

    /// Number of pending messages, wake-ups included
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
