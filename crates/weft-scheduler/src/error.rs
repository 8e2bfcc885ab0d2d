//! Scheduler errors

use std::io;

/// Errors raised while managing task threads
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// `add_threads` may only succeed once per pool
    #[error("Task threads have already been added to this pool")]
    AlreadyStarted,

    /// A pool without threads can never run a task
    #[error("A task thread pool needs at least one thread")]
    NoThreads,

    /// The OS refused to start a task thread
    #[error("Failed to spawn task thread {index}")]
    Spawn {
        /// Index of the thread that failed to start
        index: usize,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
