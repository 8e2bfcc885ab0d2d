//! Task thread pool configuration

use std::time::Duration;

/// Shortest a task thread will block on its queue.
///
/// Timers due sooner than this fire late by up to this much. Lowering it
/// buys timer precision at the cost of more wake-ups on idle threads.
pub const DEFAULT_MIN_WAIT: Duration = Duration::from_millis(10);

/// How long a task thread blocks when its timer heap is empty
pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_millis(10);

/// Prefix for task thread names; the thread index is appended
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "weft-task";

/// Configuration for a [`TaskThreadPool`](crate::TaskThreadPool)
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker threads started by `TaskThreadPool::start`
    pub threads: usize,

    /// Floor on every queue wait
    pub min_wait: Duration,

    /// Queue wait when no timer is pending (never below `min_wait`)
    pub idle_wait: Duration,

    /// Thread name prefix
    pub thread_name_prefix: String,

    /// Stack size for task threads (None = platform default)
    pub stack_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            min_wait: DEFAULT_MIN_WAIT,
            idle_wait: DEFAULT_IDLE_WAIT,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            stack_size: None,
        }
    }
}

impl SchedulerConfig {
    /// Set the number of worker threads
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set the minimum queue wait
    pub fn with_min_wait(mut self, min_wait: Duration) -> Self {
        self.min_wait = min_wait;
        self
    }

    /// Set the queue wait used when no timer is pending
    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    /// Set the thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the stack size of task threads
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Effective idle wait
    pub(crate) fn idle_wait(&self) -> Duration {
        self.idle_wait.max(self.min_wait)
    }
}
