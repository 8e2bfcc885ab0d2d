//! Task threads and their dispatch loop
//!
//! Each thread waits on its own queue, bounded by the earliest timer in its
//! own heap, runs whatever it gets under the global lock, and then files the
//! task according to the returned [`Reschedule`].

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::events::EventFlags;
use crate::pool::PoolShared;
use crate::queue::{Dequeue, TaskQueue};
use crate::task::{GlobalGuard, Reschedule, RunContext, TaskCell};
use crate::timer::{self, TimerHeap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Index of a task thread within its pool
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskThreadId(usize);

impl TaskThreadId {
    pub(crate) fn new(index: usize) -> Self {
        TaskThreadId(index)
    }

    /// Position in the pool's thread array
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread-{}", self.0)
    }
}

/// State shared between a task thread and everyone who signals it
pub(crate) struct ThreadShared {
    id: TaskThreadId,
    pub(crate) queue: TaskQueue<Arc<TaskCell>>,
    stop: AtomicBool,
}

impl ThreadShared {
    pub(crate) fn new(id: TaskThreadId) -> Self {
        Self {
            id,
            queue: TaskQueue::new(),
            stop: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> TaskThreadId {
        self.id
    }

    pub(crate) fn enqueue(&self, task: Arc<TaskCell>) {
        task.queued.store(true, Ordering::Release);
        self.queue.enqueue(task);
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// Owner of one OS thread running the dispatch loop
pub(crate) struct TaskThread {
    shared: Arc<ThreadShared>,
    handle: Option<JoinHandle<()>>,
}

impl TaskThread {
    pub(crate) fn new(shared: Arc<ThreadShared>) -> Self {
        Self {
            shared,
            handle: None,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<ThreadShared> {
        &self.shared
    }

    /// Start the OS thread
    pub(crate) fn start(
        &mut self,
        pool: Arc<PoolShared>,
        config: &SchedulerConfig,
    ) -> SchedulerResult<()> {
        let index = self.shared.id().index();
        let mut builder =
            thread::Builder::new().name(format!("{}-{}", config.thread_name_prefix, index));
        if let Some(bytes) = config.stack_size {
            builder = builder.stack_size(bytes);
        }

        let dispatcher = Dispatcher {
            shared: self.shared.clone(),
            pool,
            timers: TimerHeap::new(),
            min_wait: config.min_wait,
            idle_wait: config.idle_wait(),
        };
        let handle = builder
            .spawn(move || dispatcher.run_loop())
            .map_err(|source| SchedulerError::Spawn { index, source })?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Wait for the thread to exit. The caller has already requested a stop.
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("task {} terminated by a panic", self.shared.id());
            }
        }
    }
}

/// Thread-local half of a task thread
struct Dispatcher {
    shared: Arc<ThreadShared>,
    pool: Arc<PoolShared>,
    timers: TimerHeap<Arc<TaskCell>>,
    min_wait: Duration,
    idle_wait: Duration,
}

impl Dispatcher {
    fn run_loop(mut self) {
        log::debug!("task {} started", self.shared.id());

        while let Some(task) = self.wait_for_task() {
            if !task.is_valid() {
                log::warn!(
                    "task {} dequeued invalid task {} ({})",
                    self.shared.id(),
                    task.id(),
                    task.name()
                );
                continue;
            }

            let mut done = false;
            while !done {
                done = match self.run_task(&task) {
                    Reschedule::Kill => {
                        self.destroy(&task);
                        true
                    }
                    Reschedule::Idle => {
                        // A signal that raced with the return keeps ALIVE plus
                        // its bits set, so the exchange fails and we go again.
                        task.events.try_idle()
                    }
                    Reschedule::After(delay) => {
                        log::trace!(
                            "task {} parks {} ({}) for {:?}",
                            self.shared.id(),
                            task.id(),
                            task.name(),
                            delay
                        );
                        let due = timer::deadline_after(Instant::now(), delay);
                        self.timers.insert(due, task.clone());
                        task.events.mark_timer();
                        true
                    }
                };

                thread::yield_now();
            }
        }

        log::debug!(
            "task {} shutting down with {} parked timer(s)",
            self.shared.id(),
            self.timers.len()
        );
    }

    /// Next task to run, or None once a stop has been requested
    fn wait_for_task(&mut self) -> Option<Arc<TaskCell>> {
        loop {
            let now = Instant::now();
            if let Some(task) = self.timers.pop_due(now) {
                log::trace!(
                    "task {} found due timer for {} ({})",
                    self.shared.id(),
                    task.id(),
                    task.name()
                );
                return Some(task);
            }

            let wait = match self.timers.peek_due() {
                Some(due) => due.saturating_duration_since(now),
                None => self.idle_wait,
            }
            .max(self.min_wait);

            match self.shared.queue.dequeue_blocking(wait) {
                Dequeue::Item(task) => {
                    task.queued.store(false, Ordering::Release);
                    log::trace!(
                        "task {} dequeued {} ({}), {} still queued",
                        self.shared.id(),
                        task.id(),
                        task.name(),
                        self.shared.queue.len()
                    );
                    return Some(task);
                }
                Dequeue::Woken | Dequeue::TimedOut => {}
            }

            if self.shared.stop_requested() {
                return None;
            }
        }
    }

    /// One call to `Task::run` under the global lock
    fn run_task(&self, task: &Arc<TaskCell>) -> Reschedule {
        let runners = task.in_run.fetch_add(1, Ordering::AcqRel);
        debug_assert_eq!(runners, 0, "task {} is already running", task.id());

        // Each run has to ask for a specific thread again.
        task.clear_pinned();

        let exclusive = task.take_write_lock();
        let guard = GlobalGuard::acquire(self.pool.global_lock(), exclusive);
        let mut cx = RunContext::new(task, &self.pool, self.shared.id(), guard);
        log::trace!(
            "task {} runs {} ({}){}",
            self.shared.id(),
            task.id(),
            task.name(),
            if exclusive { " globally locked" } else { "" }
        );

        let outcome = {
            let mut body = task.body.lock();
            match body.as_mut() {
                Some(body) => panic::catch_unwind(AssertUnwindSafe(|| body.run(&mut cx))),
                None => Ok(Reschedule::Kill),
            }
        };
        drop(cx);
        task.in_run.fetch_sub(1, Ordering::AcqRel);

        match outcome {
            Ok(next) => next.normalized(),
            Err(_) => {
                log::error!(
                    "task {} ({}) panicked in run; destroying it",
                    task.id(),
                    task.name()
                );
                Reschedule::Kill
            }
        }
    }

    /// Tear down a task that asked to die
    fn destroy(&self, task: &Arc<TaskCell>) {
        log::trace!(
            "task {} deletes {} ({})",
            self.shared.id(),
            task.id(),
            task.name()
        );
        task.clear_pinned();

        if cfg!(debug_assertions) {
            if self.timers.any(|parked| Arc::ptr_eq(parked, task)) {
                log::warn!("task {} still in timer heap before delete", task.id());
            }
            if task.queued.load(Ordering::Acquire) {
                log::warn!("task {} still in queue before delete", task.id());
            }
        }

        let leftover = task.events.retire();
        if cfg!(debug_assertions) && !(leftover - EventFlags::IDLE).is_empty() {
            log::warn!(
                "task {} flags {:?} still set before delete",
                task.id(),
                leftover
            );
        }

        task.mark_dead();
        self.pool.unregister(task.id());
        let body = task.body.lock().take();
        drop(body);
    }
}
