//! Task thread pool
//!
//! Owns the task threads, the registry of live tasks and the global
//! reader/writer lock. Every run holds that lock shared unless the task asked
//! for it exclusively.

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::events::EventFlags;
use crate::task::{Task, TaskCell, TaskHandle, TaskId};
use crate::thread::{TaskThread, TaskThreadId, ThreadShared};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::mem;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// State reachable from handles and task threads
pub(crate) struct PoolShared {
    /// Per-thread queues, fixed once `add_threads` ran
    threads: OnceCell<Vec<Arc<ThreadShared>>>,

    /// Threads accepting work; zero before start and after shutdown
    num_threads: AtomicUsize,

    /// Round-robin cursor for unpinned tasks
    thread_picker: AtomicUsize,

    /// Lock shared by every run, exclusive on request
    global_lock: RwLock<()>,

    /// Every task the pool owns
    tasks: Mutex<FxHashMap<TaskId, Arc<TaskCell>>>,

    next_task_id: AtomicU64,
}

impl PoolShared {
    fn new() -> Self {
        Self {
            threads: OnceCell::new(),
            num_threads: AtomicUsize::new(0),
            thread_picker: AtomicUsize::new(0),
            global_lock: RwLock::new(()),
            tasks: Mutex::new(FxHashMap::default()),
            next_task_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn global_lock(&self) -> &RwLock<()> {
        &self.global_lock
    }

    /// Merge `events` into the task and enqueue it if it was idle
    pub(crate) fn signal(&self, cell: &Arc<TaskCell>, events: EventFlags) -> bool {
        if !cell.is_valid() {
            log::trace!("signal {:?} sent to invalid task {}", events, cell.id());
            return false;
        }

        let previous = cell.events.signal(events);
        if previous.contains(EventFlags::ALIVE) {
            return false;
        }

        let count = self.num_threads.load(Ordering::Acquire);
        let Some(threads) = self.threads.get().filter(|_| count > 0) else {
            return false;
        };

        let index = match cell.pinned() {
            Some(thread) if thread.index() < count => thread.index(),
            pinned => {
                if let Some(thread) = pinned {
                    log::warn!("task {} pinned to unknown {}", cell.id(), thread);
                }
                self.thread_picker.fetch_add(1, Ordering::Relaxed) % count
            }
        };

        log::trace!(
            "signal enqueues {} ({}) on thread-{}",
            cell.id(),
            cell.name(),
            index
        );
        threads[index].enqueue(cell.clone());
        true
    }

    pub(crate) fn unregister(&self, id: TaskId) -> Option<Arc<TaskCell>> {
        self.tasks.lock().remove(&id)
    }
}

/// Fixed-size pool of task threads
///
/// Threads are added once with [`add_threads`](Self::add_threads) (or
/// [`start`](Self::start)) and removed once with
/// [`remove_threads`](Self::remove_threads), which also runs on drop.
pub struct TaskThreadPool {
    shared: Arc<PoolShared>,
    threads: Mutex<Vec<TaskThread>>,
    config: SchedulerConfig,
}

impl TaskThreadPool {
    /// Create a pool with the default configuration. No threads run yet.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a pool with a custom configuration. No threads run yet.
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared::new()),
            threads: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Start `config.threads` task threads
    pub fn start(&self) -> SchedulerResult<()> {
        self.add_threads(self.config.threads)
    }

    /// Start `count` task threads. Only the first call can succeed.
    pub fn add_threads(&self, count: usize) -> SchedulerResult<()> {
        if count == 0 {
            return Err(SchedulerError::NoThreads);
        }

        let mut threads = self.threads.lock();
        let shared: Vec<Arc<ThreadShared>> = (0..count)
            .map(|index| Arc::new(ThreadShared::new(TaskThreadId::new(index))))
            .collect();
        self.shared
            .threads
            .set(shared.clone())
            .map_err(|_| SchedulerError::AlreadyStarted)?;

        for thread_shared in shared {
            let mut thread = TaskThread::new(thread_shared);
            if let Err(e) = thread.start(self.shared.clone(), &self.config) {
                Self::stop_threads(&mut threads);
                return Err(e);
            }
            threads.push(thread);
        }

        self.shared.num_threads.store(count, Ordering::Release);
        log::debug!("started {} task threads", count);
        Ok(())
    }

    /// Stop and join every task thread, then drop all remaining tasks.
    ///
    /// Signals are no-ops once this returns.
    pub fn remove_threads(&self) {
        let mut threads = self.threads.lock();
        self.shared.num_threads.store(0, Ordering::Release);
        let stopped = threads.len();
        Self::stop_threads(&mut threads);
        drop(threads);

        // Task bodies may hold handles into this pool; drop them unlocked.
        let orphans = mem::take(&mut *self.shared.tasks.lock());
        if stopped > 0 || !orphans.is_empty() {
            log::debug!(
                "stopped {} task threads, dropped {} task(s)",
                stopped,
                orphans.len()
            );
        }
        for cell in orphans.into_values() {
            cell.mark_dead();
            cell.events.retire();
            let body = cell.body.lock().take();
            drop(body);
        }
    }

    fn stop_threads(threads: &mut Vec<TaskThread>) {
        for thread in threads.iter() {
            thread.shared().request_stop();
        }
        // Any of them may be parked on an empty queue.
        for thread in threads.iter() {
            thread.shared().queue.wake();
        }
        for mut thread in threads.drain(..) {
            thread.join();
        }
    }

    /// Hand `task` to the pool. It runs once something signals the handle.
    pub fn spawn<T: Task>(&self, name: &str, task: T) -> TaskHandle {
        let id = TaskId::from_u64(self.shared.next_task_id.fetch_add(1, Ordering::Relaxed));
        let cell = Arc::new(TaskCell::new(id, name, Box::new(task)));
        let handle = TaskHandle::new(&cell, &self.shared);
        self.shared.tasks.lock().insert(id, cell);
        handle
    }

    /// Threads currently accepting work
    pub fn num_threads(&self) -> usize {
        self.shared.num_threads.load(Ordering::Acquire)
    }

    /// IDs of the threads accepting work
    pub fn thread_ids(&self) -> Vec<TaskThreadId> {
        (0..self.num_threads()).map(TaskThreadId::new).collect()
    }

    /// Tasks the pool currently owns
    pub fn task_count(&self) -> usize {
        self.shared.tasks.lock().len()
    }

    /// Lock every task run holds; take it to exclude tasks from shared state
    pub fn global_lock(&self) -> &RwLock<()> {
        self.shared.global_lock()
    }

    /// Pool configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

impl Default for TaskThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskThreadPool {
    fn drop(&mut self) {
        self.remove_threads();
    }
}
