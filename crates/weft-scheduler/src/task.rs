//! Tasks, handles to them, and the context a task runs in
//!
//! A task is any `Task` implementation registered with a
//! [`TaskThreadPool`](crate::TaskThreadPool). From then on the pool owns it:
//! outside code only sees a [`TaskHandle`], which stops working as soon as
//! the scheduler destroys the task.

use crate::events::{EventFlags, EventMask};
use crate::pool::PoolShared;
use crate::thread::TaskThreadId;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Prefix carried by the name of every live task
pub const LIVE_MARKER: &str = "live_";

/// Longest task name in bytes, marker included
pub const MAX_NAME_LEN: usize = 47;

/// Delay returned by [`RunContext::call_locked`]
pub const CALL_LOCKED_DELAY: Duration = Duration::from_millis(10);

const NO_THREAD: usize = usize::MAX;

/// Unique identifier for a Task within its pool
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn from_u64(id: u64) -> Self {
        TaskId(id)
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bounded task name starting with [`LIVE_MARKER`] while the task lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskName(String);

impl TaskName {
    /// Build a live name, truncating `label` to fit [`MAX_NAME_LEN`]
    pub fn new(label: &str) -> Self {
        let mut name = String::with_capacity(MAX_NAME_LEN);
        name.push_str(LIVE_MARKER);
        for ch in label.chars() {
            if name.len() + ch.len_utf8() > MAX_NAME_LEN {
                break;
            }
            name.push(ch);
        }
        Self(name)
    }

    /// Full name, marker included
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name without the liveness marker
    pub fn label(&self) -> &str {
        self.0.get(LIVE_MARKER.len()..).unwrap_or("")
    }

    /// Whether the name still carries the liveness marker
    pub fn is_live(&self) -> bool {
        self.0.starts_with(LIVE_MARKER)
    }

    fn mark_dead(&mut self) {
        if !self.0.is_empty() {
            self.0.replace_range(..1, "D");
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the dispatch loop should do after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reschedule {
    /// Destroy the task
    Kill,
    /// Sleep until the next signal
    Idle,
    /// Run again once this much time has passed
    After(Duration),
}

impl Reschedule {
    /// Map the signed millisecond convention: negative kills, zero idles,
    /// positive sleeps.
    pub fn from_millis(millis: i64) -> Self {
        if millis < 0 {
            Reschedule::Kill
        } else if millis == 0 {
            Reschedule::Idle
        } else {
            Reschedule::After(Duration::from_millis(millis as u64))
        }
    }

    /// Inverse of [`Reschedule::from_millis`]
    pub fn as_millis(self) -> i64 {
        match self {
            Reschedule::Kill => -1,
            Reschedule::Idle => 0,
            Reschedule::After(delay) => i64::try_from(delay.as_millis())
                .unwrap_or(i64::MAX)
                .max(1),
        }
    }

    /// A zero delay means "idle", not "sleep for nothing"
    pub(crate) fn normalized(self) -> Self {
        match self {
            Reschedule::After(delay) if delay.is_zero() => Reschedule::Idle,
            other => other,
        }
    }
}

/// Event-driven unit of work
///
/// `run` is called on some task thread each time the task is dispatched. It
/// should drain its wake reasons with [`RunContext::events`]; a task that
/// returns [`Reschedule::Idle`] with events still pending is run again right
/// away.
pub trait Task: Send + 'static {
    /// Do one slice of work
    fn run(&mut self, cx: &mut RunContext<'_>) -> Reschedule;
}

impl<T: Task + ?Sized> Task for Box<T> {
    fn run(&mut self, cx: &mut RunContext<'_>) -> Reschedule {
        (**self).run(cx)
    }
}

/// Task backed by a closure. See [`from_fn`].
pub struct FnTask<F>(F);

/// Create a task from a closure
pub fn from_fn<F>(f: F) -> FnTask<F>
where
    F: FnMut(&mut RunContext<'_>) -> Reschedule + Send + 'static,
{
    FnTask(f)
}

impl<F> Task for FnTask<F>
where
    F: FnMut(&mut RunContext<'_>) -> Reschedule + Send + 'static,
{
    fn run(&mut self, cx: &mut RunContext<'_>) -> Reschedule {
        (self.0)(cx)
    }
}

/// Scheduler-side state of a task
pub(crate) struct TaskCell {
    id: TaskId,
    name: RwLock<TaskName>,
    pub(crate) events: EventMask,
    /// Thread the next enqueue must target (`NO_THREAD` = round-robin)
    pinned: AtomicUsize,
    /// Take the global lock exclusively for the next run
    write_lock: AtomicBool,
    /// Sitting in some thread's queue
    pub(crate) queued: AtomicBool,
    /// Runs in flight, must never exceed one
    pub(crate) in_run: AtomicUsize,
    pub(crate) body: Mutex<Option<Box<dyn Task>>>,
}

impl TaskCell {
    pub(crate) fn new(id: TaskId, name: &str, body: Box<dyn Task>) -> Self {
        Self {
            id,
            name: RwLock::new(TaskName::new(name)),
            events: EventMask::new(),
            pinned: AtomicUsize::new(NO_THREAD),
            write_lock: AtomicBool::new(false),
            queued: AtomicBool::new(false),
            in_run: AtomicUsize::new(0),
            body: Mutex::new(Some(body)),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn name(&self) -> String {
        self.name.read().as_str().to_string()
    }

    pub(crate) fn set_name(&self, label: &str) {
        *self.name.write() = TaskName::new(label);
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.name.read().is_live()
    }

    pub(crate) fn mark_dead(&self) {
        self.name.write().mark_dead();
    }

    pub(crate) fn pinned(&self) -> Option<TaskThreadId> {
        match self.pinned.load(Ordering::Acquire) {
            NO_THREAD => None,
            index => Some(TaskThreadId::new(index)),
        }
    }

    pub(crate) fn pin(&self, thread: TaskThreadId) {
        self.pinned.store(thread.index(), Ordering::Release);
    }

    pub(crate) fn clear_pinned(&self) {
        self.pinned.store(NO_THREAD, Ordering::Release);
    }

    pub(crate) fn request_write_lock(&self) {
        self.write_lock.store(true, Ordering::Release);
    }

    /// Consume a pending write-lock request
    pub(crate) fn take_write_lock(&self) -> bool {
        self.write_lock.swap(false, Ordering::AcqRel)
    }
}

/// Handle to a task owned by a pool
///
/// Cloning is cheap. Once the task has been destroyed every operation on the
/// handle is a no-op.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    cell: Weak<TaskCell>,
    pool: Weak<PoolShared>,
}

impl TaskHandle {
    pub(crate) fn new(cell: &Arc<TaskCell>, pool: &Arc<PoolShared>) -> Self {
        Self {
            id: cell.id(),
            cell: Arc::downgrade(cell),
            pool: Arc::downgrade(pool),
        }
    }

    /// ID of the task
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Wake the task with `events`.
    ///
    /// Returns true if this call scheduled the task. False means the task was
    /// already scheduled (the bits were merged into its pending set), the
    /// pool has no threads, or the task no longer exists.
    pub fn signal(&self, events: EventFlags) -> bool {
        match (self.cell.upgrade(), self.pool.upgrade()) {
            (Some(cell), Some(pool)) => pool.signal(&cell, events),
            _ => {
                log::trace!("signal {:?} sent to destroyed task {}", events, self.id);
                false
            }
        }
    }

    /// Whether the task still exists
    pub fn is_valid(&self) -> bool {
        self.cell.upgrade().is_some_and(|cell| cell.is_valid())
    }

    /// Current name, marker included
    pub fn name(&self) -> Option<String> {
        self.cell.upgrade().map(|cell| cell.name())
    }

    /// Run the task under the exclusive global lock next time it is dispatched
    pub fn request_write_lock(&self) {
        if let Some(cell) = self.cell.upgrade() {
            cell.request_write_lock();
        }
    }

    /// Route the next scheduling signal to `thread`
    pub fn use_thread(&self, thread: TaskThreadId) {
        if let Some(cell) = self.cell.upgrade() {
            cell.pin(thread);
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.pool, &other.pool)
    }
}

impl Eq for TaskHandle {}

/// Hold on the global reader/writer lock for the duration of a run
pub(crate) enum GlobalGuard<'a> {
    Shared(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    Exclusive(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
    Released,
}

impl<'a> GlobalGuard<'a> {
    pub(crate) fn acquire(lock: &'a RwLock<()>, exclusive: bool) -> Self {
        if exclusive {
            GlobalGuard::Exclusive(lock.write())
        } else {
            GlobalGuard::Shared(lock.read())
        }
    }
}

/// Everything a task can reach while it runs
pub struct RunContext<'a> {
    cell: &'a Arc<TaskCell>,
    pool: &'a Arc<PoolShared>,
    thread: TaskThreadId,
    guard: GlobalGuard<'a>,
    now: Instant,
}

impl<'a> RunContext<'a> {
    pub(crate) fn new(
        cell: &'a Arc<TaskCell>,
        pool: &'a Arc<PoolShared>,
        thread: TaskThreadId,
        guard: GlobalGuard<'a>,
    ) -> Self {
        Self {
            cell,
            pool,
            thread,
            guard,
            now: Instant::now(),
        }
    }

    /// Take every event delivered since the last call
    pub fn events(&self) -> EventFlags {
        self.cell.events.take()
    }

    /// ID of the running task
    pub fn id(&self) -> TaskId {
        self.cell.id()
    }

    /// Handle to the running task, e.g. for registering with a producer
    pub fn handle(&self) -> TaskHandle {
        TaskHandle::new(self.cell, self.pool)
    }

    /// Thread executing this run
    pub fn thread(&self) -> TaskThreadId {
        self.thread
    }

    /// When the dispatch loop started this run
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Current name, marker included
    pub fn name(&self) -> String {
        self.cell.name()
    }

    /// Rename the task. The liveness marker is re-applied.
    pub fn set_name(&self, label: &str) {
        self.cell.set_name(label);
    }

    /// Route the next scheduling signal to `thread`
    pub fn use_this_thread(&self, thread: TaskThreadId) {
        self.cell.pin(thread);
    }

    /// Route the next scheduling signal to the thread running this call
    pub fn force_same_thread(&self) {
        self.cell.pin(self.thread);
    }

    /// Take the global lock exclusively on the next run
    pub fn request_write_lock(&self) {
        self.cell.request_write_lock();
    }

    /// Come back shortly on this thread holding the exclusive global lock.
    ///
    /// Return the result from `run`.
    pub fn call_locked(&self) -> Reschedule {
        self.force_same_thread();
        self.request_write_lock();
        Reschedule::After(CALL_LOCKED_DELAY)
    }

    /// Whether this run holds the global lock exclusively
    pub fn holds_write_lock(&self) -> bool {
        matches!(self.guard, GlobalGuard::Exclusive(_))
    }

    /// Drop exclusive access before the run ends
    pub fn global_unlock(&mut self) {
        if self.holds_write_lock() {
            self.guard = GlobalGuard::Released;
        }
    }
}
