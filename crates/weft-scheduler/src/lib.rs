//! Weft task scheduler
//!
//! A small fixed pool of OS threads multiplexing many event-driven tasks:
//! - Signals coalesce: a task is enqueued once per idle→active transition,
//!   however many producers signal it meanwhile
//! - Each thread has its own queue and its own timer heap
//! - Runs hold a pool-wide reader/writer lock, shared by default and
//!   exclusive on request
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_scheduler::{from_fn, EventFlags, Reschedule, TaskThreadPool};
//!
//! let pool = TaskThreadPool::new();
//! pool.add_threads(4)?;
//!
//! let handle = pool.spawn("session", from_fn(|cx| {
//!     let events = cx.events();
//!     if events.contains(EventFlags::KILL) {
//!         return Reschedule::Kill;
//!     }
//!     Reschedule::Idle
//! }));
//! handle.signal(EventFlags::START);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod queue;
pub mod timer;

mod pool;
mod task;
mod thread;

pub use config::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult};
pub use events::{EventFlags, EventMask};
pub use pool::TaskThreadPool;
pub use task::{
    from_fn, FnTask, Reschedule, RunContext, Task, TaskHandle, TaskId, TaskName,
    CALL_LOCKED_DELAY, LIVE_MARKER, MAX_NAME_LEN,
};
pub use thread::TaskThreadId;
