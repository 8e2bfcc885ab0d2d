//! Event flags and the atomic mask that coalesces them
//!
//! Producers OR bits into a task's mask from any thread. The `ALIVE` bit
//! records whether the task is already scheduled, so only the producer that
//! flips it from clear to set enqueues the task. Everyone else just adds bits.

use bitflags::bitflags;
use std::sync::atomic::{AtomicU32, Ordering};

bitflags! {
    /// Wake reasons for a task.
    ///
    /// Bits without a name here belong to the producer and are carried through
    /// to `RunContext::events` unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventFlags: u32 {
        /// Ask the task to shut itself down
        const KILL = 1 << 0;
        /// Set by the dispatch loop when the task is parked in a timer heap
        const IDLE = 1 << 1;
        /// First signal after creation
        const START = 1 << 2;
        /// A timeout owned by the task fired
        const TIMEOUT = 1 << 3;
        /// Data is ready to read
        const READ = 1 << 4;
        /// Writing may proceed
        const WRITE = 1 << 5;
        /// Producer-side state changed
        const UPDATE = 1 << 6;
        /// Scheduled or running. Never reported by `take`.
        const ALIVE = 1 << 31;

        const _ = !0;
    }
}

/// Atomic event mask of a single task
#[derive(Debug)]
pub struct EventMask(AtomicU32);

impl EventMask {
    /// Create an idle, empty mask
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Merge `events | ALIVE` into the mask, returning the previous value.
    ///
    /// The caller owns the enqueue iff the returned flags lack `ALIVE`.
    pub fn signal(&self, events: EventFlags) -> EventFlags {
        let bits = (events | EventFlags::ALIVE).bits();
        EventFlags::from_bits_retain(self.0.fetch_or(bits, Ordering::AcqRel))
    }

    /// Clear and return every pending bit except `ALIVE`.
    pub fn take(&self) -> EventFlags {
        let previous = self.0.fetch_and(EventFlags::ALIVE.bits(), Ordering::AcqRel);
        EventFlags::from_bits_retain(previous) - EventFlags::ALIVE
    }

    /// Try to go from "only `ALIVE`" to fully idle.
    ///
    /// Fails when a signal slipped in after the last `take`, in which case
    /// the task has to run again.
    pub fn try_idle(&self) -> bool {
        self.0
            .compare_exchange(
                EventFlags::ALIVE.bits(),
                0,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Mark the task as parked on a timer.
    pub fn mark_timer(&self) {
        self.0.fetch_or(EventFlags::IDLE.bits(), Ordering::AcqRel);
    }

    /// Drop all pending bits of a destroyed task, returning them.
    ///
    /// `ALIVE` stays set so a signal racing with destruction never enqueues.
    pub fn retire(&self) -> EventFlags {
        let previous = self.0.swap(EventFlags::ALIVE.bits(), Ordering::AcqRel);
        EventFlags::from_bits_retain(previous) - EventFlags::ALIVE
    }

    /// Snapshot of the mask, `ALIVE` included
    pub fn load(&self) -> EventFlags {
        EventFlags::from_bits_retain(self.0.load(Ordering::Acquire))
    }
}

impl Default for EventMask {
    fn default() -> Self {
        Self::new()
    }
}
