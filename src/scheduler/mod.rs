//! Schedulers: serial execution surfaces.
//!
//! A [`Scheduler`] accepts units of work and runs them strictly serially.
//! [`DateScheduler`] adds a clock and delayed/repeating variants. Operators
//! that need time ([`debounce`](crate::signal::Signal::debounce),
//! [`throttle`](crate::signal::Signal::throttle), ...) read it exclusively
//! through [`DateScheduler::current_instant`] — the scheduler *is* the
//! injected clock, which is what lets the virtual-time
//! [`TestScheduler`](crate::testing::TestScheduler) drive them hermetically.
//!
//! Three canonical implementations: [`ImmediateScheduler`] (synchronous,
//! calling thread), [`QueueScheduler`] (named worker thread, FIFO, plus a
//! monotonic timer), and the test scheduler in [`crate::testing`].

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crate::disposable::Disposable;

pub mod immediate;
pub mod queue;

pub use immediate::ImmediateScheduler;
pub use queue::QueueScheduler;

/// A unit of work accepted by [`Scheduler::schedule`].
pub type Work = Box<dyn FnOnce() + Send>;

/// A repeating unit of work accepted by
/// [`DateScheduler::schedule_after_interval`].
pub type RepeatingWork = Box<dyn FnMut() + Send>;

// ---------------------------------------------------------------------------
// Scheduler traits
// ---------------------------------------------------------------------------

/// A serial execution surface.
///
/// All work handed to one scheduler instance runs in submission order, one
/// item at a time. `schedule` returns a cancellation disposable where the
/// implementation can still withdraw the work — a work item disposed before
/// it starts must not run; disposal during execution does not stop the
/// running body.
pub trait Scheduler: Send + Sync {
    /// Enqueue `work`. Returns `None` when the work cannot be withdrawn
    /// (e.g. it already ran synchronously).
    fn schedule(&self, work: Work) -> Option<Box<dyn Disposable>>;
}

/// A scheduler with a monotonic clock and delayed execution.
pub trait DateScheduler: Scheduler {
    /// The scheduler's notion of "now". Operators must use this rather than
    /// [`Instant::now`] so that virtual-time schedulers stay in control.
    fn current_instant(&self) -> Instant;

    /// Run `work` once at (or as soon as possible after) `instant`.
    fn schedule_after(&self, instant: Instant, work: Work) -> Option<Box<dyn Disposable>>;

    /// Run `work` at `instant` and then at every `interval` boundary after
    /// it. Boundaries are fixed at `instant + k * interval`: a late tick does
    /// not shift the cadence, and boundaries that have already passed are
    /// skipped rather than fired in a bunch. `leeway` is a coalescing hint;
    /// implementations may fire up to that much late.
    fn schedule_after_interval(
        &self,
        instant: Instant,
        interval: Duration,
        leeway: Duration,
        work: RepeatingWork,
    ) -> Option<Box<dyn Disposable>>;
}

// ---------------------------------------------------------------------------
// Standard instances
// ---------------------------------------------------------------------------

/// The process-wide "main" scheduler: a single named serial queue shared by
/// everything that asks for it. Created on first use.
pub fn main() -> Arc<QueueScheduler> {
    static MAIN: OnceLock<Arc<QueueScheduler>> = OnceLock::new();
    Arc::clone(MAIN.get_or_init(|| Arc::new(QueueScheduler::new("rill.main"))))
}

/// The shared immediate scheduler.
pub fn immediate() -> Arc<ImmediateScheduler> {
    static IMMEDIATE: OnceLock<Arc<ImmediateScheduler>> = OnceLock::new();
    Arc::clone(IMMEDIATE.get_or_init(|| Arc::new(ImmediateScheduler)))
}

/// A fresh serial queue scheduler with the given thread label.
pub fn queue(label: impl Into<String>) -> Arc<QueueScheduler> {
    Arc::new(QueueScheduler::new(label))
}
