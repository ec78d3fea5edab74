//! Observer: the sink side of a signal.
//!
//! An [`Observer`] owns a send function `Event<V, E> -> ()` and a terminal
//! latch. The send function is the single dispatch point — operators wrap
//! observers to filter, map, or gate events without the consumer noticing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::event::Event;

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

struct ObserverInner<V, E> {
    action: Box<dyn Fn(Event<V, E>) + Send + Sync>,
    /// Set once the observer has received a terminal event. Further sends
    /// are silent no-ops, never faults.
    terminated: AtomicBool,
}

/// A cheap, clonable event sink.
///
/// Clones share the same send function and terminal latch: once any clone
/// has received a terminal, all of them are spent.
pub struct Observer<V, E> {
    inner: Arc<ObserverInner<V, E>>,
}

impl<V, E> Clone for Observer<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, E> Observer<V, E> {
    /// Create an observer from a raw send function.
    pub fn new(action: impl Fn(Event<V, E>) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(ObserverInner {
                action: Box::new(action),
                terminated: AtomicBool::new(false),
            }),
        }
    }

    /// Create an observer from per-variant callbacks. Any callback may be a
    /// no-op closure; only the variants a consumer cares about need code.
    pub fn with_callbacks(
        value: impl Fn(V) + Send + Sync + 'static,
        failed: impl Fn(E) + Send + Sync + 'static,
        completed: impl Fn() + Send + Sync + 'static,
        interrupted: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self::new(move |event| match event {
            Event::Value(v) => value(v),
            Event::Failed(e) => failed(e),
            Event::Completed => completed(),
            Event::Interrupted => interrupted(),
        })
    }

    /// Deliver an event.
    ///
    /// After the first terminal event, this becomes a no-op: the latch flips
    /// exactly once, so concurrent terminal sends race to a single winner and
    /// the losers are dropped.
    pub fn send(&self, event: Event<V, E>) {
        if self.inner.terminated.load(Ordering::Acquire) {
            return;
        }
        if event.is_terminal() {
            // First CAS winner delivers the terminal; everyone else drops.
            if self
                .inner
                .terminated
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
        }
        (self.inner.action)(event);
    }

    /// Send a `Value` event.
    pub fn send_value(&self, value: V) {
        self.send(Event::Value(value));
    }

    /// Send a `Failed` terminal.
    pub fn send_failed(&self, error: E) {
        self.send(Event::Failed(error));
    }

    /// Send a `Completed` terminal.
    pub fn send_completed(&self) {
        self.send(Event::Completed);
    }

    /// Send an `Interrupted` terminal.
    pub fn send_interrupted(&self) {
        self.send(Event::Interrupted);
    }

    /// Whether a terminal event has already passed through.
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
