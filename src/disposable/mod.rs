//! Disposables: idempotent cancellation and teardown tokens.
//!
//! A [`Disposable`] is the unit of cancellation for the whole runtime:
//! subscriptions, scheduled work, producer starts, and property bindings all
//! hand one back. Disposal is idempotent and safe under concurrent callers;
//! contention resolves by compare-and-swap on the state flag.
//!
//! Variants: [`AnyDisposable`] runs an action once; [`CompositeDisposable`]
//! owns a set of children; [`SerialDisposable`] owns at most one inner,
//! replacing disposes; [`ScopedDisposable`] disposes on scope exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

pub mod composite;
pub mod scoped;
pub mod serial;

pub use composite::{CompositeDisposable, CompositeHandle};
pub use scoped::ScopedDisposable;
pub use serial::SerialDisposable;

// ---------------------------------------------------------------------------
// Disposable
// ---------------------------------------------------------------------------

/// A cancellation token.
///
/// `is_disposed` is monotonic: once true it stays true. `dispose` may be
/// called from any thread, any number of times; only the first call has an
/// effect.
pub trait Disposable: Send + Sync {
    /// Cancel the resource this token guards. Idempotent.
    fn dispose(&self);

    /// Whether `dispose` has run.
    fn is_disposed(&self) -> bool;
}

impl<T: Disposable + ?Sized> Disposable for Box<T> {
    fn dispose(&self) {
        (**self).dispose();
    }

    fn is_disposed(&self) -> bool {
        (**self).is_disposed()
    }
}

impl<T: Disposable + ?Sized> Disposable for Arc<T> {
    fn dispose(&self) {
        (**self).dispose();
    }

    fn is_disposed(&self) -> bool {
        (**self).is_disposed()
    }
}

// ---------------------------------------------------------------------------
// AnyDisposable
// ---------------------------------------------------------------------------

struct AnyState {
    disposed: AtomicBool,
    /// Taken (and run) by the first successful dispose.
    action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// A disposable that runs a one-shot action the first time it is disposed.
///
/// Clones share state: disposing any clone disposes them all.
#[derive(Clone)]
pub struct AnyDisposable {
    state: Arc<AnyState>,
}

impl AnyDisposable {
    /// Wrap a teardown action.
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            state: Arc::new(AnyState {
                disposed: AtomicBool::new(false),
                action: Mutex::new(Some(Box::new(action))),
            }),
        }
    }

    /// A disposable with no action; useful as a pure "has this been
    /// cancelled" flag.
    pub fn noop() -> Self {
        Self {
            state: Arc::new(AnyState {
                disposed: AtomicBool::new(false),
                action: Mutex::new(None),
            }),
        }
    }
}

impl Disposable for AnyDisposable {
    fn dispose(&self) {
        if self
            .state
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        // Take the action out before running it so the lock is not held
        // across user code.
        let action = self.state.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::Acquire)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
