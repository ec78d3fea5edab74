//! Lifetime: an observable scope.
//!
//! A [`Lifetime`] is the `ended` signal of some scope; its [`LifetimeToken`]
//! ends the scope when dropped. Objects hand out their lifetime so that
//! observations and bindings can be torn down exactly when the object goes
//! away — see [`take_during`](crate::signal::Signal::take_during) and
//! property binding.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::disposable::{AnyDisposable, CompositeDisposable, Disposable};
use crate::event::{Event, Never};
use crate::observer::Observer;
use crate::signal::{Signal, SubscriptionDisposable};

// ---------------------------------------------------------------------------
// Lifetime
// ---------------------------------------------------------------------------

/// An observable scope: ends exactly once, observable as a signal.
///
/// Clones observe the same scope.
#[derive(Clone)]
pub struct Lifetime {
    ended: Signal<(), Never>,
}

impl Lifetime {
    /// Create a scope and the token that ends it.
    ///
    /// Dropping the token sends `Completed` on [`Lifetime::ended`].
    pub fn make() -> (Lifetime, LifetimeToken) {
        let (ended, input, _interrupter) = Signal::pipe();
        (Lifetime { ended }, LifetimeToken { input })
    }

    /// A scope that has already ended.
    pub fn empty() -> Lifetime {
        let (lifetime, token) = Lifetime::make();
        drop(token);
        lifetime
    }

    /// A scope that ends when `composite` is disposed.
    pub fn ending_with(composite: &CompositeDisposable) -> Lifetime {
        let (lifetime, token) = Lifetime::make();
        let token = Mutex::new(Some(token));
        composite.add(AnyDisposable::new(move || {
            token.lock().take();
        }));
        lifetime
    }

    /// A scope that ends as soon as either constituent ends.
    pub fn either(a: &Lifetime, b: &Lifetime) -> Lifetime {
        let (lifetime, token) = Lifetime::make();
        let slot = Arc::new(Mutex::new(Some(token)));
        let slot_a = Arc::clone(&slot);
        a.observe_ended(move || {
            slot_a.lock().take();
        });
        b.observe_ended(move || {
            slot.lock().take();
        });
        lifetime
    }

    /// A scope that ends only once both constituents have ended.
    pub fn both(a: &Lifetime, b: &Lifetime) -> Lifetime {
        let (lifetime, token) = Lifetime::make();
        let slot = Arc::new(Mutex::new(Some(token)));
        let remaining = Arc::new(AtomicUsize::new(2));
        for side in [a, b] {
            let slot = Arc::clone(&slot);
            let remaining = Arc::clone(&remaining);
            side.observe_ended(move || {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    slot.lock().take();
                }
            });
        }
        lifetime
    }

    /// The signal that fires when the scope ends.
    pub fn ended(&self) -> &Signal<(), Never> {
        &self.ended
    }

    /// Whether the scope has already ended.
    pub fn has_ended(&self) -> bool {
        self.ended.is_terminated()
    }

    /// Run `action` once when the scope ends.
    ///
    /// If the scope has already ended, `action` runs synchronously and
    /// `None` is returned. The returned disposable withdraws the
    /// observation without running `action`.
    pub fn observe_ended(
        &self,
        action: impl FnOnce() + Send + 'static,
    ) -> Option<SubscriptionDisposable<(), Never>> {
        let cell: Mutex<Option<Box<dyn FnOnce() + Send>>> = Mutex::new(Some(Box::new(action)));
        self.ended.observe(Observer::new(move |event: Event<(), Never>| {
            match event {
                Event::Failed(never) => match never {},
                // Completed is the token drop; Interrupted is the
                // late-subscription delivery on an already-ended scope.
                Event::Value(()) | Event::Completed | Event::Interrupted => {
                    if let Some(action) = cell.lock().take() {
                        action();
                    }
                }
            }
        }))
    }

    /// Dispose `disposable` when the scope ends (immediately, if it already
    /// has).
    pub fn add(
        &self,
        disposable: impl Disposable + 'static,
    ) -> Option<SubscriptionDisposable<(), Never>> {
        self.observe_ended(move || disposable.dispose())
    }
}

impl<D: Disposable + 'static> std::ops::AddAssign<D> for Lifetime {
    fn add_assign(&mut self, disposable: D) {
        let _ = self.add(disposable);
    }
}

// ---------------------------------------------------------------------------
// LifetimeToken
// ---------------------------------------------------------------------------

/// Sole owner of a scope's end: dropping the token ends the lifetime.
///
/// Deliberately not `Clone` — exactly one place decides when the scope is
/// over.
pub struct LifetimeToken {
    input: Observer<(), Never>,
}

impl Drop for LifetimeToken {
    fn drop(&mut self) {
        self.input.send_completed();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
