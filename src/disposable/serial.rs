//! Serial disposable: a single-slot disposable whose replacements dispose.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::Disposable;

// ---------------------------------------------------------------------------
// SerialDisposable
// ---------------------------------------------------------------------------

struct SerialState {
    disposed: AtomicBool,
    slot: Mutex<Option<Box<dyn Disposable>>>,
}

/// A disposable holding at most one inner disposable.
///
/// Assigning a new inner disposes the previous one. Assigning after the
/// serial itself has been disposed disposes the replacement immediately.
/// Clones share the slot.
#[derive(Clone)]
pub struct SerialDisposable {
    state: Arc<SerialState>,
}

impl SerialDisposable {
    /// Create an empty serial disposable.
    pub fn new() -> Self {
        Self {
            state: Arc::new(SerialState {
                disposed: AtomicBool::new(false),
                slot: Mutex::new(None),
            }),
        }
    }

    /// Install `inner`, disposing whatever occupied the slot before.
    ///
    /// If the serial is already disposed, `inner` is disposed immediately.
    pub fn set_inner(&self, inner: impl Disposable + 'static) {
        let boxed: Box<dyn Disposable> = Box::new(inner);
        if self.state.disposed.load(Ordering::Acquire) {
            boxed.dispose();
            return;
        }
        let previous = {
            let mut slot = self.state.slot.lock();
            // A dispose may have won the race since the check above; the
            // re-check under the lock keeps the slot empty after disposal.
            if self.state.disposed.load(Ordering::Acquire) {
                drop(slot);
                boxed.dispose();
                return;
            }
            slot.replace(boxed)
        };
        if let Some(previous) = previous {
            previous.dispose();
        }
    }

    /// Exchange the inner disposable without disposing the old one.
    ///
    /// Returns the previous occupant. If the serial is already disposed, the
    /// replacement is disposed immediately and `None` is returned.
    pub fn swap_inner(
        &self,
        inner: Option<Box<dyn Disposable>>,
    ) -> Option<Box<dyn Disposable>> {
        let mut slot = self.state.slot.lock();
        if self.state.disposed.load(Ordering::Acquire) {
            drop(slot);
            if let Some(inner) = inner {
                inner.dispose();
            }
            return None;
        }
        match inner {
            Some(inner) => slot.replace(inner),
            None => slot.take(),
        }
    }

    /// Drop the inner disposable, disposing it. The serial stays active.
    pub fn clear(&self) {
        let previous = self.state.slot.lock().take();
        if let Some(previous) = previous {
            previous.dispose();
        }
    }
}

impl Default for SerialDisposable {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposable for SerialDisposable {
    fn dispose(&self) {
        if self
            .state
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let inner = self.state.slot.lock().take();
        if let Some(inner) = inner {
            inner.dispose();
        }
    }

    fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::Acquire)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disposable::AnyDisposable;
    use std::sync::atomic::AtomicUsize;

    fn counting(count: &Arc<AtomicUsize>) -> AnyDisposable {
        let count = Arc::clone(count);
        AnyDisposable::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn replacing_disposes_previous() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let serial = SerialDisposable::new();

        serial.set_inner(counting(&first));
        assert_eq!(first.load(Ordering::SeqCst), 0);

        serial.set_inner(counting(&second));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dispose_reaches_inner() {
        let count = Arc::new(AtomicUsize::new(0));
        let serial = SerialDisposable::new();
        serial.set_inner(counting(&count));
        serial.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(serial.is_disposed());
    }

    #[test]
    fn set_after_dispose_disposes_replacement() {
        let count = Arc::new(AtomicUsize::new(0));
        let serial = SerialDisposable::new();
        serial.dispose();
        serial.set_inner(counting(&count));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn swap_does_not_dispose_old() {
        let count = Arc::new(AtomicUsize::new(0));
        let serial = SerialDisposable::new();
        serial.set_inner(counting(&count));
        let old = serial.swap_inner(None);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(old.is_some());
        old.unwrap().dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_disposes_inner_but_stays_active() {
        let count = Arc::new(AtomicUsize::new(0));
        let serial = SerialDisposable::new();
        serial.set_inner(counting(&count));
        serial.clear();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!serial.is_disposed());
    }
}
