//! Composite disposable: a set-valued disposable.
//!
//! Children live in a slotmap arena; [`CompositeDisposable::add`] returns a
//! [`CompositeHandle`] keyed into that arena, so a single child can be
//! detached and disposed without touching its siblings. Disposing the
//! composite disposes all children once and clears the set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};

use super::Disposable;

new_key_type! {
    /// Stable key for a child inside a [`CompositeDisposable`].
    pub struct ChildKey;
}

// ---------------------------------------------------------------------------
// CompositeDisposable
// ---------------------------------------------------------------------------

struct CompositeState {
    /// `None` once the composite is disposed; children added afterwards are
    /// disposed immediately.
    children: Mutex<Option<SlotMap<ChildKey, Box<dyn Disposable>>>>,
}

/// A disposable owning a set of child disposables.
///
/// Clones share the same child set.
#[derive(Clone)]
pub struct CompositeDisposable {
    state: Arc<CompositeState>,
}

impl CompositeDisposable {
    /// Create an empty, active composite.
    pub fn new() -> Self {
        Self {
            state: Arc::new(CompositeState {
                children: Mutex::new(Some(SlotMap::with_key())),
            }),
        }
    }

    /// Add a child.
    ///
    /// If the composite is already disposed, the child is disposed
    /// immediately and the returned handle is spent. Otherwise the handle
    /// detaches and disposes exactly that child when disposed.
    pub fn add(&self, child: impl Disposable + 'static) -> CompositeHandle {
        let boxed: Box<dyn Disposable> = Box::new(child);
        let mut guard = self.state.children.lock();
        match guard.as_mut() {
            Some(children) => {
                let key = children.insert(boxed);
                drop(guard);
                CompositeHandle {
                    key,
                    state: Arc::downgrade(&self.state),
                    spent: Arc::new(AtomicBool::new(false)),
                }
            }
            None => {
                drop(guard);
                boxed.dispose();
                CompositeHandle {
                    key: ChildKey::default(),
                    state: Weak::new(),
                    spent: Arc::new(AtomicBool::new(true)),
                }
            }
        }
    }

    /// Number of children currently held. Zero after disposal.
    pub fn len(&self) -> usize {
        self.state
            .children
            .lock()
            .as_ref()
            .map_or(0, |children| children.len())
    }

    /// Whether the composite holds no children.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CompositeDisposable {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposable for CompositeDisposable {
    fn dispose(&self) {
        // Take the whole set out under the lock, dispose outside it: child
        // teardown may run user code that re-enters this composite.
        let children = self.state.children.lock().take();
        if let Some(children) = children {
            for (_, child) in children {
                child.dispose();
            }
        }
    }

    fn is_disposed(&self) -> bool {
        self.state.children.lock().is_none()
    }
}

impl<D: Disposable + 'static> std::ops::AddAssign<D> for CompositeDisposable {
    fn add_assign(&mut self, child: D) {
        let _ = self.add(child);
    }
}

// ---------------------------------------------------------------------------
// CompositeHandle
// ---------------------------------------------------------------------------

/// Handle to a single child of a [`CompositeDisposable`].
///
/// Disposing the handle removes the child from the composite and disposes
/// it, leaving every other child untouched. Holds only a weak reference to
/// the composite, so a forgotten handle never keeps a dead composite alive.
#[derive(Clone)]
pub struct CompositeHandle {
    key: ChildKey,
    state: Weak<CompositeState>,
    spent: Arc<AtomicBool>,
}

impl Disposable for CompositeHandle {
    fn dispose(&self) {
        if self
            .spent
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if let Some(state) = self.state.upgrade() {
            let child = state
                .children
                .lock()
                .as_mut()
                .and_then(|children| children.remove(self.key));
            if let Some(child) = child {
                child.dispose();
            }
        }
    }

    fn is_disposed(&self) -> bool {
        self.spent.load(Ordering::Acquire)
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
    fn dispose_disposes_all_children_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let composite = CompositeDisposable::new();
        composite.add(counting(&count));
        composite.add(counting(&count));
        composite.add(counting(&count));
        assert_eq!(composite.len(), 3);

        composite.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(composite.is_disposed());
        assert_eq!(composite.len(), 0);

        composite.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn add_after_dispose_disposes_immediately() {
        let count = Arc::new(AtomicUsize::new(0));
        let composite = CompositeDisposable::new();
        composite.dispose();

        let handle = composite.add(counting(&count));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(handle.is_disposed());
    }

    #[test]
    fn handle_detaches_only_its_child() {
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let composite = CompositeDisposable::new();
        let handle_a = composite.add(counting(&a));
        composite.add(counting(&b));

        handle_a.dispose();
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 0);
        assert_eq!(composite.len(), 1);

        // A second dispose of the same handle is a no-op.
        handle_a.dispose();
        assert_eq!(a.load(Ordering::SeqCst), 1);

        composite.dispose();
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn add_assign_sugar() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut composite = CompositeDisposable::new();
        composite += counting(&count);
        composite += counting(&count);
        composite.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handle_survives_composite_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let composite = CompositeDisposable::new();
        let handle = composite.add(counting(&count));
        drop(composite);
        // The composite state is gone; disposing the handle must not panic.
        handle.dispose();
    }
}
