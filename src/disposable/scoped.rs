//! Scoped disposable: disposes its inner disposable on scope exit.

use super::Disposable;

// ---------------------------------------------------------------------------
// ScopedDisposable
// ---------------------------------------------------------------------------

/// Ties a disposable to a lexical scope.
///
/// When the `ScopedDisposable` is dropped — by falling out of scope, a panic
/// unwinding past it, or an owning struct being dropped — the wrapped
/// disposable is disposed. It can also be disposed early by hand.
pub struct ScopedDisposable {
    inner: Box<dyn Disposable>,
}

impl ScopedDisposable {
    /// Wrap `inner`, disposing it when this value drops.
    pub fn new(inner: impl Disposable + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl Disposable for ScopedDisposable {
    fn dispose(&self) {
        self.inner.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

impl Drop for ScopedDisposable {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
