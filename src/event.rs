//! Event types: the tagged unit delivered on a signal.
//!
//! An [`Event`] is either a value or one of three terminals (`Failed`,
//! `Completed`, `Interrupted`). A signal delivers at most one terminal over
//! its whole lifetime; everything downstream of that guarantee (operator
//! terminal rules, late-subscriber interruption) is built on this enum.

use std::fmt;

// ---------------------------------------------------------------------------
// Never
// ---------------------------------------------------------------------------

/// Uninhabited error type for streams that cannot fail.
///
/// A `Signal<V, Never>` has no way to construct a `Failed` event, so "user
/// callbacks must not produce errors" is enforced by the API shape rather
/// than at runtime.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Never {}

impl fmt::Debug for Never {
    fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {}
    }
}

impl fmt::Display for Never {
    fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {}
    }
}

impl std::error::Error for Never {}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A single occurrence on a signal.
///
/// `Failed`, `Completed`, and `Interrupted` are terminal: after any of them,
/// the signal delivers nothing further. `Interrupted` is not an error — it
/// reports cancellation of the work feeding the signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<V, E> {
    /// A value produced by the stream.
    Value(V),
    /// The stream failed with a typed error. Terminal.
    Failed(E),
    /// The stream finished normally. Terminal.
    Completed,
    /// The work feeding the stream was cancelled. Terminal.
    Interrupted,
}

impl<V, E> Event<V, E> {
    /// Whether this event is one of the three terminals.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Event::Value(_))
    }

    /// Whether this event carries a value.
    pub fn is_value(&self) -> bool {
        matches!(self, Event::Value(_))
    }

    /// Extract the value, if any.
    pub fn value(self) -> Option<V> {
        match self {
            Event::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Extract the error, if any.
    pub fn error(self) -> Option<E> {
        match self {
            Event::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// View the value or failure as a `Result`, ignoring the neutral
    /// terminals. `Completed` and `Interrupted` map to `None`.
    pub fn into_result(self) -> Option<Result<V, E>> {
        match self {
            Event::Value(v) => Some(Ok(v)),
            Event::Failed(e) => Some(Err(e)),
            Event::Completed | Event::Interrupted => None,
        }
    }

    /// Transform the value, leaving terminals untouched.
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Event<U, E> {
        match self {
            Event::Value(v) => Event::Value(f(v)),
            Event::Failed(e) => Event::Failed(e),
            Event::Completed => Event::Completed,
            Event::Interrupted => Event::Interrupted,
        }
    }

    /// Transform the error, leaving values and neutral terminals untouched.
    pub fn map_error<F>(self, f: impl FnOnce(E) -> F) -> Event<V, F> {
        match self {
            Event::Value(v) => Event::Value(v),
            Event::Failed(e) => Event::Failed(f(e)),
            Event::Completed => Event::Completed,
            Event::Interrupted => Event::Interrupted,
        }
    }
}

impl<V> Event<V, Never> {
    /// Re-type a never-failing event to an arbitrary error type.
    pub fn promote_error<E>(self) -> Event<V, E> {
        self.map_error(|never| match never {})
    }
}

// ===========================================================================
// Tests
// ===========================================================================
