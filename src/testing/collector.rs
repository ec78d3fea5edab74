//! Thread-safe event capture for assertions.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::{Event, Never};
use crate::observer::Observer;

// ---------------------------------------------------------------------------
// EventCollector
// ---------------------------------------------------------------------------

/// Records every event delivered to its observers.
///
/// Each [`EventCollector::observer`] call mints a fresh observer (with its
/// own terminal latch) appending into the shared log, so a collector can
/// watch several points of a pipeline at once if a test wants interleaving.
pub struct EventCollector<V, E = Never> {
    events: Arc<Mutex<Vec<Event<V, E>>>>,
}

impl<V, E> Clone for EventCollector<V, E> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

impl<V, E> Default for EventCollector<V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> EventCollector<V, E> {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<Event<V, E>>
    where
        V: Clone,
        E: Clone,
    {
        self.events.lock().clone()
    }

    /// Snapshot of just the recorded values.
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
        E: Clone,
    {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Value(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl<V: Send + 'static, E: Send + 'static> EventCollector<V, E> {
    /// A fresh observer appending into this collector's log.
    pub fn observer(&self) -> Observer<V, E> {
        let events = Arc::clone(&self.events);
        Observer::new(move |event| events.lock().push(event))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_order() {
        let collector: EventCollector<i32, &str> = EventCollector::new();
        let observer = collector.observer();
        observer.send_value(1);
        observer.send_value(2);
        observer.send_completed();
        assert_eq!(
            collector.events(),
            vec![Event::Value(1), Event::Value(2), Event::Completed]
        );
        assert_eq!(collector.values(), vec![1, 2]);
    }

    #[test]
    fn separate_observers_have_separate_latches() {
        let collector: EventCollector<i32, &str> = EventCollector::new();
        let first = collector.observer();
        first.send_completed();
        let second = collector.observer();
        second.send_value(9);
        assert_eq!(
            collector.events(),
            vec![Event::Completed, Event::Value(9)]
        );
    }
}
