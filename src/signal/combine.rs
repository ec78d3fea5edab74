//! Multi-signal combinators: zip, combine_latest, merge, sampling.
//!
//! Combinators that merge state from several sources serialize that state
//! under one mutex and push resulting events through a [`SendGate`], a small
//! trampoline mirroring the signal core's send slot: events enqueue in the
//! order the state lock produced them and drain outside every lock, so
//! pair/tuple order survives concurrent senders without ever holding a
//! combinator lock across user callbacks.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::disposable::{CompositeDisposable, Disposable};
use crate::event::{Event, Never};
use crate::observer::Observer;

use super::Signal;

// ---------------------------------------------------------------------------
// SendGate
// ---------------------------------------------------------------------------

struct GateState<V, E> {
    queue: VecDeque<Event<V, E>>,
    draining: bool,
}

/// Order-preserving emission funnel for combinator observers.
///
/// `enqueue` is called while the caller still holds its state lock (lock
/// order: combinator state, then gate — never the reverse), fixing the
/// emission order; `drain` delivers outside all locks, trampolining if
/// another thread is already draining.
pub(crate) struct SendGate<V, E> {
    state: Mutex<GateState<V, E>>,
}

impl<V: Clone + Send + 'static, E: Clone + Send + 'static> SendGate<V, E> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                queue: VecDeque::new(),
                draining: false,
            }),
        }
    }

    pub(crate) fn enqueue(&self, events: Vec<Event<V, E>>) {
        self.state.lock().queue.extend(events);
    }

    pub(crate) fn drain(&self, observer: &Observer<V, E>) {
        let mut state = self.state.lock();
        if state.draining {
            return;
        }
        state.draining = true;
        loop {
            let event = match state.queue.pop_front() {
                Some(event) => event,
                None => {
                    state.draining = false;
                    return;
                }
            };
            drop(state);
            observer.send(event);
            state = self.state.lock();
        }
    }
}

// ---------------------------------------------------------------------------
// zip
// ---------------------------------------------------------------------------

struct ZipState<V, U> {
    left: VecDeque<V>,
    right: VecDeque<U>,
    left_completed: bool,
    right_completed: bool,
}

impl<V, U> ZipState<V, U> {
    /// Pairs everything currently pairable, then decides completion: a side
    /// that has completed with an empty buffer can never pair again.
    fn flush<E>(&mut self) -> Vec<Event<(V, U), E>> {
        let mut out = Vec::new();
        while !self.left.is_empty() && !self.right.is_empty() {
            let l = self.left.pop_front().expect("checked non-empty");
            let r = self.right.pop_front().expect("checked non-empty");
            out.push(Event::Value((l, r)));
        }
        let exhausted = (self.left_completed && self.left.is_empty())
            || (self.right_completed && self.right.is_empty());
        if exhausted {
            out.push(Event::Completed);
        }
        out
    }
}

impl<V: Clone + Send + 'static, E: Clone + Send + 'static> Signal<V, E> {
    /// Pair values from both signals in arrival order.
    ///
    /// Completes when either side completes and its buffer is empty —
    /// leftovers on the other side are discarded. Fails on the first failure
    /// from either side; interrupts on the first interrupt.
    pub fn zip<U: Clone + Send + 'static>(&self, other: &Signal<U, E>) -> Signal<(V, U), E> {
        let left = self.clone();
        let right = other.clone();
        Signal::new(move |observer| {
            let state = Arc::new(Mutex::new(ZipState::<V, U> {
                left: VecDeque::new(),
                right: VecDeque::new(),
                left_completed: false,
                right_completed: false,
            }));
            let gate = Arc::new(SendGate::new());
            let disposables = CompositeDisposable::new();

            let left_state = Arc::clone(&state);
            let left_gate = Arc::clone(&gate);
            let left_observer = observer.clone();
            if let Some(sub) = left.observe(Observer::new(move |event: Event<V, E>| {
                {
                    let mut st = left_state.lock();
                    let out = match event {
                        Event::Value(v) => {
                            st.left.push_back(v);
                            st.flush()
                        }
                        Event::Completed => {
                            st.left_completed = true;
                            st.flush()
                        }
                        Event::Failed(e) => vec![Event::Failed(e)],
                        Event::Interrupted => vec![Event::Interrupted],
                    };
                    left_gate.enqueue(out);
                }
                left_gate.drain(&left_observer);
            })) {
                disposables.add(sub);
            }

            let right_state = state;
            let right_gate = gate;
            let right_observer = observer;
            if let Some(sub) = right.observe(Observer::new(move |event: Event<U, E>| {
                {
                    let mut st = right_state.lock();
                    let out = match event {
                        Event::Value(u) => {
                            st.right.push_back(u);
                            st.flush()
                        }
                        Event::Completed => {
                            st.right_completed = true;
                            st.flush()
                        }
                        Event::Failed(e) => vec![Event::Failed(e)],
                        Event::Interrupted => vec![Event::Interrupted],
                    };
                    right_gate.enqueue(out);
                }
                right_gate.drain(&right_observer);
            })) {
                disposables.add(sub);
            }

            Some(Box::new(disposables) as Box<dyn Disposable>)
        })
    }
}

// ---------------------------------------------------------------------------
// combine_latest
// ---------------------------------------------------------------------------

struct CombineState<V, U> {
    latest_left: Option<V>,
    latest_right: Option<U>,
    left_completed: bool,
    right_completed: bool,
}

impl<V: Clone + Send + 'static, E: Clone + Send + 'static> Signal<V, E> {
    /// Emit `(latest_left, latest_right)` once both sides have emitted, and
    /// again on every subsequent change from either side.
    ///
    /// Completes once both sides have completed — or as soon as one side
    /// completes without ever emitting, since no pair can then exist. Fails
    /// on the first failure; interrupts on the first interrupt.
    pub fn combine_latest<U: Clone + Send + 'static>(
        &self,
        other: &Signal<U, E>,
    ) -> Signal<(V, U), E> {
        let left = self.clone();
        let right = other.clone();
        Signal::new(move |observer| {
            let state = Arc::new(Mutex::new(CombineState::<V, U> {
                latest_left: None,
                latest_right: None,
                left_completed: false,
                right_completed: false,
            }));
            let gate = Arc::new(SendGate::new());
            let disposables = CompositeDisposable::new();

            fn on_event<V: Clone, U: Clone, E>(
                st: &mut CombineState<V, U>,
                event: Event<V, E>,
                is_left: bool,
            ) -> Vec<Event<(V, U), E>> {
                match event {
                    Event::Value(_) => unreachable!("values handled per side"),
                    Event::Completed => {
                        let (this_completed, this_latest_missing) = if is_left {
                            st.left_completed = true;
                            (st.right_completed, st.latest_left.is_none())
                        } else {
                            st.right_completed = true;
                            (st.left_completed, st.latest_right.is_none())
                        };
                        if this_completed || this_latest_missing {
                            vec![Event::Completed]
                        } else {
                            Vec::new()
                        }
                    }
                    Event::Failed(e) => vec![Event::Failed(e)],
                    Event::Interrupted => vec![Event::Interrupted],
                }
            }

            let left_state = Arc::clone(&state);
            let left_gate = Arc::clone(&gate);
            let left_observer = observer.clone();
            if let Some(sub) = left.observe(Observer::new(move |event: Event<V, E>| {
                {
                    let mut st = left_state.lock();
                    let out = match event {
                        Event::Value(v) => {
                            st.latest_left = Some(v);
                            match (&st.latest_left, &st.latest_right) {
                                (Some(l), Some(r)) => {
                                    vec![Event::Value((l.clone(), r.clone()))]
                                }
                                _ => Vec::new(),
                            }
                        }
                        other => on_event(&mut st, other, true),
                    };
                    left_gate.enqueue(out);
                }
                left_gate.drain(&left_observer);
            })) {
                disposables.add(sub);
            }

            let right_state = state;
            let right_gate = gate;
            let right_observer = observer;
            if let Some(sub) = right.observe(Observer::new(move |event: Event<U, E>| {
                {
                    let mut st = right_state.lock();
                    let out = match event {
                        Event::Value(u) => {
                            st.latest_right = Some(u);
                            match (&st.latest_left, &st.latest_right) {
                                (Some(l), Some(r)) => {
                                    vec![Event::Value((l.clone(), r.clone()))]
                                }
                                _ => Vec::new(),
                            }
                        }
                        Event::Completed => on_event(&mut st, Event::Completed, false),
                        Event::Failed(e) => on_event(&mut st, Event::Failed(e), false),
                        Event::Interrupted => on_event(&mut st, Event::Interrupted, false),
                    };
                    right_gate.enqueue(out);
                }
                right_gate.drain(&right_observer);
            })) {
                disposables.add(sub);
            }

            Some(Box::new(disposables) as Box<dyn Disposable>)
        })
    }
}

// ---------------------------------------------------------------------------
// merge
// ---------------------------------------------------------------------------

impl<V: Clone + Send + 'static, E: Clone + Send + 'static> Signal<V, E> {
    /// Forward all value events from every source in arrival order.
    ///
    /// Completes only when all inputs have completed; an empty source list
    /// completes immediately. The first failure or interrupt on any input
    /// terminates the merge.
    pub fn merge(sources: impl IntoIterator<Item = Signal<V, E>>) -> Signal<V, E> {
        let sources: Vec<Signal<V, E>> = sources.into_iter().collect();
        Signal::new(move |observer| {
            if sources.is_empty() {
                observer.send_completed();
                return None;
            }
            let remaining = Arc::new(Mutex::new(sources.len()));
            let disposables = CompositeDisposable::new();
            for source in &sources {
                let remaining = Arc::clone(&remaining);
                let observer = observer.clone();
                if let Some(sub) = source.observe(Observer::new(move |event: Event<V, E>| {
                    match event {
                        Event::Value(v) => observer.send_value(v),
                        Event::Completed => {
                            let mut remaining = remaining.lock();
                            *remaining -= 1;
                            let all_done = *remaining == 0;
                            drop(remaining);
                            if all_done {
                                observer.send_completed();
                            }
                        }
                        Event::Failed(e) => observer.send_failed(e),
                        Event::Interrupted => observer.send_interrupted(),
                    }
                })) {
                    disposables.add(sub);
                }
            }
            Some(Box::new(disposables) as Box<dyn Disposable>)
        })
    }

    /// Merge this signal with one other.
    pub fn merge_with(&self, other: &Signal<V, E>) -> Signal<V, E> {
        Signal::merge([self.clone(), other.clone()])
    }
}

// ---------------------------------------------------------------------------
// sampling
// ---------------------------------------------------------------------------

impl<V: Clone + Send + 'static, E: Clone + Send + 'static> Signal<V, E> {
    /// Forward the latest value from `self` whenever `sampler` fires.
    ///
    /// Nothing is emitted while `self` has not yet produced a value.
    /// Completes when both `self` and `sampler` have completed; failures and
    /// interrupts from `self` forward immediately.
    pub fn sample_on(&self, sampler: &Signal<(), Never>) -> Signal<V, E> {
        let source = self.clone();
        let sampler = sampler.clone();
        Signal::new(move |observer| {
            struct SampleState<V> {
                latest: Option<V>,
                source_completed: bool,
                sampler_completed: bool,
            }
            let state = Arc::new(Mutex::new(SampleState::<V> {
                latest: None,
                source_completed: false,
                sampler_completed: false,
            }));
            let disposables = CompositeDisposable::new();

            let source_state = Arc::clone(&state);
            let source_observer = observer.clone();
            if let Some(sub) = source.observe(Observer::new(move |event: Event<V, E>| {
                match event {
                    Event::Value(v) => {
                        source_state.lock().latest = Some(v);
                    }
                    Event::Completed => {
                        let mut st = source_state.lock();
                        st.source_completed = true;
                        let done = st.sampler_completed;
                        drop(st);
                        if done {
                            source_observer.send_completed();
                        }
                    }
                    Event::Failed(e) => source_observer.send_failed(e),
                    Event::Interrupted => source_observer.send_interrupted(),
                }
            })) {
                disposables.add(sub);
            }

            let sampler_state = state;
            let sampler_observer = observer;
            if let Some(sub) = sampler.observe(Observer::new(move |event: Event<(), Never>| {
                match event {
                    Event::Value(()) => {
                        let latest = sampler_state.lock().latest.clone();
                        if let Some(v) = latest {
                            sampler_observer.send_value(v);
                        }
                    }
                    Event::Completed => {
                        let mut st = sampler_state.lock();
                        st.sampler_completed = true;
                        let done = st.source_completed;
                        drop(st);
                        if done {
                            sampler_observer.send_completed();
                        }
                    }
                    Event::Failed(never) => match never {},
                    Event::Interrupted => sampler_observer.send_interrupted(),
                }
            })) {
                disposables.add(sub);
            }

            Some(Box::new(disposables) as Box<dyn Disposable>)
        })
    }

    /// Pair each value of `self` with the latest value from `other`.
    ///
    /// `self` drives everything: values emit `(value, latest)` once `other`
    /// has emitted at least once, and `self`'s terminals forward. Terminal
    /// events from `other` only stop its latest from updating.
    pub fn with_latest_from<U: Clone + Send + 'static>(
        &self,
        other: &Signal<U, E>,
    ) -> Signal<(V, U), E> {
        let source = self.clone();
        let other = other.clone();
        Signal::new(move |observer| {
            let latest: std::sync::Arc<Mutex<Option<U>>> = Arc::new(Mutex::new(None));
            let disposables = CompositeDisposable::new();

            let other_latest = Arc::clone(&latest);
            if let Some(sub) = other.observe(Observer::new(move |event: Event<U, E>| {
                if let Event::Value(u) = event {
                    *other_latest.lock() = Some(u);
                }
            })) {
                disposables.add(sub);
            }

            if let Some(sub) = source.observe(Observer::new(move |event: Event<V, E>| {
                match event {
                    Event::Value(v) => {
                        let snapshot = latest.lock().clone();
                        if let Some(u) = snapshot {
                            observer.send_value((v, u));
                        }
                    }
                    Event::Completed => observer.send_completed(),
                    Event::Failed(e) => observer.send_failed(e),
                    Event::Interrupted => observer.send_interrupted(),
                }
            })) {
                disposables.add(sub);
            }

            Some(Box::new(disposables) as Box<dyn Disposable>)
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::EventCollector;

    #[test]
    fn zip_pairs_in_arrival_order_and_discards_leftovers() {
        let (a, a_in, _ai) = Signal::<i32, Never>::pipe();
        let (b, b_in, _bi) = Signal::<&'static str, Never>::pipe();
        let collector = EventCollector::new();
        a.zip(&b).observe(collector.observer());

        a_in.send_value(1);
        a_in.send_value(2);
        b_in.send_value("a");
        a_in.send_value(3);
        b_in.send_value("b");
        a_in.send_completed();
        b_in.send_completed();

        assert_eq!(
            collector.events(),
            vec![
                Event::Value((1, "a")),
                Event::Value((2, "b")),
                Event::Completed
            ]
        );
    }

    #[test]
    fn zip_completes_when_exhausted_side_completes() {
        let (a, a_in, _ai) = Signal::<i32, Never>::pipe();
        let (b, b_in, _bi) = Signal::<i32, Never>::pipe();
        let collector = EventCollector::new();
        a.zip(&b).observe(collector.observer());

        a_in.send_value(1);
        b_in.send_value(10);
        // A completes with an empty buffer: no more pairs can form even
        // though B keeps going.
        a_in.send_completed();
        b_in.send_value(20);

        assert_eq!(
            collector.events(),
            vec![Event::Value((1, 10)), Event::Completed]
        );
    }

    #[test]
    fn zip_fails_on_first_failure() {
        let (a, a_in, _ai) = Signal::<i32, &'static str>::pipe();
        let (b, _b_in, _bi) = Signal::<i32, &'static str>::pipe();
        let collector = EventCollector::new();
        a.zip(&b).observe(collector.observer());

        a_in.send_failed("boom");
        assert_eq!(collector.events(), vec![Event::Failed("boom")]);
    }

    #[test]
    fn combine_latest_requires_both_then_tracks_changes() {
        let (a, a_in, _ai) = Signal::<i32, Never>::pipe();
        let (b, b_in, _bi) = Signal::<&'static str, Never>::pipe();
        let collector = EventCollector::new();
        a.combine_latest(&b).observe(collector.observer());

        a_in.send_value(1);
        b_in.send_value("x");
        b_in.send_value("y");
        a_in.send_value(2);

        assert_eq!(
            collector.values(),
            vec![(1, "x"), (1, "y"), (2, "y")]
        );
    }

    #[test]
    fn combine_latest_completes_when_both_complete() {
        let (a, a_in, _ai) = Signal::<i32, Never>::pipe();
        let (b, b_in, _bi) = Signal::<i32, Never>::pipe();
        let collector = EventCollector::new();
        a.combine_latest(&b).observe(collector.observer());

        a_in.send_value(1);
        b_in.send_value(2);
        a_in.send_completed();
        // A's latest is still usable.
        b_in.send_value(3);
        b_in.send_completed();

        assert_eq!(
            collector.events(),
            vec![
                Event::Value((1, 2)),
                Event::Value((1, 3)),
                Event::Completed
            ]
        );
    }

    #[test]
    fn merge_interleaves_and_waits_for_all_completions() {
        let (a, a_in, _ai) = Signal::<i32, Never>::pipe();
        let (b, b_in, _bi) = Signal::<i32, Never>::pipe();
        let collector = EventCollector::new();
        a.merge_with(&b).observe(collector.observer());

        a_in.send_value(1);
        b_in.send_value(10);
        a_in.send_completed();
        b_in.send_value(20);
        b_in.send_completed();

        assert_eq!(
            collector.events(),
            vec![
                Event::Value(1),
                Event::Value(10),
                Event::Value(20),
                Event::Completed
            ]
        );
    }

    #[test]
    fn merge_terminates_on_first_failure() {
        let (a, a_in, _ai) = Signal::<i32, &'static str>::pipe();
        let (b, b_in, _bi) = Signal::<i32, &'static str>::pipe();
        let collector = EventCollector::new();
        a.merge_with(&b).observe(collector.observer());

        a_in.send_value(1);
        b_in.send_failed("boom");
        a_in.send_value(2);

        assert_eq!(
            collector.events(),
            vec![Event::Value(1), Event::Failed("boom")]
        );
    }

    #[test]
    fn sample_on_snapshots_latest() {
        let (source, source_in, _si) = Signal::<i32, Never>::pipe();
        let (sampler, sampler_in, _ti) = Signal::<(), Never>::pipe();
        let collector = EventCollector::new();
        source.sample_on(&sampler).observe(collector.observer());

        sampler_in.send_value(()); // nothing yet
        source_in.send_value(1);
        sampler_in.send_value(());
        source_in.send_value(2);
        source_in.send_value(3);
        sampler_in.send_value(());

        assert_eq!(collector.values(), vec![1, 3]);
    }

    #[test]
    fn with_latest_from_is_driven_by_self() {
        let (driver, driver_in, _di) = Signal::<i32, Never>::pipe();
        let (latest, latest_in, _li) = Signal::<&'static str, Never>::pipe();
        let collector = EventCollector::new();
        driver.with_latest_from(&latest).observe(collector.observer());

        driver_in.send_value(1); // other empty: dropped
        latest_in.send_value("x");
        driver_in.send_value(2);
        latest_in.send_value("y");
        driver_in.send_value(3);
        driver_in.send_completed();

        assert_eq!(
            collector.events(),
            vec![
                Event::Value((2, "x")),
                Event::Value((3, "y")),
                Event::Completed
            ]
        );
    }
}
