//! Restart-based combinators: repetition, retry, sequencing, replay.
//!
//! All of these exploit the one thing only a producer has — the ability to
//! start its recipe again.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::disposable::Disposable;
use crate::event::Event;
use crate::lifetime::Lifetime;
use crate::observer::Observer;
use crate::signal::Signal;

use super::SignalProducer;

impl<V: Clone + Send + 'static, E: Clone + Send + 'static> SignalProducer<V, E> {
    /// Run the recipe `count` times end to end, re-starting on each
    /// completion. `times(0)` completes immediately; failures and
    /// interrupts stop the repetition.
    pub fn times(&self, count: usize) -> Self {
        let source = self.clone();
        SignalProducer::new(move |observer, lifetime| {
            if count == 0 {
                observer.send_completed();
                return;
            }
            run_iteration(&source, count, observer, &lifetime, RestartOn::Completion);
        })
    }

    /// Re-start the recipe on failure, up to `count` extra attempts; the
    /// final failure is forwarded.
    pub fn retry(&self, count: usize) -> Self {
        let source = self.clone();
        SignalProducer::new(move |observer, lifetime| {
            run_iteration(&source, count + 1, observer, &lifetime, RestartOn::Failure);
        })
    }

    /// Discard this producer's values, then — on its successful completion —
    /// start `next` and forward everything it sends. A failure here
    /// forwards without starting `next`.
    pub fn then<U: Clone + Send + 'static>(
        &self,
        next: SignalProducer<U, E>,
    ) -> SignalProducer<U, E> {
        let source = self.clone();
        SignalProducer::new(move |observer, lifetime| {
            let next = next.clone();
            let started = source.start(Observer::new({
                let lifetime = lifetime.clone();
                move |event: Event<V, E>| match event {
                    Event::Value(_) => {}
                    Event::Completed => {
                        lifetime.add(next.start(observer.clone()));
                    }
                    Event::Failed(e) => observer.send_failed(e),
                    Event::Interrupted => observer.send_interrupted(),
                }
            }));
            lifetime.add(started);
        })
    }

    /// Share one underlying start between all starts of the returned
    /// producer, replaying up to `capacity` of the latest values (and the
    /// terminal, if any) to each new observer.
    ///
    /// The upstream starts lazily, on the first start, and is torn down when
    /// the replay producer itself is dropped — downstream disposals only
    /// detach their own observer. Replay delivery holds the shared state
    /// lock, so observers must not synchronously re-start the replayed
    /// producer from their event handlers.
    pub fn replay_lazily(&self, capacity: usize) -> Self {
        struct Replay<V, E> {
            started: bool,
            buffer: VecDeque<V>,
            terminal: Option<Event<V, E>>,
            signal: Option<Signal<V, E>>,
            upstream: Option<Box<dyn Disposable>>,
        }

        impl<V, E> Drop for Replay<V, E> {
            fn drop(&mut self) {
                if let Some(upstream) = self.upstream.take() {
                    upstream.dispose();
                }
            }
        }

        let source = self.clone();
        let state = Arc::new(Mutex::new(Replay::<V, E> {
            started: false,
            buffer: VecDeque::new(),
            terminal: None,
            signal: None,
            upstream: None,
        }));

        SignalProducer::new(move |observer, lifetime: Lifetime| {
            let mut st = state.lock();
            if !st.started {
                st.started = true;
                let (signal, input, _interrupter) = Signal::pipe();
                st.signal = Some(signal);

                // The recorder shares the replay lock: buffer bookkeeping
                // and pipe delivery stay atomic with respect to replays.
                let recorder = Observer::new({
                    let state = Arc::clone(&state);
                    move |event: Event<V, E>| {
                        let mut st = state.lock();
                        match &event {
                            Event::Value(v) => {
                                if capacity > 0 {
                                    if st.buffer.len() == capacity {
                                        st.buffer.pop_front();
                                    }
                                    st.buffer.push_back(v.clone());
                                }
                            }
                            terminal => {
                                st.terminal = Some(terminal.clone());
                            }
                        }
                        input.send(event);
                        drop(st);
                    }
                });
                // Re-entrant lock acquisition: start the upstream only after
                // releasing, then finish wiring this observer.
                drop(st);
                let upstream = source.start(recorder);
                st = state.lock();
                st.upstream = Some(upstream);
            }

            for value in st.buffer.iter().cloned() {
                observer.send_value(value);
            }
            if let Some(terminal) = st.terminal.clone() {
                observer.send(terminal);
                return;
            }
            let signal = st.signal.clone().expect("signal exists once started");
            if let Some(subscription) = signal.observe(observer) {
                lifetime.add(subscription);
            }
        })
    }
}

enum RestartOn {
    Completion,
    Failure,
}

/// Starts one iteration of `source`, re-starting on the configured terminal
/// until `remaining` runs out. Synchronously terminating recipes recurse one
/// frame per iteration.
fn run_iteration<V: Clone + Send + 'static, E: Clone + Send + 'static>(
    source: &SignalProducer<V, E>,
    remaining: usize,
    observer: Observer<V, E>,
    lifetime: &Lifetime,
    restart_on: RestartOn,
) {
    let restart_completion = matches!(restart_on, RestartOn::Completion);
    let started = source.start(Observer::new({
        let source = source.clone();
        let lifetime = lifetime.clone();
        move |event: Event<V, E>| match event {
            Event::Value(v) => observer.send_value(v),
            Event::Completed => {
                if restart_completion && remaining > 1 {
                    run_iteration(
                        &source,
                        remaining - 1,
                        observer.clone(),
                        &lifetime,
                        RestartOn::Completion,
                    );
                } else {
                    observer.send_completed();
                }
            }
            Event::Failed(e) => {
                if !restart_completion && remaining > 1 {
                    run_iteration(
                        &source,
                        remaining - 1,
                        observer.clone(),
                        &lifetime,
                        RestartOn::Failure,
                    );
                } else {
                    observer.send_failed(e);
                }
            }
            Event::Interrupted => observer.send_interrupted(),
        }
    }));
    lifetime.add(started);
}

// ===========================================================================
// Tests
// ===========================================================================
