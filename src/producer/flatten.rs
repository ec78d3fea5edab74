//! Flattening: producers of producers, under four strategies.
//!
//! Only producers can flatten — every strategy needs to *start* inner
//! streams, and a hot signal cannot be restarted. The outer producer's
//! lifetime owns every inner start, so disposing the flattened start tears
//! down the outer stream and all live inners at once.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::disposable::{Disposable, SerialDisposable};
use crate::event::Event;
use crate::observer::Observer;

use super::SignalProducer;

// ---------------------------------------------------------------------------
// FlattenStrategy
// ---------------------------------------------------------------------------

/// How [`SignalProducer::flatten`] schedules inner producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlattenStrategy {
    /// Start inners one at a time, in arrival order; later inners queue
    /// until the current one completes.
    Concat,
    /// Start every inner as it arrives and interleave their values.
    Merge,
    /// Only the newest inner runs; each new inner disposes its predecessor
    /// (whose interrupt is swallowed).
    Latest,
    /// The first inner to deliver an event wins; every other inner is
    /// disposed and silenced.
    Race,
}

impl<V: Clone + Send + 'static, E: Clone + Send + 'static>
    SignalProducer<SignalProducer<V, E>, E>
{
    /// Flatten a producer of producers into one stream of `V`.
    ///
    /// Common to all strategies: the flattened stream completes only once
    /// the outer producer has completed *and* the strategy has no live or
    /// queued inner left; the first failure anywhere terminates everything.
    pub fn flatten(&self, strategy: FlattenStrategy) -> SignalProducer<V, E> {
        match strategy {
            FlattenStrategy::Concat => self.flatten_concat(),
            FlattenStrategy::Merge => self.flatten_merge(),
            FlattenStrategy::Latest => self.flatten_latest(),
            FlattenStrategy::Race => self.flatten_race(),
        }
    }

    fn flatten_merge(&self) -> SignalProducer<V, E> {
        let outer = self.clone();
        SignalProducer::new(move |observer, lifetime| {
            struct MergeState {
                outer_completed: bool,
                active_inners: usize,
            }
            let state = Arc::new(Mutex::new(MergeState {
                outer_completed: false,
                active_inners: 0,
            }));

            let started = outer.start(Observer::new({
                let lifetime = lifetime.clone();
                move |event: Event<SignalProducer<V, E>, E>| match event {
                    Event::Value(inner) => {
                        state.lock().active_inners += 1;
                        let inner_observer = Observer::new({
                            let state = Arc::clone(&state);
                            let observer = observer.clone();
                            move |event: Event<V, E>| match event {
                                Event::Value(v) => observer.send_value(v),
                                Event::Completed => {
                                    let mut st = state.lock();
                                    st.active_inners -= 1;
                                    let done = st.outer_completed && st.active_inners == 0;
                                    drop(st);
                                    if done {
                                        observer.send_completed();
                                    }
                                }
                                Event::Failed(e) => observer.send_failed(e),
                                Event::Interrupted => observer.send_interrupted(),
                            }
                        });
                        lifetime.add(inner.start(inner_observer));
                    }
                    Event::Completed => {
                        let mut st = state.lock();
                        st.outer_completed = true;
                        let done = st.active_inners == 0;
                        drop(st);
                        if done {
                            observer.send_completed();
                        }
                    }
                    Event::Failed(e) => observer.send_failed(e),
                    Event::Interrupted => observer.send_interrupted(),
                }
            }));
            lifetime.add(started);
        })
    }

    fn flatten_latest(&self) -> SignalProducer<V, E> {
        let outer = self.clone();
        SignalProducer::new(move |observer, lifetime| {
            struct LatestState {
                generation: u64,
                inner_alive: bool,
                outer_completed: bool,
            }
            let state = Arc::new(Mutex::new(LatestState {
                generation: 0,
                inner_alive: false,
                outer_completed: false,
            }));
            let current = SerialDisposable::new();
            lifetime.add(current.clone());

            let started = outer.start(Observer::new({
                move |event: Event<SignalProducer<V, E>, E>| match event {
                    Event::Value(inner) => {
                        let my_generation = {
                            let mut st = state.lock();
                            st.generation += 1;
                            st.inner_alive = true;
                            st.generation
                        };
                        // Dispose the predecessor before the replacement
                        // starts; its interrupt arrives under a stale
                        // generation and is swallowed below.
                        current.clear();
                        let inner_observer = Observer::new({
                            let state = Arc::clone(&state);
                            let observer = observer.clone();
                            move |event: Event<V, E>| {
                                let mut st = state.lock();
                                if st.generation != my_generation {
                                    return;
                                }
                                match event {
                                    Event::Value(v) => {
                                        drop(st);
                                        observer.send_value(v);
                                    }
                                    Event::Completed => {
                                        st.inner_alive = false;
                                        let done = st.outer_completed;
                                        drop(st);
                                        if done {
                                            observer.send_completed();
                                        }
                                    }
                                    Event::Failed(e) => {
                                        drop(st);
                                        observer.send_failed(e);
                                    }
                                    Event::Interrupted => {
                                        drop(st);
                                        observer.send_interrupted();
                                    }
                                }
                            }
                        });
                        current.set_inner(inner.start(inner_observer));
                    }
                    Event::Completed => {
                        let mut st = state.lock();
                        st.outer_completed = true;
                        let done = !st.inner_alive;
                        drop(st);
                        if done {
                            observer.send_completed();
                        }
                    }
                    Event::Failed(e) => observer.send_failed(e),
                    Event::Interrupted => observer.send_interrupted(),
                }
            }));
            lifetime.add(started);
        })
    }

    fn flatten_concat(&self) -> SignalProducer<V, E> {
        let outer = self.clone();
        SignalProducer::new(move |observer, lifetime| {
            struct ConcatState<V, E> {
                queue: VecDeque<SignalProducer<V, E>>,
                inner_running: bool,
                outer_completed: bool,
            }
            let state = Arc::new(Mutex::new(ConcatState::<V, E> {
                queue: VecDeque::new(),
                inner_running: false,
                outer_completed: false,
            }));
            let current = SerialDisposable::new();
            lifetime.add(current.clone());

            // Starts `inner` with an observer that chains to the next queued
            // producer on completion. Synchronously completing inners recurse
            // one frame per queued producer.
            fn start_inner<V: Clone + Send + 'static, E: Clone + Send + 'static>(
                inner: SignalProducer<V, E>,
                state: Arc<Mutex<ConcatState<V, E>>>,
                current: SerialDisposable,
                observer: Observer<V, E>,
            ) {
                let inner_observer = Observer::new({
                    let state = Arc::clone(&state);
                    let current = current.clone();
                    let observer = observer.clone();
                    move |event: Event<V, E>| match event {
                        Event::Value(v) => observer.send_value(v),
                        Event::Completed => {
                            let next = {
                                let mut st = state.lock();
                                match st.queue.pop_front() {
                                    Some(next) => Some(next),
                                    None => {
                                        st.inner_running = false;
                                        if st.outer_completed {
                                            drop(st);
                                            observer.send_completed();
                                        }
                                        None
                                    }
                                }
                            };
                            if let Some(next) = next {
                                start_inner(
                                    next,
                                    Arc::clone(&state),
                                    current.clone(),
                                    observer.clone(),
                                );
                            }
                        }
                        Event::Failed(e) => observer.send_failed(e),
                        Event::Interrupted => observer.send_interrupted(),
                    }
                });
                current.set_inner(inner.start(inner_observer));
            }

            let started = outer.start(Observer::new({
                let state = Arc::clone(&state);
                move |event: Event<SignalProducer<V, E>, E>| match event {
                    Event::Value(inner) => {
                        let start_now = {
                            let mut st = state.lock();
                            if st.inner_running {
                                st.queue.push_back(inner.clone());
                                false
                            } else {
                                st.inner_running = true;
                                true
                            }
                        };
                        if start_now {
                            start_inner(
                                inner,
                                Arc::clone(&state),
                                current.clone(),
                                observer.clone(),
                            );
                        }
                    }
                    Event::Completed => {
                        let mut st = state.lock();
                        st.outer_completed = true;
                        let done = !st.inner_running;
                        drop(st);
                        if done {
                            observer.send_completed();
                        }
                    }
                    Event::Failed(e) => observer.send_failed(e),
                    Event::Interrupted => observer.send_interrupted(),
                }
            }));
            lifetime.add(started);
        })
    }

    fn flatten_race(&self) -> SignalProducer<V, E> {
        let outer = self.clone();
        SignalProducer::new(move |observer, lifetime| {
            struct RaceState {
                next_id: u64,
                winner: Option<u64>,
                contenders: Vec<(u64, Arc<Box<dyn Disposable>>)>,
                outer_completed: bool,
                any_started: bool,
            }
            let state = Arc::new(Mutex::new(RaceState {
                next_id: 0,
                winner: None,
                contenders: Vec::new(),
                outer_completed: false,
                any_started: false,
            }));

            let started = outer.start(Observer::new({
                let state = Arc::clone(&state);
                let lifetime = lifetime.clone();
                move |event: Event<SignalProducer<V, E>, E>| match event {
                    Event::Value(inner) => {
                        let id = {
                            let mut st = state.lock();
                            if st.winner.is_some() {
                                // Race already decided: never start the
                                // latecomer.
                                return;
                            }
                            st.next_id += 1;
                            st.any_started = true;
                            st.next_id
                        };
                        let inner_observer = Observer::new({
                            let state = Arc::clone(&state);
                            let observer = observer.clone();
                            move |event: Event<V, E>| {
                                let losers = {
                                    let mut st = state.lock();
                                    match st.winner {
                                        Some(winner) if winner != id => return,
                                        Some(_) => Vec::new(),
                                        None => {
                                            st.winner = Some(id);
                                            let (keep, lose): (Vec<_>, Vec<_>) = st
                                                .contenders
                                                .drain(..)
                                                .partition(|(cid, _)| *cid == id);
                                            st.contenders = keep;
                                            lose
                                        }
                                    }
                                };
                                for (_, loser) in losers {
                                    loser.dispose();
                                }
                                observer.send(event);
                            }
                        });
                        let handle = Arc::new(inner.start(inner_observer));
                        lifetime.add(Arc::clone(&handle));
                        let mut st = state.lock();
                        match st.winner {
                            Some(winner) if winner != id => {
                                drop(st);
                                handle.dispose();
                            }
                            _ => st.contenders.push((id, handle)),
                        }
                    }
                    Event::Completed => {
                        let mut st = state.lock();
                        st.outer_completed = true;
                        let no_contender = !st.any_started;
                        drop(st);
                        if no_contender {
                            observer.send_completed();
                        }
                    }
                    Event::Failed(e) => observer.send_failed(e),
                    Event::Interrupted => observer.send_interrupted(),
                }
            }));
            lifetime.add(started);
        })
    }
}

impl<V: Clone + Send + 'static, E: Clone + Send + 'static> SignalProducer<V, E> {
    /// Map every value to an inner producer and flatten with `strategy`.
    pub fn flat_map<U: Clone + Send + 'static>(
        &self,
        strategy: FlattenStrategy,
        f: impl Fn(V) -> SignalProducer<U, E> + Send + Sync + 'static,
    ) -> SignalProducer<U, E> {
        self.map(f).flatten(strategy)
    }

    /// Map a failure to a replacement producer, switching the error type.
    ///
    /// Values and completion forward untouched; on `Failed(e)` the stream
    /// continues with `f(e)`.
    pub fn flat_map_error<F: Clone + Send + 'static>(
        &self,
        f: impl Fn(E) -> SignalProducer<V, F> + Send + Sync + 'static,
    ) -> SignalProducer<V, F> {
        let source = self.clone();
        let f = Arc::new(f);
        SignalProducer::new(move |observer, lifetime| {
            let f = Arc::clone(&f);
            let started = source.start(Observer::new({
                let lifetime = lifetime.clone();
                move |event: Event<V, E>| match event {
                    Event::Value(v) => observer.send_value(v),
                    Event::Completed => observer.send_completed(),
                    Event::Interrupted => observer.send_interrupted(),
                    Event::Failed(e) => {
                        let replacement = f(e);
                        lifetime.add(replacement.start(observer.clone()));
                    }
                }
            }));
            lifetime.add(started);
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
