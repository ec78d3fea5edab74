//! SignalProducer: a cold, restartable recipe for signals.
//!
//! A producer holds only a start function. Every [`start`](SignalProducer::start)
//! builds a fresh pipe, an interrupting composite disposable, and a
//! [`Lifetime`] tied to that disposable, then hands the pipe's input observer
//! and the lifetime to the recipe. Two starts share nothing: disposing one
//! has no effect on the other.
//!
//! Producer-level operators come from one mechanism —
//! [`lift`](SignalProducer::lift) threads a signal operator through start —
//! plus the producer-only combinators in [`flatten`] and [`repeat`], which
//! need restartability and therefore cannot exist at signal level.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::disposable::{AnyDisposable, CompositeDisposable, Disposable};
use crate::event::{Event, Never};
use crate::lifetime::Lifetime;
use crate::observer::Observer;
use crate::scheduler::{DateScheduler, Scheduler};
use crate::signal::Signal;

pub mod flatten;
pub mod repeat;

pub use flatten::FlattenStrategy;

// ---------------------------------------------------------------------------
// SignalProducer
// ---------------------------------------------------------------------------

/// A cold stream recipe: each start materializes an independent signal.
pub struct SignalProducer<V, E = Never> {
    start_fn: Arc<dyn Fn(Observer<V, E>, Lifetime) + Send + Sync>,
}

impl<V, E> Clone for SignalProducer<V, E> {
    fn clone(&self) -> Self {
        Self {
            start_fn: Arc::clone(&self.start_fn),
        }
    }
}

impl<V: Clone + Send + 'static, E: Clone + Send + 'static> SignalProducer<V, E> {
    /// Wrap a start function.
    ///
    /// On each start the function receives an observer feeding the produced
    /// signal and a lifetime that ends when the start is disposed or the
    /// signal terminates. Work begun by the recipe should attach its
    /// cancellation to that lifetime.
    pub fn new(start_fn: impl Fn(Observer<V, E>, Lifetime) + Send + Sync + 'static) -> Self {
        Self {
            start_fn: Arc::new(start_fn),
        }
    }

    /// A producer emitting one value, then completing.
    pub fn of(value: V) -> Self {
        let value = Mutex::new(value);
        Self::new(move |observer, _lifetime| {
            observer.send_value(value.lock().clone());
            observer.send_completed();
        })
    }

    /// A producer failing immediately.
    pub fn failed(error: E) -> Self {
        let error = Mutex::new(error);
        Self::new(move |observer, _lifetime| {
            observer.send_failed(error.lock().clone());
        })
    }

    /// A producer completing immediately without values.
    pub fn empty() -> Self {
        Self::new(|observer, _lifetime| {
            observer.send_completed();
        })
    }

    /// A producer that never sends anything.
    pub fn never() -> Self {
        Self::new(|_observer, _lifetime| {})
    }

    /// A producer replaying a fixed sequence of values, then completing.
    pub fn from_values(values: impl IntoIterator<Item = V>) -> Self {
        let values = Mutex::new(values.into_iter().collect::<Vec<V>>());
        Self::new(move |observer, _lifetime| {
            for value in values.lock().iter().cloned() {
                observer.send_value(value);
            }
            observer.send_completed();
        })
    }

    // ── Starting ─────────────────────────────────────────────────────

    /// Materialize the recipe and attach `observer` to the produced signal.
    ///
    /// Returns the start's interrupting disposable: disposing it sends
    /// `Interrupted` to `observer` and cancels everything the recipe
    /// attached to its lifetime. The disposable is also disposed
    /// automatically when the produced signal terminates.
    pub fn start(&self, observer: Observer<V, E>) -> Box<dyn Disposable> {
        self.start_with_signal(move |signal, disposables| {
            if let Some(subscription) = signal.observe(observer) {
                disposables.add(subscription);
            }
        })
    }

    /// Materialize the recipe, exposing the produced signal before any event
    /// flows — the hook for multicasting a single start.
    ///
    /// `setup` runs with the signal and the start's composite disposable;
    /// only after it returns does the recipe execute. If `setup` disposes
    /// the composite, the recipe never runs.
    pub fn start_with_signal(
        &self,
        setup: impl FnOnce(&Signal<V, E>, &CompositeDisposable),
    ) -> Box<dyn Disposable> {
        let disposables = CompositeDisposable::new();
        let (signal, input, _interrupter) = Signal::pipe();

        // First child: disposing the composite interrupts the signal. Added
        // before any subscription so interested observers still hear it.
        {
            let input = input.clone();
            disposables.add(AnyDisposable::new(move || input.send_interrupted()));
        }

        // Terminal watchdog: a naturally terminating signal tears the whole
        // start down, releasing upstream resources. The strong reference is
        // deliberate — it keeps a fire-and-forget start alive until its
        // terminal arrives.
        {
            let watchdog = disposables.clone();
            signal.observe(Observer::new(move |event: Event<V, E>| {
                if event.is_terminal() {
                    watchdog.dispose();
                }
            }));
        }

        setup(&signal, &disposables);
        if disposables.is_disposed() {
            return Box::new(disposables);
        }

        let lifetime = Lifetime::ending_with(&disposables);
        (self.start_fn)(input, lifetime);
        Box::new(disposables)
    }

    /// Start, observing only values.
    pub fn start_with_values(&self, f: impl Fn(V) + Send + Sync + 'static) -> Box<dyn Disposable> {
        self.start(Observer::new(move |event| {
            if let Event::Value(v) = event {
                f(v);
            }
        }))
    }

    /// Start, observing values and failures as `Result`s.
    pub fn start_with_result(
        &self,
        f: impl Fn(Result<V, E>) + Send + Sync + 'static,
    ) -> Box<dyn Disposable> {
        self.start(Observer::new(move |event: Event<V, E>| {
            if let Some(result) = event.into_result() {
                f(result);
            }
        }))
    }

    /// Start, observing only completion.
    pub fn start_with_completed(
        &self,
        f: impl Fn() + Send + Sync + 'static,
    ) -> Box<dyn Disposable> {
        self.start(Observer::new(move |event: Event<V, E>| {
            if matches!(event, Event::Completed) {
                f();
            }
        }))
    }

    // ── Lifting ──────────────────────────────────────────────────────

    /// Promote a signal operator to this producer.
    ///
    /// The produced signal is the image of the recipe's signal under `op`;
    /// this is the single mechanism behind every lifted operator below.
    pub fn lift<U: Clone + Send + 'static, F: Clone + Send + 'static>(
        &self,
        op: impl Fn(&Signal<V, E>) -> Signal<U, F> + Send + Sync + 'static,
    ) -> SignalProducer<U, F> {
        let source = self.clone();
        let op = Arc::new(op);
        SignalProducer::new(move |observer, lifetime| {
            let op = Arc::clone(&op);
            let started = source.start_with_signal(move |signal, disposables| {
                let transformed = op(signal);
                if let Some(subscription) = transformed.observe(observer) {
                    disposables.add(subscription);
                }
            });
            lifetime.add(started);
        })
    }

    /// Promote a binary signal operator, starting both producers inside one
    /// outer lifetime. `self` starts first, `other` second; both starts are
    /// torn down together.
    fn lift2<U: Clone + Send + 'static, W: Clone + Send + 'static>(
        &self,
        other: &SignalProducer<U, E>,
        op: impl Fn(&Signal<V, E>, &Signal<U, E>) -> Signal<W, E> + Send + Sync + 'static,
    ) -> SignalProducer<W, E> {
        let left = self.clone();
        let right = other.clone();
        let op = Arc::new(op);
        SignalProducer::new(move |observer, lifetime| {
            let op = Arc::clone(&op);
            let right = right.clone();
            let outer_lifetime = lifetime.clone();
            let left_started = left.start_with_signal(move |left_signal, _| {
                let left_signal = left_signal.clone();
                let inner_lifetime = outer_lifetime.clone();
                let right_started = right.start_with_signal(move |right_signal, _| {
                    let combined = op(&left_signal, right_signal);
                    if let Some(subscription) = combined.observe(observer) {
                        inner_lifetime.add(subscription);
                    }
                });
                outer_lifetime.add(right_started);
            });
            lifetime.add(left_started);
        })
    }

    // ── Lifted operators ─────────────────────────────────────────────

    /// [`Signal::map`], lifted.
    pub fn map<U: Clone + Send + 'static>(
        &self,
        f: impl Fn(V) -> U + Send + Sync + 'static,
    ) -> SignalProducer<U, E> {
        let f = Arc::new(f);
        self.lift(move |signal| {
            let f = Arc::clone(&f);
            signal.map(move |v| f(v))
        })
    }

    /// [`Signal::map_error`], lifted.
    pub fn map_error<F: Clone + Send + 'static>(
        &self,
        f: impl Fn(E) -> F + Send + Sync + 'static,
    ) -> SignalProducer<V, F> {
        let f = Arc::new(f);
        self.lift(move |signal| {
            let f = Arc::clone(&f);
            signal.map_error(move |e| f(e))
        })
    }

    /// [`Signal::filter`], lifted.
    pub fn filter(&self, predicate: impl Fn(&V) -> bool + Send + Sync + 'static) -> Self {
        let predicate = Arc::new(predicate);
        self.lift(move |signal| {
            let predicate = Arc::clone(&predicate);
            signal.filter(move |v| predicate(v))
        })
    }

    /// [`Signal::filter_map`], lifted.
    pub fn filter_map<U: Clone + Send + 'static>(
        &self,
        f: impl Fn(V) -> Option<U> + Send + Sync + 'static,
    ) -> SignalProducer<U, E> {
        let f = Arc::new(f);
        self.lift(move |signal| {
            let f = Arc::clone(&f);
            signal.filter_map(move |v| f(v))
        })
    }

    /// [`Signal::scan`], lifted.
    pub fn scan<A: Clone + Send + 'static>(
        &self,
        initial: A,
        f: impl Fn(A, V) -> A + Send + Sync + 'static,
    ) -> SignalProducer<A, E> {
        let f = Arc::new(f);
        let initial = Mutex::new(initial);
        self.lift(move |signal| {
            let f = Arc::clone(&f);
            signal.scan(initial.lock().clone(), move |acc, v| f(acc, v))
        })
    }

    /// [`Signal::take`], lifted.
    pub fn take(&self, count: usize) -> Self {
        self.lift(move |signal| signal.take(count))
    }

    /// [`Signal::take_while`], lifted.
    pub fn take_while(&self, predicate: impl Fn(&V) -> bool + Send + Sync + 'static) -> Self {
        let predicate = Arc::new(predicate);
        self.lift(move |signal| {
            let predicate = Arc::clone(&predicate);
            signal.take_while(move |v| predicate(v))
        })
    }

    /// [`Signal::take_until`], lifted; the trigger stays a hot signal.
    pub fn take_until(&self, trigger: &Signal<(), Never>) -> Self {
        let trigger = trigger.clone();
        self.lift(move |signal| signal.take_until(&trigger))
    }

    /// [`Signal::take_during`], lifted.
    pub fn take_during(&self, lifetime: &Lifetime) -> Self {
        let lifetime = lifetime.clone();
        self.lift(move |signal| signal.take_during(&lifetime))
    }

    /// [`Signal::skip`], lifted.
    pub fn skip(&self, count: usize) -> Self {
        self.lift(move |signal| signal.skip(count))
    }

    /// [`Signal::skip_while`], lifted.
    pub fn skip_while(&self, predicate: impl Fn(&V) -> bool + Send + Sync + 'static) -> Self {
        let predicate = Arc::new(predicate);
        self.lift(move |signal| {
            let predicate = Arc::clone(&predicate);
            signal.skip_while(move |v| predicate(v))
        })
    }

    /// [`Signal::skip_repeats_by`], lifted.
    pub fn skip_repeats_by(&self, eq: impl Fn(&V, &V) -> bool + Send + Sync + 'static) -> Self {
        let eq = Arc::new(eq);
        self.lift(move |signal| {
            let eq = Arc::clone(&eq);
            signal.skip_repeats_by(move |a, b| eq(a, b))
        })
    }

    /// [`Signal::materialize`], lifted.
    pub fn materialize(&self) -> SignalProducer<Event<V, E>, Never> {
        self.lift(|signal| signal.materialize())
    }

    /// [`Signal::observe_on`], lifted.
    pub fn observe_on(&self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.lift(move |signal| signal.observe_on(Arc::clone(&scheduler)))
    }

    /// [`Signal::delay`], lifted.
    pub fn delay(&self, interval: Duration, scheduler: Arc<dyn DateScheduler>) -> Self {
        self.lift(move |signal| signal.delay(interval, Arc::clone(&scheduler)))
    }

    /// [`Signal::debounce`], lifted.
    pub fn debounce(&self, interval: Duration, scheduler: Arc<dyn DateScheduler>) -> Self {
        self.lift(move |signal| signal.debounce(interval, Arc::clone(&scheduler)))
    }

    /// [`Signal::throttle`], lifted.
    pub fn throttle(&self, interval: Duration, scheduler: Arc<dyn DateScheduler>) -> Self {
        self.lift(move |signal| signal.throttle(interval, Arc::clone(&scheduler)))
    }

    /// [`Signal::zip`], lifted over both producers.
    pub fn zip<U: Clone + Send + 'static>(
        &self,
        other: &SignalProducer<U, E>,
    ) -> SignalProducer<(V, U), E> {
        self.lift2(other, |a, b| a.zip(b))
    }

    /// [`Signal::combine_latest`], lifted over both producers.
    pub fn combine_latest<U: Clone + Send + 'static>(
        &self,
        other: &SignalProducer<U, E>,
    ) -> SignalProducer<(V, U), E> {
        self.lift2(other, |a, b| a.combine_latest(b))
    }

    /// [`Signal::merge_with`], lifted over both producers.
    pub fn merge_with(&self, other: &SignalProducer<V, E>) -> Self {
        self.lift2(other, |a, b| a.merge_with(b))
    }

    /// [`Signal::sample_on`], lifted; the sampler stays a hot signal.
    pub fn sample_on(&self, sampler: &Signal<(), Never>) -> Self {
        let sampler = sampler.clone();
        self.lift(move |signal| signal.sample_on(&sampler))
    }

    /// [`Signal::with_latest_from`], lifted; `other` stays a hot signal.
    pub fn with_latest_from<U: Clone + Send + 'static>(
        &self,
        other: &Signal<U, E>,
    ) -> SignalProducer<(V, U), E> {
        let other = other.clone();
        self.lift(move |signal| signal.with_latest_from(&other))
    }
}

impl<V: Clone + Send + 'static, E: Clone + Send + 'static> SignalProducer<Event<V, E>, Never> {
    /// [`Signal::dematerialize`], lifted.
    pub fn dematerialize(&self) -> SignalProducer<V, E> {
        self.lift(|signal| signal.dematerialize())
    }
}

impl<V: Clone + Send + PartialEq + 'static, E: Clone + Send + 'static> SignalProducer<V, E> {
    /// [`Signal::skip_repeats`], lifted.
    pub fn skip_repeats(&self) -> Self {
        self.skip_repeats_by(|a, b| a == b)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
