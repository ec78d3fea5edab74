//! Signal: a hot, multicast, push-based event stream.
//!
//! A [`Signal`] fans events out to every registered observer in one total
//! order and delivers at most one terminal event over its lifetime. The
//! serialization point is the *send slot*: a mutex-guarded per-signal queue.
//! Nested sends (an observer's handler sending back into the same signal)
//! and concurrent sends from other threads enqueue and return; the thread
//! currently draining the queue delivers them afterwards, so the observable
//! order is strictly serial.
//!
//! Operators live in submodules: [`operators`] (per-value transforms and
//! slicing), [`combine`] (multi-signal combinators), [`time`]
//! (scheduler-driven operators).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};

use crate::disposable::{AnyDisposable, Disposable};
use crate::event::Event;
use crate::observer::Observer;

pub mod combine;
pub mod operators;
pub mod time;

new_key_type! {
    /// Stable key for one subscription in a signal's observer registry.
    pub struct SubscriptionKey;
}

// ---------------------------------------------------------------------------
// Core state
// ---------------------------------------------------------------------------

struct CoreState<V, E> {
    /// Registered observers. Drained and cleared by the first terminal.
    observers: SlotMap<SubscriptionKey, Observer<V, E>>,
    /// The send slot's pending events.
    queue: VecDeque<Event<V, E>>,
    /// Some thread is currently draining `queue`; new sends just enqueue.
    draining: bool,
    /// A terminal has been accepted into the queue; later sends are dropped.
    terminal_seen: bool,
    /// The terminal has been delivered; the registry is cleared and late
    /// observers receive `Interrupted`.
    terminated: bool,
    /// Disposed on termination, or on core drop if no terminal ever arrived.
    generator: Option<Box<dyn Disposable>>,
}

pub(crate) struct SignalCore<V, E> {
    state: Mutex<CoreState<V, E>>,
}

impl<V, E> SignalCore<V, E> {
    fn new() -> Self {
        Self {
            state: Mutex::new(CoreState {
                observers: SlotMap::with_key(),
                queue: VecDeque::new(),
                draining: false,
                terminal_seen: false,
                terminated: false,
                generator: None,
            }),
        }
    }
}

impl<V, E> Drop for SignalCore<V, E> {
    fn drop(&mut self) {
        // An orphaned signal (no handles, no input observer, no terminal)
        // interrupts its generator's work but synthesizes no event — there is
        // nobody left to hear one.
        let generator = self.state.get_mut().generator.take();
        if let Some(generator) = generator {
            generator.dispose();
        }
    }
}

impl<V: Clone + Send + 'static, E: Clone + Send + 'static> SignalCore<V, E> {
    /// The send slot. Accepts an event, then either drains the queue (if no
    /// other drain is active) or returns immediately, leaving delivery to
    /// the active drainer.
    fn send(&self, event: Event<V, E>) {
        let mut state = self.state.lock();
        if state.terminal_seen {
            return;
        }
        if event.is_terminal() {
            state.terminal_seen = true;
        }
        state.queue.push_back(event);
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

            if event.is_terminal() {
                state.terminated = true;
                state.draining = false;
                state.queue.clear();
                let observers: Vec<Observer<V, E>> =
                    state.observers.drain().map(|(_, observer)| observer).collect();
                let generator = state.generator.take();
                drop(state);

                if let Some(generator) = generator {
                    generator.dispose();
                }
                for observer in &observers {
                    observer.send(event.clone());
                }
                return;
            }

            let observers: Vec<Observer<V, E>> = state.observers.values().cloned().collect();
            drop(state);
            for observer in &observers {
                observer.send(event.clone());
            }
            state = self.state.lock();
        }
    }

    fn observe(self: &Arc<Self>, observer: Observer<V, E>) -> Option<SubscriptionDisposable<V, E>> {
        let mut state = self.state.lock();
        if state.terminated {
            drop(state);
            observer.send(Event::Interrupted);
            return None;
        }
        let key = state.observers.insert(observer);
        drop(state);
        Some(SubscriptionDisposable {
            core: Arc::downgrade(self),
            key,
            disposed: Arc::new(AtomicBool::new(false)),
        })
    }
}

// ---------------------------------------------------------------------------
// SubscriptionDisposable
// ---------------------------------------------------------------------------

/// Detaches one observer from a signal without affecting the others.
///
/// Holds only a weak back-reference to the signal core, so an outstanding
/// subscription disposable never keeps a dead signal alive.
pub struct SubscriptionDisposable<V, E> {
    core: Weak<SignalCore<V, E>>,
    key: SubscriptionKey,
    disposed: Arc<AtomicBool>,
}

impl<V, E> Clone for SubscriptionDisposable<V, E> {
    fn clone(&self) -> Self {
        Self {
            core: Weak::clone(&self.core),
            key: self.key,
            disposed: Arc::clone(&self.disposed),
        }
    }
}

impl<V: Send + 'static, E: Send + 'static> Disposable for SubscriptionDisposable<V, E> {
    fn dispose(&self) {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if let Some(core) = self.core.upgrade() {
            core.state.lock().observers.remove(self.key);
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// A hot multicast event stream.
///
/// Clones are handles onto the same stream. Constructing a signal runs its
/// generator synchronously; the generator receives the signal's input
/// observer and may return a disposable that interrupts the work feeding the
/// signal. That disposable fires on the first terminal event, or when the
/// signal is collected without one.
pub struct Signal<V, E = crate::event::Never> {
    core: Arc<SignalCore<V, E>>,
}

impl<V, E> Clone for Signal<V, E> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<V: Clone + Send + 'static, E: Clone + Send + 'static> Signal<V, E> {
    /// Create a signal from a generator.
    ///
    /// The generator is invoked synchronously with the signal's input
    /// observer. Its returned disposable becomes the *generator disposable*,
    /// disposed exactly once: on the first terminal event, or when the
    /// signal is dropped without ever terminating.
    pub fn new(
        generator: impl FnOnce(Observer<V, E>) -> Option<Box<dyn Disposable>>,
    ) -> Self {
        let core = Arc::new(SignalCore::new());
        let input = Observer::new({
            let core = Arc::clone(&core);
            move |event| core.send(event)
        });
        let generator_disposable = generator(input);
        if let Some(disposable) = generator_disposable {
            let mut state = core.state.lock();
            if state.terminated {
                // The generator terminated the signal before returning.
                drop(state);
                disposable.dispose();
            } else {
                state.generator = Some(disposable);
            }
        }
        Self { core }
    }

    /// A manually driven signal: `(output, input, interrupter)`.
    ///
    /// Events sent to `input` appear on `output`; disposing `interrupter`
    /// sends `Interrupted`.
    pub fn pipe() -> (Signal<V, E>, Observer<V, E>, AnyDisposable) {
        let core = Arc::new(SignalCore::new());
        let signal = Signal {
            core: Arc::clone(&core),
        };
        let input = Observer::new({
            let core = Arc::clone(&core);
            move |event| core.send(event)
        });
        let interrupter = AnyDisposable::new({
            let input = input.clone();
            move || input.send_interrupted()
        });
        (signal, input, interrupter)
    }

    /// Register `observer`.
    ///
    /// If the signal has already terminated, `observer` synchronously
    /// receives exactly `Interrupted` and `None` is returned. Otherwise the
    /// returned disposable removes `observer` — and only `observer` — from
    /// the registry.
    pub fn observe(&self, observer: Observer<V, E>) -> Option<SubscriptionDisposable<V, E>> {
        self.core.observe(observer)
    }

    /// Observe only `Value` events.
    pub fn observe_values(
        &self,
        f: impl Fn(V) + Send + Sync + 'static,
    ) -> Option<SubscriptionDisposable<V, E>> {
        self.observe(Observer::new(move |event| {
            if let Event::Value(v) = event {
                f(v);
            }
        }))
    }

    /// Observe values and failures as a `Result`, ignoring the neutral
    /// terminals.
    pub fn observe_result(
        &self,
        f: impl Fn(Result<V, E>) + Send + Sync + 'static,
    ) -> Option<SubscriptionDisposable<V, E>> {
        self.observe(Observer::new(move |event: Event<V, E>| {
            if let Some(result) = event.into_result() {
                f(result);
            }
        }))
    }

    /// Observe only `Completed`.
    pub fn observe_completed(
        &self,
        f: impl Fn() + Send + Sync + 'static,
    ) -> Option<SubscriptionDisposable<V, E>> {
        self.observe(Observer::new(move |event: Event<V, E>| {
            if matches!(event, Event::Completed) {
                f();
            }
        }))
    }

    /// Observe only `Failed`.
    pub fn observe_failed(
        &self,
        f: impl Fn(E) + Send + Sync + 'static,
    ) -> Option<SubscriptionDisposable<V, E>> {
        self.observe(Observer::new(move |event| {
            if let Event::Failed(e) = event {
                f(e);
            }
        }))
    }

    /// Observe only `Interrupted`.
    pub fn observe_interrupted(
        &self,
        f: impl Fn() + Send + Sync + 'static,
    ) -> Option<SubscriptionDisposable<V, E>> {
        self.observe(Observer::new(move |event: Event<V, E>| {
            if matches!(event, Event::Interrupted) {
                f();
            }
        }))
    }

    /// Whether the signal has delivered its terminal event.
    pub fn is_terminated(&self) -> bool {
        self.core.state.lock().terminated
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Never;
    use crate::testing::EventCollector;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn pipe_multicasts_in_order() {
        let (signal, input, _interrupter) = Signal::<i32, Never>::pipe();
        let a = EventCollector::new();
        let b = EventCollector::new();
        signal.observe(a.observer());
        signal.observe(b.observer());

        input.send_value(1);
        input.send_value(2);
        input.send_completed();

        let expected = vec![Event::Value(1), Event::Value(2), Event::Completed];
        assert_eq!(a.events(), expected);
        assert_eq!(b.events(), expected);
    }

    #[test]
    fn at_most_one_terminal() {
        let (signal, input, _interrupter) = Signal::<i32, &str>::pipe();
        let collector = EventCollector::new();
        signal.observe(collector.observer());

        input.send_completed();
        input.send_failed("late");
        input.send_value(7);
        input.send_interrupted();

        assert_eq!(collector.events(), vec![Event::Completed]);
    }

    #[test]
    fn late_subscriber_gets_exactly_interrupted() {
        let (signal, input, _interrupter) = Signal::<i32, Never>::pipe();
        input.send_value(1);
        input.send_completed();

        let collector = EventCollector::new();
        let handle = signal.observe(collector.observer());
        assert!(handle.is_none());
        assert_eq!(collector.events(), vec![Event::Interrupted]);
    }

    #[test]
    fn subscription_disposal_detaches_only_one_observer() {
        let (signal, input, _interrupter) = Signal::<i32, Never>::pipe();
        let a = EventCollector::new();
        let b = EventCollector::new();
        let handle_a = signal.observe(a.observer()).unwrap();
        signal.observe(b.observer());

        input.send_value(1);
        handle_a.dispose();
        input.send_value(2);

        assert_eq!(a.events(), vec![Event::Value(1)]);
        assert_eq!(b.events(), vec![Event::Value(1), Event::Value(2)]);
    }

    #[test]
    fn reentrant_send_is_serialized_after_current_event() {
        let (signal, input, _interrupter) = Signal::<i32, Never>::pipe();
        let collector = EventCollector::new();

        // The first observer echoes 10*v back into the pipe for small v; the
        // echo must arrive after the current event has reached everyone.
        let echo = input.clone();
        signal.observe_values(move |v| {
            if v < 10 {
                echo.send_value(v * 10);
            }
        });
        signal.observe(collector.observer());

        input.send_value(1);
        input.send_value(2);

        assert_eq!(
            collector.events(),
            vec![
                Event::Value(1),
                Event::Value(10),
                Event::Value(2),
                Event::Value(20),
            ]
        );
    }

    #[test]
    fn terminal_disposes_generator_disposable() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_c = Arc::clone(&count);
        let (signal, input, _interrupter) = Signal::<i32, Never>::pipe();

        // A generator-backed signal forwarding the pipe.
        let forwarded: Signal<i32, Never> = Signal::new(move |observer| {
            let sub = signal.observe(observer).map(|d| Box::new(d) as Box<dyn Disposable>);
            Some(Box::new(crate::disposable::AnyDisposable::new(move || {
                count_c.fetch_add(1, Ordering::SeqCst);
                if let Some(sub) = &sub {
                    sub.dispose();
                }
            })))
        });
        let collector = EventCollector::new();
        forwarded.observe(collector.observer());

        input.send_value(3);
        input.send_completed();
        input.send_completed();

        assert_eq!(collector.events(), vec![Event::Value(3), Event::Completed]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn orphaned_signal_disposes_generator_without_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_c = Arc::clone(&count);
        {
            let _signal: Signal<i32, Never> = Signal::new(move |_observer| {
                Some(Box::new(crate::disposable::AnyDisposable::new(move || {
                    count_c.fetch_add(1, Ordering::SeqCst);
                })) as Box<dyn Disposable>)
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pipe_interrupter_interrupts_all_observers() {
        let (signal, input, interrupter) = Signal::<i32, Never>::pipe();
        let collector = EventCollector::new();
        signal.observe(collector.observer());

        input.send_value(1);
        interrupter.dispose();
        input.send_value(2);

        assert_eq!(collector.events(), vec![Event::Value(1), Event::Interrupted]);
    }

    #[test]
    fn concurrent_sends_keep_a_single_total_order() {
        let (signal, input, _interrupter) = Signal::<(u8, i32), Never>::pipe();
        let collector = EventCollector::new();
        signal.observe(collector.observer());

        let threads: Vec<_> = (0u8..4)
            .map(|t| {
                let input = input.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        input.send_value((t, i));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        // Per-sender order must be preserved inside the single total order.
        let events = collector.events();
        assert_eq!(events.len(), 200);
        for t in 0u8..4 {
            let per_thread: Vec<i32> = events
                .iter()
                .filter_map(|event| match event {
                    Event::Value((thread, i)) if *thread == t => Some(*i),
                    _ => None,
                })
                .collect();
            assert_eq!(per_thread, (0..50).collect::<Vec<_>>());
        }
    }
}
