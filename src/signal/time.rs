//! Scheduler-driven operators: re-dispatch, delay, debounce, throttle.
//!
//! All timing decisions go through [`DateScheduler::current_instant`] so a
//! virtual-time scheduler fully controls these operators. Each operator
//! carries an `active` flag flipped by its generator disposable: work already
//! handed to the scheduler checks the flag before delivering, so nothing
//! runs after disposal completes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::disposable::{AnyDisposable, CompositeDisposable, Disposable, SerialDisposable};
use crate::event::Event;
use crate::observer::Observer;
use crate::scheduler::{DateScheduler, Scheduler};

use super::Signal;

impl<V: Clone + Send + 'static, E: Clone + Send + 'static> Signal<V, E> {
    /// Re-dispatch every event through `scheduler`.
    ///
    /// The scheduler is serial, so within-signal ordering is preserved.
    /// Disposal cancels any re-dispatched event that has not yet run.
    pub fn observe_on(&self, scheduler: Arc<dyn Scheduler>) -> Signal<V, E> {
        let source = self.clone();
        Signal::new(move |observer| {
            let disposables = CompositeDisposable::new();
            let active = Arc::new(AtomicBool::new(true));

            let flag = Arc::clone(&active);
            disposables.add(AnyDisposable::new(move || {
                flag.store(false, Ordering::Release);
            }));

            if let Some(sub) = source.observe(Observer::new(move |event: Event<V, E>| {
                if !active.load(Ordering::Acquire) {
                    return;
                }
                let observer = observer.clone();
                let active = Arc::clone(&active);
                scheduler.schedule(Box::new(move || {
                    if active.load(Ordering::Acquire) {
                        observer.send(event);
                    }
                }));
            })) {
                disposables.add(sub);
            }

            Some(Box::new(disposables) as Box<dyn Disposable>)
        })
    }

    /// Delay values and completion by `interval`; failures and interrupts
    /// are re-dispatched without the delay.
    pub fn delay(&self, interval: Duration, scheduler: Arc<dyn DateScheduler>) -> Signal<V, E> {
        let source = self.clone();
        Signal::new(move |observer| {
            let disposables = CompositeDisposable::new();
            let active = Arc::new(AtomicBool::new(true));

            let flag = Arc::clone(&active);
            disposables.add(AnyDisposable::new(move || {
                flag.store(false, Ordering::Release);
            }));

            if let Some(sub) = source.observe(Observer::new(move |event: Event<V, E>| {
                if !active.load(Ordering::Acquire) {
                    return;
                }
                let delayed = matches!(event, Event::Value(_) | Event::Completed);
                let observer = observer.clone();
                let active = Arc::clone(&active);
                let deliver: Box<dyn FnOnce() + Send> = Box::new(move || {
                    if active.load(Ordering::Acquire) {
                        observer.send(event);
                    }
                });
                if delayed {
                    let at = scheduler.current_instant() + interval;
                    scheduler.schedule_after(at, deliver);
                } else {
                    scheduler.schedule(deliver);
                }
            })) {
                disposables.add(sub);
            }

            Some(Box::new(disposables) as Box<dyn Disposable>)
        })
    }

    /// Forward a value only after `interval` has passed without another one.
    ///
    /// Every value re-arms the timer and replaces the pending value.
    /// Completion discards any pending value and forwards immediately (on
    /// the scheduler); so do failures and interrupts.
    pub fn debounce(&self, interval: Duration, scheduler: Arc<dyn DateScheduler>) -> Signal<V, E> {
        let source = self.clone();
        Signal::new(move |observer| {
            let disposables = CompositeDisposable::new();
            let active = Arc::new(AtomicBool::new(true));
            let pending = SerialDisposable::new();

            let flag = Arc::clone(&active);
            disposables.add(AnyDisposable::new(move || {
                flag.store(false, Ordering::Release);
            }));
            disposables.add(pending.clone());

            if let Some(sub) = source.observe(Observer::new(move |event: Event<V, E>| {
                if !active.load(Ordering::Acquire) {
                    return;
                }
                match event {
                    Event::Value(v) => {
                        let observer = observer.clone();
                        let active = Arc::clone(&active);
                        let at = scheduler.current_instant() + interval;
                        let handle = scheduler.schedule_after(
                            at,
                            Box::new(move || {
                                if active.load(Ordering::Acquire) {
                                    observer.send_value(v);
                                }
                            }),
                        );
                        match handle {
                            Some(handle) => pending.set_inner(handle),
                            None => pending.clear(),
                        }
                    }
                    terminal => {
                        pending.clear();
                        let observer = observer.clone();
                        let active = Arc::clone(&active);
                        scheduler.schedule(Box::new(move || {
                            if active.load(Ordering::Acquire) {
                                observer.send(terminal);
                            }
                        }));
                    }
                }
            })) {
                disposables.add(sub);
            }

            Some(Box::new(disposables) as Box<dyn Disposable>)
        })
    }

    /// Forward at most one value per `interval`.
    ///
    /// A value arriving outside the window is forwarded at once (the leading
    /// edge); values inside the window replace a retained latest that is
    /// emitted when the window closes (the trailing edge). Terminals forward
    /// immediately, dropping any retained value.
    pub fn throttle(&self, interval: Duration, scheduler: Arc<dyn DateScheduler>) -> Signal<V, E> {
        let source = self.clone();
        Signal::new(move |observer| {
            struct ThrottleState<V> {
                last_emit: Option<std::time::Instant>,
                pending: Option<V>,
                trailing_armed: bool,
            }

            let disposables = CompositeDisposable::new();
            let active = Arc::new(AtomicBool::new(true));
            let trailing = SerialDisposable::new();
            let state = Arc::new(Mutex::new(ThrottleState::<V> {
                last_emit: None,
                pending: None,
                trailing_armed: false,
            }));

            let flag = Arc::clone(&active);
            disposables.add(AnyDisposable::new(move || {
                flag.store(false, Ordering::Release);
            }));
            disposables.add(trailing.clone());

            if let Some(sub) = source.observe(Observer::new(move |event: Event<V, E>| {
                if !active.load(Ordering::Acquire) {
                    return;
                }
                match event {
                    Event::Value(v) => {
                        let now = scheduler.current_instant();
                        let mut st = state.lock();
                        let window_open = st
                            .last_emit
                            .is_some_and(|last| now < last + interval);
                        if !window_open && !st.trailing_armed {
                            st.last_emit = Some(now);
                            drop(st);
                            let observer = observer.clone();
                            let active = Arc::clone(&active);
                            scheduler.schedule(Box::new(move || {
                                if active.load(Ordering::Acquire) {
                                    observer.send_value(v);
                                }
                            }));
                        } else {
                            st.pending = Some(v);
                            if !st.trailing_armed {
                                st.trailing_armed = true;
                                let fire_at = st
                                    .last_emit
                                    .expect("window open implies a prior emission")
                                    + interval;
                                drop(st);
                                let observer = observer.clone();
                                let active = Arc::clone(&active);
                                let state = Arc::clone(&state);
                                let handle = scheduler.schedule_after(
                                    fire_at,
                                    Box::new(move || {
                                        let mut st = state.lock();
                                        st.trailing_armed = false;
                                        let v = st.pending.take();
                                        st.last_emit = Some(fire_at);
                                        drop(st);
                                        if let Some(v) = v {
                                            if active.load(Ordering::Acquire) {
                                                observer.send_value(v);
                                            }
                                        }
                                    }),
                                );
                                if let Some(handle) = handle {
                                    trailing.set_inner(handle);
                                }
                            }
                        }
                    }
                    terminal => {
                        state.lock().pending = None;
                        trailing.clear();
                        let observer = observer.clone();
                        let active = Arc::clone(&active);
                        scheduler.schedule(Box::new(move || {
                            if active.load(Ordering::Acquire) {
                                observer.send(terminal);
                            }
                        }));
                    }
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
    use crate::event::Never;
    use crate::testing::{EventCollector, TestScheduler};

    fn scheduler() -> (Arc<TestScheduler>, Arc<dyn DateScheduler>) {
        let s = Arc::new(TestScheduler::new());
        (Arc::clone(&s), s as Arc<dyn DateScheduler>)
    }

    #[test]
    fn observe_on_defers_to_the_scheduler() {
        let (test, _) = scheduler();
        let (signal, input, _i) = Signal::<i32, Never>::pipe();
        let collector = EventCollector::new();
        signal
            .observe_on(Arc::clone(&test) as Arc<dyn Scheduler>)
            .observe(collector.observer());

        input.send_value(1);
        input.send_value(2);
        assert!(collector.events().is_empty());

        test.advance();
        assert_eq!(collector.values(), vec![1, 2]);
    }

    #[test]
    fn observe_on_disposal_suppresses_pending_dispatches() {
        let (test, _) = scheduler();
        let (signal, input, _i) = Signal::<i32, Never>::pipe();
        let collector = EventCollector::new();
        let observed = signal.observe_on(Arc::clone(&test) as Arc<dyn Scheduler>);
        let handle = observed.observe(collector.observer()).unwrap();

        input.send_value(1);
        test.advance();
        input.send_value(2);
        handle.dispose();
        test.advance();

        // The second dispatch was pending at disposal time; only the
        // subscription was removed, so nothing reaches this observer.
        assert_eq!(collector.values(), vec![1]);
    }

    #[test]
    fn delay_shifts_values_and_completion() {
        let (test, date) = scheduler();
        let (signal, input, _i) = Signal::<i32, Never>::pipe();
        let collector = EventCollector::new();
        signal
            .delay(Duration::from_secs(5), date)
            .observe(collector.observer());

        input.send_value(1);
        input.send_completed();
        test.advance_by(Duration::from_secs(4));
        assert!(collector.events().is_empty());

        test.advance_by(Duration::from_secs(1));
        assert_eq!(
            collector.events(),
            vec![Event::Value(1), Event::Completed]
        );
    }

    #[test]
    fn delay_forwards_failure_without_waiting() {
        let (test, date) = scheduler();
        let (signal, input, _i) = Signal::<i32, &'static str>::pipe();
        let collector = EventCollector::new();
        signal
            .delay(Duration::from_secs(5), date)
            .observe(collector.observer());

        input.send_failed("boom");
        test.advance();
        assert_eq!(collector.events(), vec![Event::Failed("boom")]);
    }

    #[test]
    fn debounce_emits_only_after_quiet_period() {
        let (test, date) = scheduler();
        let (signal, input, _i) = Signal::<i32, Never>::pipe();
        let collector = EventCollector::new();
        signal
            .debounce(Duration::from_secs(1), date)
            .observe(collector.observer());

        input.send_value(1);
        test.advance_by(Duration::from_millis(500));
        input.send_value(2); // re-arms
        test.advance_by(Duration::from_millis(500));
        assert!(collector.values().is_empty());
        test.advance_by(Duration::from_millis(500));
        assert_eq!(collector.values(), vec![2]);
    }

    #[test]
    fn debounce_completion_discards_pending_value() {
        let (test, date) = scheduler();
        let (signal, input, _i) = Signal::<i32, Never>::pipe();
        let collector = EventCollector::new();
        signal
            .debounce(Duration::from_secs(1), date)
            .observe(collector.observer());

        input.send_value(1);
        input.send_completed();
        test.advance_by(Duration::from_secs(2));
        assert_eq!(collector.events(), vec![Event::Completed]);
    }

    #[test]
    fn throttle_leading_then_trailing_latest() {
        let (test, date) = scheduler();
        let (signal, input, _i) = Signal::<i32, Never>::pipe();
        let collector = EventCollector::new();
        signal
            .throttle(Duration::from_secs(1), date)
            .observe(collector.observer());

        input.send_value(1); // leading edge
        test.advance();
        assert_eq!(collector.values(), vec![1]);

        input.send_value(2);
        input.send_value(3); // replaces 2 inside the window
        test.advance_by(Duration::from_secs(1));
        assert_eq!(collector.values(), vec![1, 3]);

        test.advance_by(Duration::from_secs(1));
        input.send_value(4); // window long closed: leading again
        test.advance();
        assert_eq!(collector.values(), vec![1, 3, 4]);
    }
}
