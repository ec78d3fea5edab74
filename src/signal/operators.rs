//! Per-value transforms and slicing operators.
//!
//! Every operator here wraps the source signal in a new signal whose
//! generator subscribes to the source; the subscription becomes the new
//! signal's generator disposable, so disposing downstream propagates
//! upstream through the whole operator chain.

use parking_lot::Mutex;

use crate::disposable::{CompositeDisposable, Disposable};
use crate::event::{Event, Never};
use crate::lifetime::Lifetime;
use crate::observer::Observer;

use super::Signal;

impl<V: Clone + Send + 'static, E: Clone + Send + 'static> Signal<V, E> {
    /// Transform every value with `f`. Terminals pass through.
    pub fn map<U: Clone + Send + 'static>(
        &self,
        f: impl Fn(V) -> U + Send + Sync + 'static,
    ) -> Signal<U, E> {
        let source = self.clone();
        Signal::new(move |observer| {
            source
                .observe(Observer::new(move |event: Event<V, E>| {
                    observer.send(event.map(&f));
                }))
                .map(|d| Box::new(d) as Box<dyn Disposable>)
        })
    }

    /// Transform the failure with `f`. Values and neutral terminals pass
    /// through.
    pub fn map_error<F: Clone + Send + 'static>(
        &self,
        f: impl Fn(E) -> F + Send + Sync + 'static,
    ) -> Signal<V, F> {
        let source = self.clone();
        Signal::new(move |observer| {
            source
                .observe(Observer::new(move |event: Event<V, E>| {
                    observer.send(event.map_error(&f));
                }))
                .map(|d| Box::new(d) as Box<dyn Disposable>)
        })
    }

    /// Forward only values satisfying `predicate`.
    pub fn filter(&self, predicate: impl Fn(&V) -> bool + Send + Sync + 'static) -> Signal<V, E> {
        let source = self.clone();
        Signal::new(move |observer| {
            source
                .observe(Observer::new(move |event: Event<V, E>| match event {
                    Event::Value(v) => {
                        if predicate(&v) {
                            observer.send_value(v);
                        }
                    }
                    other => observer.send(other),
                }))
                .map(|d| Box::new(d) as Box<dyn Disposable>)
        })
    }

    /// Map values to `Option`, forwarding only the `Some`s.
    pub fn filter_map<U: Clone + Send + 'static>(
        &self,
        f: impl Fn(V) -> Option<U> + Send + Sync + 'static,
    ) -> Signal<U, E> {
        let source = self.clone();
        Signal::new(move |observer| {
            source
                .observe(Observer::new(move |event: Event<V, E>| match event {
                    Event::Value(v) => {
                        if let Some(u) = f(v) {
                            observer.send_value(u);
                        }
                    }
                    Event::Failed(e) => observer.send_failed(e),
                    Event::Completed => observer.send_completed(),
                    Event::Interrupted => observer.send_interrupted(),
                }))
                .map(|d| Box::new(d) as Box<dyn Disposable>)
        })
    }

    /// Fold values into an accumulator, emitting every intermediate state.
    pub fn scan<A: Clone + Send + 'static>(
        &self,
        initial: A,
        f: impl Fn(A, V) -> A + Send + Sync + 'static,
    ) -> Signal<A, E> {
        let source = self.clone();
        Signal::new(move |observer| {
            let accumulator = Mutex::new(initial);
            source
                .observe(Observer::new(move |event: Event<V, E>| match event {
                    Event::Value(v) => {
                        let mut acc = accumulator.lock();
                        let next = f(acc.clone(), v);
                        *acc = next.clone();
                        drop(acc);
                        observer.send_value(next);
                    }
                    Event::Failed(e) => observer.send_failed(e),
                    Event::Completed => observer.send_completed(),
                    Event::Interrupted => observer.send_interrupted(),
                }))
                .map(|d| Box::new(d) as Box<dyn Disposable>)
        })
    }

    /// Forward at most `count` values, then complete. `take(0)` completes
    /// immediately.
    pub fn take(&self, count: usize) -> Signal<V, E> {
        let source = self.clone();
        Signal::new(move |observer| {
            if count == 0 {
                observer.send_completed();
                return None;
            }
            let remaining = Mutex::new(count);
            source
                .observe(Observer::new(move |event: Event<V, E>| match event {
                    Event::Value(v) => {
                        let mut remaining = remaining.lock();
                        if *remaining == 0 {
                            return;
                        }
                        *remaining -= 1;
                        let exhausted = *remaining == 0;
                        drop(remaining);
                        observer.send_value(v);
                        if exhausted {
                            observer.send_completed();
                        }
                    }
                    other => observer.send(other),
                }))
                .map(|d| Box::new(d) as Box<dyn Disposable>)
        })
    }

    /// Forward values while `predicate` holds; the first failing value is
    /// dropped and the signal completes.
    pub fn take_while(
        &self,
        predicate: impl Fn(&V) -> bool + Send + Sync + 'static,
    ) -> Signal<V, E> {
        let source = self.clone();
        Signal::new(move |observer| {
            source
                .observe(Observer::new(move |event: Event<V, E>| match event {
                    Event::Value(v) => {
                        if predicate(&v) {
                            observer.send_value(v);
                        } else {
                            observer.send_completed();
                        }
                    }
                    other => observer.send(other),
                }))
                .map(|d| Box::new(d) as Box<dyn Disposable>)
        })
    }

    /// Forward until `trigger` emits a value or completes, then complete.
    pub fn take_until(&self, trigger: &Signal<(), Never>) -> Signal<V, E> {
        let source = self.clone();
        let trigger = trigger.clone();
        Signal::new(move |observer| {
            let disposables = CompositeDisposable::new();

            let stop = observer.clone();
            if let Some(trigger_sub) = trigger.observe(Observer::new(move |event| match event {
                Event::Value(()) | Event::Completed => stop.send_completed(),
                Event::Failed(never) => match never {},
                Event::Interrupted => {}
            })) {
                disposables.add(trigger_sub);
            }

            if let Some(source_sub) = source.observe(Observer::new(move |event: Event<V, E>| {
                observer.send(event);
            })) {
                disposables.add(source_sub);
            }

            Some(Box::new(disposables) as Box<dyn Disposable>)
        })
    }

    /// Forward until `lifetime` ends, then complete.
    pub fn take_during(&self, lifetime: &Lifetime) -> Signal<V, E> {
        self.take_until(lifetime.ended())
    }

    /// Drop the first `count` values.
    pub fn skip(&self, count: usize) -> Signal<V, E> {
        let source = self.clone();
        Signal::new(move |observer| {
            let remaining = Mutex::new(count);
            source
                .observe(Observer::new(move |event: Event<V, E>| match event {
                    Event::Value(v) => {
                        let mut remaining = remaining.lock();
                        if *remaining > 0 {
                            *remaining -= 1;
                            return;
                        }
                        drop(remaining);
                        observer.send_value(v);
                    }
                    other => observer.send(other),
                }))
                .map(|d| Box::new(d) as Box<dyn Disposable>)
        })
    }

    /// Drop values while `predicate` holds, then forward everything.
    pub fn skip_while(
        &self,
        predicate: impl Fn(&V) -> bool + Send + Sync + 'static,
    ) -> Signal<V, E> {
        let source = self.clone();
        Signal::new(move |observer| {
            let skipping = Mutex::new(true);
            source
                .observe(Observer::new(move |event: Event<V, E>| match event {
                    Event::Value(v) => {
                        let mut skipping = skipping.lock();
                        if *skipping {
                            if predicate(&v) {
                                return;
                            }
                            *skipping = false;
                        }
                        drop(skipping);
                        observer.send_value(v);
                    }
                    other => observer.send(other),
                }))
                .map(|d| Box::new(d) as Box<dyn Disposable>)
        })
    }

    /// Drop values equal (by `eq`) to the previously forwarded value.
    pub fn skip_repeats_by(
        &self,
        eq: impl Fn(&V, &V) -> bool + Send + Sync + 'static,
    ) -> Signal<V, E> {
        let source = self.clone();
        Signal::new(move |observer| {
            let previous: Mutex<Option<V>> = Mutex::new(None);
            source
                .observe(Observer::new(move |event: Event<V, E>| match event {
                    Event::Value(v) => {
                        let mut previous = previous.lock();
                        let repeated = previous.as_ref().is_some_and(|p| eq(p, &v));
                        if repeated {
                            return;
                        }
                        *previous = Some(v.clone());
                        drop(previous);
                        observer.send_value(v);
                    }
                    other => observer.send(other),
                }))
                .map(|d| Box::new(d) as Box<dyn Disposable>)
        })
    }

    /// Turn every event — terminals included — into a value on a
    /// never-failing signal. A terminal event is forwarded as a value and
    /// followed by `Completed`.
    pub fn materialize(&self) -> Signal<Event<V, E>, Never> {
        let source = self.clone();
        Signal::new(move |observer| {
            source
                .observe(Observer::new(move |event: Event<V, E>| {
                    let terminal = event.is_terminal();
                    observer.send_value(event);
                    if terminal {
                        observer.send_completed();
                    }
                }))
                .map(|d| Box::new(d) as Box<dyn Disposable>)
        })
    }
}

impl<V: Clone + Send + 'static, E: Clone + Send + 'static> Signal<V, E>
where
    V: PartialEq,
{
    /// Drop values equal to the previously forwarded value.
    pub fn skip_repeats(&self) -> Signal<V, E> {
        self.skip_repeats_by(|a, b| a == b)
    }
}

impl<V: Clone + Send + 'static, E: Clone + Send + 'static> Signal<Event<V, E>, Never> {
    /// Undo [`Signal::materialize`]: unpack each value back into an event on
    /// the result signal.
    pub fn dematerialize(&self) -> Signal<V, E> {
        let source = self.clone();
        Signal::new(move |observer| {
            source
                .observe(Observer::new(move |event: Event<Event<V, E>, Never>| {
                    match event {
                        Event::Value(inner) => observer.send(inner),
                        Event::Failed(never) => match never {},
                        Event::Completed => observer.send_completed(),
                        Event::Interrupted => observer.send_interrupted(),
                    }
                }))
                .map(|d| Box::new(d) as Box<dyn Disposable>)
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

    fn int_pipe() -> (
        Signal<i32, &'static str>,
        crate::observer::Observer<i32, &'static str>,
    ) {
        let (signal, input, _interrupter) = Signal::pipe();
        // Interrupter intentionally dropped; the input observer keeps the
        // signal driveable.
        (signal, input)
    }

    #[test]
    fn map_transforms_values_and_passes_terminals() {
        let (signal, input) = int_pipe();
        let collector = EventCollector::new();
        signal.map(|v| v * 2).observe(collector.observer());

        input.send_value(1);
        input.send_value(2);
        input.send_failed("boom");

        assert_eq!(
            collector.events(),
            vec![Event::Value(2), Event::Value(4), Event::Failed("boom")]
        );
    }

    #[test]
    fn map_identity_is_identity() {
        let (signal, input) = int_pipe();
        let plain = EventCollector::new();
        let mapped = EventCollector::new();
        signal.observe(plain.observer());
        signal.map(|v| v).observe(mapped.observer());

        input.send_value(1);
        input.send_value(2);
        input.send_completed();

        assert_eq!(plain.events(), mapped.events());
    }

    #[test]
    fn filter_true_is_identity() {
        let (signal, input) = int_pipe();
        let plain = EventCollector::new();
        let filtered = EventCollector::new();
        signal.observe(plain.observer());
        signal.filter(|_| true).observe(filtered.observer());

        input.send_value(5);
        input.send_value(6);
        input.send_completed();

        assert_eq!(plain.events(), filtered.events());
    }

    #[test]
    fn filter_drops_non_matching() {
        let (signal, input) = int_pipe();
        let collector = EventCollector::new();
        signal.filter(|v| v % 2 == 0).observe(collector.observer());

        for v in 1..=5 {
            input.send_value(v);
        }
        input.send_completed();

        assert_eq!(
            collector.events(),
            vec![Event::Value(2), Event::Value(4), Event::Completed]
        );
    }

    #[test]
    fn filter_map_maps_and_drops() {
        let (signal, input) = int_pipe();
        let collector = EventCollector::new();
        signal
            .filter_map(|v| (v % 2 == 0).then(|| v.to_string()))
            .observe(collector.observer());

        for v in 1..=4 {
            input.send_value(v);
        }
        input.send_completed();

        assert_eq!(
            collector.events(),
            vec![
                Event::Value("2".to_owned()),
                Event::Value("4".to_owned()),
                Event::Completed
            ]
        );
    }

    #[test]
    fn map_error_retypes_failures() {
        let (signal, input) = int_pipe();
        let collector = EventCollector::new();
        signal
            .map_error(|e| format!("wrapped: {e}"))
            .observe(collector.observer());

        input.send_value(1);
        input.send_failed("boom");

        assert_eq!(
            collector.events(),
            vec![
                Event::Value(1),
                Event::Failed("wrapped: boom".to_owned())
            ]
        );
    }

    #[test]
    fn scan_emits_running_accumulation() {
        let (signal, input) = int_pipe();
        let collector = EventCollector::new();
        signal.scan(0, |acc, v| acc + v).observe(collector.observer());

        input.send_value(1);
        input.send_value(2);
        input.send_value(3);
        input.send_completed();

        assert_eq!(
            collector.events(),
            vec![
                Event::Value(1),
                Event::Value(3),
                Event::Value(6),
                Event::Completed
            ]
        );
    }

    #[test]
    fn take_caps_then_completes() {
        let (signal, input) = int_pipe();
        let collector = EventCollector::new();
        signal.take(2).observe(collector.observer());

        input.send_value(1);
        input.send_value(2);
        input.send_value(3);

        assert_eq!(
            collector.events(),
            vec![Event::Value(1), Event::Value(2), Event::Completed]
        );
    }

    #[test]
    fn take_zero_completes_at_construction() {
        let (signal, input) = int_pipe();
        let taken = signal.take(0);
        // The operator signal terminated before anyone observed it, so a
        // later observer sees the late-subscriber interrupt and upstream
        // values never propagate.
        let collector = EventCollector::new();
        assert!(taken.observe(collector.observer()).is_none());
        input.send_value(1);
        assert_eq!(collector.events(), vec![Event::Interrupted]);
    }

    #[test]
    fn take_while_stops_at_first_failing_value() {
        let (signal, input) = int_pipe();
        let collector = EventCollector::new();
        signal.take_while(|v| *v < 3).observe(collector.observer());

        for v in 1..=5 {
            input.send_value(v);
        }

        assert_eq!(
            collector.events(),
            vec![Event::Value(1), Event::Value(2), Event::Completed]
        );
    }

    #[test]
    fn take_until_trigger_value_completes() {
        let (signal, input) = int_pipe();
        let (trigger, trigger_input, _t) = Signal::<(), Never>::pipe();
        let collector = EventCollector::new();
        signal.take_until(&trigger).observe(collector.observer());

        input.send_value(1);
        trigger_input.send_value(());
        input.send_value(2);

        assert_eq!(
            collector.events(),
            vec![Event::Value(1), Event::Completed]
        );
    }

    #[test]
    fn skip_drops_prefix() {
        let (signal, input) = int_pipe();
        let collector = EventCollector::new();
        signal.skip(2).observe(collector.observer());

        for v in 1..=4 {
            input.send_value(v);
        }
        input.send_completed();

        assert_eq!(
            collector.events(),
            vec![Event::Value(3), Event::Value(4), Event::Completed]
        );
    }

    #[test]
    fn skip_while_switches_off_permanently() {
        let (signal, input) = int_pipe();
        let collector = EventCollector::new();
        signal.skip_while(|v| *v < 3).observe(collector.observer());

        for v in [1, 2, 3, 1, 4] {
            input.send_value(v);
        }

        assert_eq!(
            collector.events(),
            vec![Event::Value(3), Event::Value(1), Event::Value(4)]
        );
    }

    #[test]
    fn skip_repeats_drops_consecutive_duplicates() {
        let (signal, input) = int_pipe();
        let collector = EventCollector::new();
        signal.skip_repeats().observe(collector.observer());

        for v in [1, 1, 2, 2, 2, 1] {
            input.send_value(v);
        }

        assert_eq!(
            collector.events(),
            vec![Event::Value(1), Event::Value(2), Event::Value(1)]
        );
    }

    #[test]
    fn materialize_then_dematerialize_is_identity() {
        let (signal, input) = int_pipe();
        let plain = EventCollector::new();
        let round_tripped = EventCollector::new();
        signal.observe(plain.observer());
        signal
            .materialize()
            .dematerialize()
            .observe(round_tripped.observer());

        input.send_value(1);
        input.send_value(2);
        input.send_failed("boom");

        assert_eq!(plain.events(), round_tripped.events());
    }

    #[test]
    fn materialize_reifies_terminal() {
        let (signal, input) = int_pipe();
        let collector: EventCollector<Event<i32, &str>, Never> = EventCollector::new();
        signal.materialize().observe(collector.observer());

        input.send_value(1);
        input.send_completed();

        assert_eq!(
            collector.events(),
            vec![
                Event::Value(Event::Value(1)),
                Event::Value(Event::Completed),
                Event::Completed
            ]
        );
    }
}
