//! Property-based invariant tests for the stream core.
//!
//! These verify the structural guarantees that must hold for arbitrary event
//! sequences:
//!
//! 1. At most one terminal is delivered; no value follows a terminal.
//! 2. Every observer of one signal sees the identical event sequence.
//! 3. `map(id)` and `filter(true)` are identities.
//! 4. `materialize` then `dematerialize` is the identity.
//! 5. A producer replays the same sequence on every start.
//! 6. `take(n)` never yields more than `n` values, and `skip(n)` drops
//!    exactly the first `n`.

use proptest::prelude::*;

use rill::event::Event;
use rill::producer::SignalProducer;
use rill::signal::Signal;
use rill::testing::EventCollector;

type TestEvent = Event<i32, u8>;

// ── Helpers ─────────────────────────────────────────────────────────────

fn event_strategy() -> impl Strategy<Value = TestEvent> {
    prop_oneof![
        4 => any::<i32>().prop_map(Event::Value),
        1 => any::<u8>().prop_map(Event::Failed),
        1 => Just(Event::Completed),
        1 => Just(Event::Interrupted),
    ]
}

fn sequence_strategy() -> impl Strategy<Value = Vec<TestEvent>> {
    proptest::collection::vec(event_strategy(), 0..24)
}

/// The prefix a well-behaved signal is allowed to deliver: values up to and
/// including the first terminal.
fn expected_delivery(sequence: &[TestEvent]) -> Vec<TestEvent> {
    let mut out = Vec::new();
    for event in sequence {
        out.push(event.clone());
        if event.is_terminal() {
            break;
        }
    }
    out
}

fn drive(sequence: &[TestEvent]) -> (Vec<TestEvent>, Vec<TestEvent>) {
    let (signal, input, _interrupter) = Signal::<i32, u8>::pipe();
    let first = EventCollector::new();
    let second = EventCollector::new();
    signal.observe(first.observer());
    signal.observe(second.observer());
    for event in sequence {
        input.send(event.clone());
    }
    (first.events(), second.events())
}

// ═════════════════════════════════════════════════════════════════════════
// 1 + 2. Terminal discipline and observer agreement
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn at_most_one_terminal_and_nothing_after(sequence in sequence_strategy()) {
        let (delivered, _) = drive(&sequence);
        let terminals = delivered.iter().filter(|e| e.is_terminal()).count();
        prop_assert!(terminals <= 1, "multiple terminals in {delivered:?}");
        if let Some(position) = delivered.iter().position(|e| e.is_terminal()) {
            prop_assert_eq!(
                position,
                delivered.len() - 1,
                "terminal not last in {:?}",
                delivered
            );
        }
        prop_assert_eq!(delivered, expected_delivery(&sequence));
    }

    #[test]
    fn all_observers_see_the_same_sequence(sequence in sequence_strategy()) {
        let (first, second) = drive(&sequence);
        prop_assert_eq!(first, second);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Identity operators
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn map_id_and_filter_true_are_identities(sequence in sequence_strategy()) {
        let (signal, input, _interrupter) = Signal::<i32, u8>::pipe();
        let plain = EventCollector::new();
        let mapped = EventCollector::new();
        let filtered = EventCollector::new();
        signal.observe(plain.observer());
        signal.map(|v| v).observe(mapped.observer());
        signal.filter(|_| true).observe(filtered.observer());

        for event in &sequence {
            input.send(event.clone());
        }

        prop_assert_eq!(plain.events(), mapped.events());
        prop_assert_eq!(plain.events(), filtered.events());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. materialize ∘ dematerialize = id
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn materialize_round_trip(sequence in sequence_strategy()) {
        let (signal, input, _interrupter) = Signal::<i32, u8>::pipe();
        let plain = EventCollector::new();
        let round_tripped = EventCollector::new();
        signal.observe(plain.observer());
        signal
            .materialize()
            .dematerialize()
            .observe(round_tripped.observer());

        for event in &sequence {
            input.send(event.clone());
        }

        prop_assert_eq!(plain.events(), round_tripped.events());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Cold restart determinism
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn producer_replays_identically(values in proptest::collection::vec(any::<i32>(), 0..16)) {
        let producer = SignalProducer::<i32, u8>::from_values(values.clone());
        let first = EventCollector::new();
        let second = EventCollector::new();
        producer.start(first.observer());
        producer.start(second.observer());

        prop_assert_eq!(first.values(), values.clone());
        prop_assert_eq!(first.events(), second.events());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 6. take / skip arithmetic
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn take_caps_and_skip_drops(
        values in proptest::collection::vec(any::<i32>(), 0..16),
        n in 0usize..20,
    ) {
        let producer = SignalProducer::<i32, u8>::from_values(values.clone());

        let taken = EventCollector::new();
        producer.take(n).start(taken.observer());
        let expected_taken: Vec<i32> = values.iter().copied().take(n).collect();
        prop_assert_eq!(taken.values(), expected_taken);

        let skipped = EventCollector::new();
        producer.skip(n).start(skipped.observer());
        let expected_skipped: Vec<i32> = values.iter().copied().skip(n).collect();
        prop_assert_eq!(skipped.values(), expected_skipped);
    }
}
