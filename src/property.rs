//! Properties: a current value plus its change stream.
//!
//! [`MutableProperty`] owns an atomic value cell and a change signal;
//! [`Property`] is the read-only face, either capturing a mutable property
//! or derived through operators. `producer()` is the "current and future
//! values" accessor: it synchronously emits the value under the emission
//! lock, so no change can slip between the snapshot and the subscription.
//!
//! Reentrancy rules are enforced fail-fast: `modify` may not be re-entered
//! on the same property from the same thread, and the value may not be read
//! while that thread is inside `modify` (both are programming errors, not
//! stream failures).

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use crate::disposable::Disposable;
use crate::event::{Event, Never};
use crate::lifetime::{Lifetime, LifetimeToken};
use crate::observer::Observer;
use crate::producer::SignalProducer;
use crate::signal::Signal;

thread_local! {
    /// Addresses of property cores this thread is currently `modify`ing.
    static MODIFYING: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
}

// ---------------------------------------------------------------------------
// PropertyCore
// ---------------------------------------------------------------------------

struct PropertyCore<V> {
    value: Mutex<V>,
    /// Serializes change emission with producer bootstrap. Reentrant so a
    /// change handler may set the property again without deadlocking; the
    /// pipe's send queue keeps the resulting order serial.
    emission: ReentrantMutex<()>,
    signal: Signal<V, Never>,
    input: Observer<V, Never>,
    lifetime: Lifetime,
    _token: LifetimeToken,
}

impl<V> Drop for PropertyCore<V> {
    fn drop(&mut self) {
        // A dying property completes its change stream; the token field
        // then ends the lifetime, tearing down bindings.
        self.input.send_completed();
    }
}

impl<V: Clone + Send + 'static> PropertyCore<V> {
    fn new_arc(initial: V) -> Arc<Self> {
        let (signal, input, _interrupter) = Signal::pipe();
        let (lifetime, token) = Lifetime::make();
        Arc::new(PropertyCore {
            value: Mutex::new(initial),
            emission: ReentrantMutex::new(()),
            signal,
            input,
            lifetime,
            _token: token,
        })
    }
}

fn core_key<V>(core: &Arc<PropertyCore<V>>) -> usize {
    Arc::as_ptr(core) as usize
}

fn assert_not_modifying<V>(core: &Arc<PropertyCore<V>>, what: &str) {
    MODIFYING.with(|set| {
        assert!(
            !set.borrow().contains(&core_key(core)),
            "property {what} from inside modify() on the same property (same thread)"
        );
    });
}

/// Exclusive read-modify-write on the value cell, then emit the new value.
///
/// The value slot is released before emission, per the property contract;
/// emission is serialized by the reentrant emission lock.
fn core_modify<V: Clone + Send + 'static, R>(
    core: &Arc<PropertyCore<V>>,
    f: impl FnOnce(&mut V) -> R,
) -> R {
    let key = core_key(core);
    MODIFYING.with(|set| {
        assert!(
            set.borrow_mut().insert(key),
            "reentrant modify() on the same property"
        );
    });
    struct Unmark(usize);
    impl Drop for Unmark {
        fn drop(&mut self) {
            MODIFYING.with(|set| {
                set.borrow_mut().remove(&self.0);
            });
        }
    }
    let unmark = Unmark(key);

    let (result, snapshot) = {
        let mut value = core.value.lock();
        let result = f(&mut value);
        (result, value.clone())
    };
    // The slot is released; handlers reacting to the emission may modify
    // the property again.
    drop(unmark);

    let _guard = core.emission.lock();
    core.input.send_value(snapshot);
    result
}

fn core_value<V: Clone + Send + 'static>(core: &Arc<PropertyCore<V>>) -> V {
    assert_not_modifying(core, "value read");
    core.value.lock().clone()
}

/// The "current value, then changes" producer shared by both property
/// flavors. The emission lock bridges the snapshot and the subscription.
fn core_producer<V: Clone + Send + 'static>(core: &Arc<PropertyCore<V>>) -> SignalProducer<V, Never> {
    let core = Arc::clone(core);
    SignalProducer::new(move |observer, lifetime| {
        assert_not_modifying(&core, "producer start");
        let _guard = core.emission.lock();
        let current = core.value.lock().clone();
        observer.send_value(current);
        if core.signal.is_terminated() {
            // Frozen property (constant, or mid-teardown): current value is
            // all there will ever be.
            observer.send_completed();
        } else if let Some(subscription) = core.signal.observe(observer) {
            lifetime.add(subscription);
        }
    })
}

// ---------------------------------------------------------------------------
// MutableProperty
// ---------------------------------------------------------------------------

/// A thread-safe value cell with a change stream.
///
/// Clones share the cell. The change signal emits after every `set` /
/// `modify`; it completes when the last clone drops.
pub struct MutableProperty<V> {
    core: Arc<PropertyCore<V>>,
}

impl<V> Clone for MutableProperty<V> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<V: Clone + Send + 'static> MutableProperty<V> {
    /// Create a property holding `initial`.
    pub fn new(initial: V) -> Self {
        Self {
            core: PropertyCore::new_arc(initial),
        }
    }

    /// The current value.
    pub fn value(&self) -> V {
        core_value(&self.core)
    }

    /// Replace the value and emit it on the change signal.
    pub fn set(&self, value: V) {
        core_modify(&self.core, move |slot| *slot = value);
    }

    /// Exclusive read-modify-write.
    ///
    /// Other threads block until `f` returns; re-entering `modify` (or
    /// reading `value`) from `f` on the same thread panics.
    pub fn modify<R>(&self, f: impl FnOnce(&mut V) -> R) -> R {
        core_modify(&self.core, f)
    }

    /// The change stream: future values only, completing when the property
    /// is dropped.
    pub fn signal(&self) -> Signal<V, Never> {
        self.core.signal.clone()
    }

    /// Current value followed by all changes.
    pub fn producer(&self) -> SignalProducer<V, Never> {
        core_producer(&self.core)
    }

    /// The property's lifetime: ends when the last clone drops.
    pub fn lifetime(&self) -> Lifetime {
        self.core.lifetime.clone()
    }

    /// Bind the property to `source` (the `<~` operator): every value the
    /// source emits is written into the property.
    ///
    /// The returned disposable tears the binding down early; the binding
    /// also ends on its own when the property drops (the source is started
    /// through `take_during(lifetime)` and the write-back holds only a weak
    /// reference, so a binding never keeps its property alive).
    pub fn bind(&self, source: impl Into<BindingSource<V>>) -> Box<dyn Disposable> {
        let source: BindingSource<V> = source.into();
        let weak = Arc::downgrade(&self.core);
        source
            .producer
            .take_during(&self.lifetime())
            .start(Observer::new(move |event: Event<V, Never>| {
                if let Event::Value(v) = event {
                    if let Some(core) = weak.upgrade() {
                        core_modify(&core, move |slot| *slot = v);
                    }
                }
            }))
    }
}

// ---------------------------------------------------------------------------
// Property (read-only)
// ---------------------------------------------------------------------------

struct PropertyInner<V> {
    core: Arc<PropertyCore<V>>,
    upstream: Option<Box<dyn Disposable>>,
}

impl<V> Drop for PropertyInner<V> {
    fn drop(&mut self) {
        if let Some(upstream) = self.upstream.take() {
            upstream.dispose();
        }
    }
}

/// A read-only view of a current value plus its changes.
pub struct Property<V> {
    inner: Arc<PropertyInner<V>>,
}

impl<V> Clone for Property<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + 'static> Property<V> {
    /// A property that never changes.
    pub fn constant(value: V) -> Self {
        let core = PropertyCore::new_arc(value);
        // Freeze the change stream: producers emit the value and complete.
        core.input.send_completed();
        Self {
            inner: Arc::new(PropertyInner {
                core,
                upstream: None,
            }),
        }
    }

    /// A read-only view sharing `source`'s cell: it tracks every change but
    /// cannot write.
    pub fn capturing(source: &MutableProperty<V>) -> Self {
        Self {
            inner: Arc::new(PropertyInner {
                core: Arc::clone(&source.core),
                upstream: None,
            }),
        }
    }

    /// A property starting at `initial` and then tracking `then`.
    pub fn new(initial: V, then: SignalProducer<V, Never>) -> Self {
        let core = PropertyCore::new_arc(initial);
        let weak = Arc::downgrade(&core);
        let upstream = then.start(Observer::new(move |event: Event<V, Never>| {
            if let Event::Value(v) = event {
                if let Some(core) = weak.upgrade() {
                    core_modify(&core, move |slot| *slot = v);
                }
            }
        }));
        Self {
            inner: Arc::new(PropertyInner {
                core,
                upstream: Some(upstream),
            }),
        }
    }

    /// Build a property from a producer that emits its first value
    /// synchronously on start — the shape `producer()` derivations have.
    fn from_synchronous_producer(producer: SignalProducer<V, Never>) -> Self {
        let slot: Arc<Mutex<Option<Arc<PropertyCore<V>>>>> = Arc::new(Mutex::new(None));
        let writer_slot = Arc::clone(&slot);
        let upstream = producer.start(Observer::new(move |event: Event<V, Never>| {
            if let Event::Value(v) = event {
                let core = {
                    let mut slot = writer_slot.lock();
                    match slot.as_ref() {
                        None => {
                            *slot = Some(PropertyCore::new_arc(v.clone()));
                            None
                        }
                        Some(core) => Some(Arc::clone(core)),
                    }
                };
                if let Some(core) = core {
                    core_modify(&core, move |inner| *inner = v);
                }
            }
        }));
        let core = slot
            .lock()
            .clone()
            .expect("derived property source must emit an initial value synchronously");
        Self {
            inner: Arc::new(PropertyInner {
                core,
                upstream: Some(upstream),
            }),
        }
    }

    /// The current value.
    pub fn value(&self) -> V {
        core_value(&self.inner.core)
    }

    /// The change stream: future values only.
    pub fn signal(&self) -> Signal<V, Never> {
        self.inner.core.signal.clone()
    }

    /// Current value followed by all changes.
    pub fn producer(&self) -> SignalProducer<V, Never> {
        core_producer(&self.inner.core)
    }

    /// A property whose value is `f` of this one's.
    pub fn map<U: Clone + Send + 'static>(
        &self,
        f: impl Fn(V) -> U + Send + Sync + 'static,
    ) -> Property<U> {
        Property::from_synchronous_producer(self.producer().map(f))
    }

    /// A property pairing the latest values of both sources.
    pub fn combine_latest<U: Clone + Send + 'static>(
        &self,
        other: &Property<U>,
    ) -> Property<(V, U)> {
        Property::from_synchronous_producer(self.producer().combine_latest(&other.producer()))
    }

    /// A property zipping both sources' change sequences pairwise.
    pub fn zip<U: Clone + Send + 'static>(&self, other: &Property<U>) -> Property<(V, U)> {
        Property::from_synchronous_producer(self.producer().zip(&other.producer()))
    }
}

impl<V: Clone + Send + PartialEq + 'static> Property<V> {
    /// A property suppressing consecutive duplicate values.
    pub fn skip_repeats(&self) -> Property<V> {
        Property::from_synchronous_producer(self.producer().skip_repeats())
    }
}

impl<V: Clone + Send + 'static> From<&MutableProperty<V>> for Property<V> {
    fn from(source: &MutableProperty<V>) -> Self {
        Property::capturing(source)
    }
}

// ---------------------------------------------------------------------------
// BindingSource
// ---------------------------------------------------------------------------

/// Anything a property can be bound to: a never-failing producer, signal,
/// or another property.
pub struct BindingSource<V> {
    producer: SignalProducer<V, Never>,
}

impl<V: Clone + Send + 'static> From<SignalProducer<V, Never>> for BindingSource<V> {
    fn from(producer: SignalProducer<V, Never>) -> Self {
        Self { producer }
    }
}

impl<V: Clone + Send + 'static> From<Signal<V, Never>> for BindingSource<V> {
    fn from(signal: Signal<V, Never>) -> Self {
        let producer = SignalProducer::new(move |observer, lifetime: Lifetime| {
            if let Some(subscription) = signal.observe(observer) {
                lifetime.add(subscription);
            }
        });
        Self { producer }
    }
}

impl<V: Clone + Send + 'static> From<&Property<V>> for BindingSource<V> {
    fn from(property: &Property<V>) -> Self {
        Self {
            producer: property.producer(),
        }
    }
}

impl<V: Clone + Send + 'static> From<&MutableProperty<V>> for BindingSource<V> {
    fn from(property: &MutableProperty<V>) -> Self {
        Self {
            producer: property.producer(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
