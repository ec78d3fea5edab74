//! Deterministic test tooling: virtual time and event capture.
//!
//! [`TestScheduler`] is a [`DateScheduler`](crate::scheduler::DateScheduler)
//! whose clock only moves when a test tells it to, making the timing
//! operators (`debounce`, `throttle`, `delay`, repeating schedules) fully
//! hermetic. [`EventCollector`] records everything an observer sees for
//! later assertion.

pub mod collector;
pub mod scheduler;

pub use collector::EventCollector;
pub use scheduler::TestScheduler;
