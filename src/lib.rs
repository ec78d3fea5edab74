//! # rill
//!
//! Push-based reactive streams for Rust: hot multicast [`signal::Signal`]s,
//! cold restartable [`producer::SignalProducer`]s, and the collaborators that
//! make their joint contract hold — [`observer::Observer`] sinks,
//! [`disposable`] cancellation tokens, serial [`scheduler`]s, and scoped
//! [`lifetime::Lifetime`]s — with a [`property`] layer offering
//! "current value plus change stream" cells on top.
//!
//! The guarantees the whole crate is built around: every signal delivers at
//! most one terminal event and nothing after it; late subscribers to a
//! terminated signal hear exactly `Interrupted`; disposal propagates back
//! through every operator to the work feeding the stream; and two starts of
//! the same producer share nothing.

pub mod event;
pub mod observer;

pub mod disposable;
pub mod lifetime;
pub mod scheduler;

pub mod signal;

pub mod producer;
pub mod property;

pub mod testing;
