//! The immediate scheduler: synchronous execution on the calling thread.

use crate::disposable::Disposable;

use super::{Scheduler, Work};

// ---------------------------------------------------------------------------
// ImmediateScheduler
// ---------------------------------------------------------------------------

/// Runs work synchronously on the calling thread.
///
/// Serial by construction — each `schedule` call returns only after the work
/// has finished. Never returns a cancellation handle: by the time the caller
/// could dispose it, the work has already run.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, work: Work) -> Option<Box<dyn Disposable>> {
        work();
        None
    }
}

// ===========================================================================
// Tests
// ===========================================================================
