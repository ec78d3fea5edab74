//! Virtual-time scheduler for hermetic timing tests.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::disposable::{AnyDisposable, Disposable};
use crate::scheduler::{DateScheduler, RepeatingWork, Scheduler, Work};

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

enum TestJob {
    Once(Work),
    Repeat {
        work: RepeatingWork,
        interval: Duration,
    },
}

struct TestEntry {
    deadline: Instant,
    /// FIFO tiebreak at equal deadlines.
    seq: u64,
    cancelled: Arc<AtomicBool>,
    job: TestJob,
}

impl PartialEq for TestEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TestEntry {}

impl PartialOrd for TestEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TestEntry {
    // Reversed for min-heap behavior on a max-heap.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TestState {
    now: Instant,
    queue: BinaryHeap<TestEntry>,
    seq: u64,
    advancing: bool,
}

// ---------------------------------------------------------------------------
// TestScheduler
// ---------------------------------------------------------------------------

/// A serial [`DateScheduler`] under manual time control.
///
/// Work never runs on its own: the test drives delivery with
/// [`advance`](TestScheduler::advance), [`advance_by`](TestScheduler::advance_by),
/// or [`run`](TestScheduler::run), all of which execute due work on the
/// calling thread in deadline order (FIFO at equal deadlines). The clock
/// reported by `current_instant` moves only as far as the test advances it.
#[derive(Clone)]
pub struct TestScheduler {
    state: Arc<Mutex<TestState>>,
}

impl Default for TestScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TestScheduler {
    /// A scheduler whose virtual clock starts at the real "now".
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TestState {
                now: Instant::now(),
                queue: BinaryHeap::new(),
                seq: 0,
                advancing: false,
            })),
        }
    }

    fn push(&self, deadline: Instant, job: TestJob) -> Box<dyn Disposable> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.state.lock();
        state.seq += 1;
        let seq = state.seq;
        state.queue.push(TestEntry {
            deadline,
            seq,
            cancelled: Arc::clone(&cancelled),
            job,
        });
        drop(state);
        Box::new(AnyDisposable::new(move || {
            cancelled.store(true, Ordering::Release);
        }))
    }

    /// Run everything due at the current virtual time.
    pub fn advance(&self) {
        let now = self.state.lock().now;
        self.advance_to(now);
    }

    /// Move the clock forward by `duration`, running work as its deadlines
    /// are reached.
    pub fn advance_by(&self, duration: Duration) {
        let target = self.state.lock().now + duration;
        self.advance_to(target);
    }

    /// Move the clock to `target`, running work as its deadlines are
    /// reached.
    ///
    /// Panics if called from inside work the scheduler is already running —
    /// scheduled work may schedule more work, but may not advance time.
    pub fn advance_to(&self, target: Instant) {
        {
            let mut state = self.state.lock();
            assert!(
                !state.advancing,
                "TestScheduler: reentrant advance from inside scheduled work"
            );
            state.advancing = true;
        }

        loop {
            let mut state = self.state.lock();
            let due = state
                .queue
                .peek()
                .is_some_and(|entry| entry.deadline <= target);
            if !due {
                state.now = target.max(state.now);
                state.advancing = false;
                return;
            }
            let entry = state.queue.pop().expect("peeked entry must pop");
            state.now = state.now.max(entry.deadline);
            drop(state);

            if entry.cancelled.load(Ordering::Acquire) {
                continue;
            }
            match entry.job {
                TestJob::Once(work) => work(),
                TestJob::Repeat { mut work, interval } => {
                    work();
                    let next = entry.deadline + interval;
                    let mut state = self.state.lock();
                    state.seq += 1;
                    let seq = state.seq;
                    state.queue.push(TestEntry {
                        deadline: next,
                        seq,
                        cancelled: entry.cancelled,
                        job: TestJob::Repeat { work, interval },
                    });
                }
            }
        }
    }

    /// Run until no work remains. Repeating work makes this diverge; prefer
    /// [`advance_by`](TestScheduler::advance_by) when repeats are in play.
    pub fn run(&self) {
        loop {
            let deadline = {
                let state = self.state.lock();
                match state.queue.peek() {
                    Some(entry) => entry.deadline,
                    None => return,
                }
            };
            self.advance_to(deadline);
        }
    }
}

impl Scheduler for TestScheduler {
    fn schedule(&self, work: Work) -> Option<Box<dyn Disposable>> {
        let now = self.state.lock().now;
        Some(self.push(now, TestJob::Once(work)))
    }
}

impl DateScheduler for TestScheduler {
    fn current_instant(&self) -> Instant {
        self.state.lock().now
    }

    fn schedule_after(&self, instant: Instant, work: Work) -> Option<Box<dyn Disposable>> {
        Some(self.push(instant, TestJob::Once(work)))
    }

    fn schedule_after_interval(
        &self,
        instant: Instant,
        interval: Duration,
        _leeway: Duration,
        work: RepeatingWork,
    ) -> Option<Box<dyn Disposable>> {
        Some(self.push(instant, TestJob::Repeat { work, interval }))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_runs_until_advanced() {
        let scheduler = TestScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_c = Arc::clone(&log);
        scheduler.schedule(Box::new(move || log_c.lock().push("ran")));
        assert!(log.lock().is_empty());
        scheduler.advance();
        assert_eq!(*log.lock(), vec!["ran"]);
    }

    #[test]
    fn fifo_at_equal_deadlines() {
        let scheduler = TestScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log_c = Arc::clone(&log);
            scheduler.schedule(Box::new(move || log_c.lock().push(i)));
        }
        scheduler.advance();
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn delayed_work_waits_for_its_deadline() {
        let scheduler = TestScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_c = Arc::clone(&log);
        scheduler.schedule_after(
            scheduler.current_instant() + Duration::from_secs(10),
            Box::new(move || log_c.lock().push("late")),
        );
        scheduler.advance_by(Duration::from_secs(9));
        assert!(log.lock().is_empty());
        scheduler.advance_by(Duration::from_secs(1));
        assert_eq!(*log.lock(), vec!["late"]);
    }

    #[test]
    fn cancelled_work_is_skipped() {
        let scheduler = TestScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_c = Arc::clone(&log);
        let handle = scheduler
            .schedule(Box::new(move || log_c.lock().push("ran")))
            .unwrap();
        handle.dispose();
        scheduler.advance();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn repeating_fires_on_fixed_boundaries() {
        let scheduler = TestScheduler::new();
        let count = Arc::new(Mutex::new(0));
        let count_c = Arc::clone(&count);
        let handle = scheduler
            .schedule_after_interval(
                scheduler.current_instant() + Duration::from_secs(1),
                Duration::from_secs(1),
                Duration::ZERO,
                Box::new(move || *count_c.lock() += 1),
            )
            .unwrap();
        scheduler.advance_by(Duration::from_secs(3));
        assert_eq!(*count.lock(), 3);
        handle.dispose();
        scheduler.advance_by(Duration::from_secs(3));
        assert_eq!(*count.lock(), 3);
    }

    #[test]
    fn work_scheduled_during_advance_runs_in_the_same_pass() {
        let scheduler = TestScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_outer = Arc::clone(&log);
        let inner_scheduler = scheduler.clone();
        scheduler.schedule(Box::new(move || {
            log_outer.lock().push("outer");
            let log_inner = Arc::clone(&log_outer);
            inner_scheduler.schedule(Box::new(move || log_inner.lock().push("inner")));
        }));
        scheduler.advance();
        assert_eq!(*log.lock(), vec!["outer", "inner"]);
    }
}
