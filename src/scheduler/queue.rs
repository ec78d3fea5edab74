//! Queue-backed serial scheduler with a monotonic timer.
//!
//! [`QueueScheduler`] owns two threads: a worker draining a FIFO job channel,
//! and a timer holding a deadline heap. Immediate work goes straight onto the
//! channel; delayed work waits in the heap and joins the channel at its
//! deadline, so delayed and immediate work interleave in one serial order.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex};

use crate::disposable::{AnyDisposable, Disposable};

use super::{DateScheduler, RepeatingWork, Scheduler, Work};

type Job = Box<dyn FnOnce() + Send>;

// ---------------------------------------------------------------------------
// Timer internals
// ---------------------------------------------------------------------------

enum TimerJob {
    Once(Work),
    Repeat {
        work: Arc<Mutex<RepeatingWork>>,
        interval: Duration,
    },
}

struct TimerEntry {
    deadline: Instant,
    /// FIFO tiebreak for equal deadlines.
    seq: u64,
    cancelled: Arc<AtomicBool>,
    job: TimerJob,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // Reversed: BinaryHeap is a max-heap and the earliest deadline must
    // surface first.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerState {
    heap: BinaryHeap<TimerEntry>,
    seq: u64,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    cond: Condvar,
}

// ---------------------------------------------------------------------------
// QueueScheduler
// ---------------------------------------------------------------------------

struct QueueCore {
    label: String,
    tx: Sender<Job>,
    timer: Arc<TimerShared>,
}

impl Drop for QueueCore {
    fn drop(&mut self) {
        let mut state = self.timer.state.lock();
        state.shutdown = true;
        state.heap.clear();
        self.timer.cond.notify_all();
    }
}

/// A serial scheduler backed by a dedicated, named worker thread.
///
/// All scheduled work — immediate, delayed, repeating — funnels through one
/// FIFO channel drained by the worker, so items never overlap and run in the
/// order they become due. Clones share the worker. When the last clone drops,
/// both threads wind down after draining already-queued work.
///
/// Scheduling onto a scheduler whose worker has been torn down (for example
/// after scheduled work panicked and killed the thread) is a usage fault and
/// panics.
#[derive(Clone)]
pub struct QueueScheduler {
    core: Arc<QueueCore>,
}

impl QueueScheduler {
    /// Spawn the worker and timer threads, naming them after `label`.
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let (tx, rx) = unbounded::<Job>();
        let timer = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                seq: 0,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });

        {
            let label = label.clone();
            std::thread::Builder::new()
                .name(label.clone())
                .spawn(move || {
                    tracing::debug!(target: "rill::scheduler", %label, "queue worker started");
                    for job in rx {
                        job();
                    }
                    tracing::debug!(target: "rill::scheduler", %label, "queue worker stopped");
                })
                .expect("failed to spawn queue scheduler worker thread");
        }

        {
            let label = format!("{label}-timer");
            let timer = Arc::clone(&timer);
            let tx = tx.clone();
            std::thread::Builder::new()
                .name(label.clone())
                .spawn(move || Self::timer_loop(timer, tx))
                .expect("failed to spawn queue scheduler timer thread");
        }

        Self {
            core: Arc::new(QueueCore { label, tx, timer }),
        }
    }

    /// The label the scheduler threads were named with.
    pub fn label(&self) -> &str {
        &self.core.label
    }

    fn timer_loop(timer: Arc<TimerShared>, tx: Sender<Job>) {
        loop {
            let entry = {
                let mut state = timer.state.lock();
                loop {
                    if state.shutdown {
                        return;
                    }
                    match state.heap.peek().map(|head| head.deadline) {
                        None => {
                            timer.cond.wait(&mut state);
                        }
                        Some(deadline) if deadline <= Instant::now() => {
                            break state.heap.pop().expect("peeked entry must pop");
                        }
                        Some(deadline) => {
                            timer.cond.wait_until(&mut state, deadline);
                        }
                    }
                }
            };

            if entry.cancelled.load(Ordering::Acquire) {
                continue;
            }

            match entry.job {
                TimerJob::Once(work) => {
                    let cancelled = Arc::clone(&entry.cancelled);
                    let job: Job = Box::new(move || {
                        if !cancelled.load(Ordering::Acquire) {
                            work();
                        }
                    });
                    if tx.send(job).is_err() {
                        return;
                    }
                }
                TimerJob::Repeat { work, interval } => {
                    let cancelled = Arc::clone(&entry.cancelled);
                    let run_work = Arc::clone(&work);
                    let job: Job = Box::new(move || {
                        if !cancelled.load(Ordering::Acquire) {
                            let mut work = run_work.lock();
                            (*work)();
                        }
                    });
                    if tx.send(job).is_err() {
                        return;
                    }
                    // Fixed boundaries at `start + k * interval`: skip any
                    // that already passed instead of firing a bunch.
                    let mut next = entry.deadline + interval;
                    if interval > Duration::ZERO {
                        let now = Instant::now();
                        while next <= now {
                            next += interval;
                        }
                    }
                    let mut state = timer.state.lock();
                    if state.shutdown {
                        return;
                    }
                    state.seq += 1;
                    let seq = state.seq;
                    state.heap.push(TimerEntry {
                        deadline: next,
                        seq,
                        cancelled: entry.cancelled,
                        job: TimerJob::Repeat { work, interval },
                    });
                }
            }
        }
    }

    fn push_entry(&self, deadline: Instant, job: TimerJob) -> Box<dyn Disposable> {
        let cancelled = Arc::new(AtomicBool::new(false));
        {
            let mut state = self.core.timer.state.lock();
            assert!(
                !state.shutdown,
                "QueueScheduler \"{}\": timer has been torn down",
                self.core.label
            );
            state.seq += 1;
            let seq = state.seq;
            state.heap.push(TimerEntry {
                deadline,
                seq,
                cancelled: Arc::clone(&cancelled),
                job,
            });
        }
        self.core.timer.cond.notify_all();
        Box::new(AnyDisposable::new(move || {
            cancelled.store(true, Ordering::Release);
        }))
    }
}

impl Scheduler for QueueScheduler {
    fn schedule(&self, work: Work) -> Option<Box<dyn Disposable>> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let job: Job = Box::new(move || {
            if !flag.load(Ordering::Acquire) {
                work();
            }
        });
        if self.core.tx.send(job).is_err() {
            panic!(
                "QueueScheduler \"{}\": worker thread has been torn down",
                self.core.label
            );
        }
        Some(Box::new(AnyDisposable::new(move || {
            cancelled.store(true, Ordering::Release);
        })))
    }
}

impl DateScheduler for QueueScheduler {
    fn current_instant(&self) -> Instant {
        Instant::now()
    }

    fn schedule_after(&self, instant: Instant, work: Work) -> Option<Box<dyn Disposable>> {
        Some(self.push_entry(instant, TimerJob::Once(work)))
    }

    fn schedule_after_interval(
        &self,
        instant: Instant,
        interval: Duration,
        _leeway: Duration,
        work: RepeatingWork,
    ) -> Option<Box<dyn Disposable>> {
        Some(self.push_entry(
            instant,
            TimerJob::Repeat {
                work: Arc::new(Mutex::new(work)),
                interval,
            },
        ))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn runs_in_fifo_order() {
        let scheduler = QueueScheduler::new("test.fifo");
        let (tx, rx) = bounded(16);
        for i in 0..5 {
            let tx = tx.clone();
            scheduler.schedule(Box::new(move || {
                tx.send(i).unwrap();
            }));
        }
        let seen: Vec<i32> = (0..5).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn disposed_before_dispatch_never_runs() {
        let scheduler = QueueScheduler::new("test.cancel");
        let (gate_tx, gate_rx) = bounded::<()>(1);
        let (probe_tx, probe_rx) = bounded::<&'static str>(4);

        // Block the worker so the second job stays queued.
        scheduler.schedule(Box::new(move || {
            gate_rx.recv().unwrap();
        }));
        let probe = probe_tx.clone();
        let handle = scheduler
            .schedule(Box::new(move || {
                probe.send("cancelled-job-ran").unwrap();
            }))
            .expect("queue schedule returns a handle");
        handle.dispose();
        scheduler.schedule(Box::new(move || {
            probe_tx.send("sentinel").unwrap();
        }));
        gate_tx.send(()).unwrap();

        assert_eq!(probe_rx.recv_timeout(WAIT).unwrap(), "sentinel");
    }

    #[test]
    fn schedule_after_fires_once() {
        let scheduler = QueueScheduler::new("test.after");
        let (tx, rx) = bounded(1);
        scheduler.schedule_after(
            Instant::now() + Duration::from_millis(20),
            Box::new(move || {
                tx.send(()).unwrap();
            }),
        );
        assert!(rx.recv_timeout(WAIT).is_ok());
    }

    #[test]
    fn schedule_after_cancel_before_deadline() {
        let scheduler = QueueScheduler::new("test.after-cancel");
        let (tx, rx) = bounded(1);
        let handle = scheduler
            .schedule_after(
                Instant::now() + Duration::from_millis(50),
                Box::new(move || {
                    tx.send(()).unwrap();
                }),
            )
            .expect("delayed schedule returns a handle");
        handle.dispose();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn repeating_fires_and_stops_on_dispose() {
        let scheduler = QueueScheduler::new("test.repeat");
        let (tx, rx) = bounded(64);
        let handle = scheduler
            .schedule_after_interval(
                Instant::now(),
                Duration::from_millis(10),
                Duration::ZERO,
                Box::new(move || {
                    let _ = tx.try_send(());
                }),
            )
            .expect("repeating schedule returns a handle");

        for _ in 0..3 {
            assert!(rx.recv_timeout(WAIT).is_ok(), "tick expected");
        }
        handle.dispose();
        // Drain anything in flight, then confirm the ticks stop.
        while rx.recv_timeout(Duration::from_millis(50)).is_ok() {}
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
