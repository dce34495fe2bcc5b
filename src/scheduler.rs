//! Deferred task scheduling and the per-worker sampled clock.
//!
//! Each worker owns a [`ScheduleQueue`] drained by its event loop; callers
//! hold cloneable [`Scheduler`] handles. Tasks run on the worker's thread at
//! or after their deadline.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::handler::Task;
use crate::waker::Waker;

/// Handle for scheduling deferred tasks onto a worker's event loop.
///
/// Cloneable and usable from any thread. Scheduling wakes the target loop.
#[derive(Clone)]
pub struct Scheduler {
    tx: Sender<ScheduledTask>,
    wake: Arc<Waker>,
}

impl Scheduler {
    /// Schedule `task` to run after `delay`. Returns false if the worker's
    /// queue is gone (the loop has terminated).
    pub fn schedule(&self, delay: Duration, task: Task) -> bool {
        let entry = ScheduledTask {
            run_at: Instant::now() + delay,
            seq: next_seq(),
            task,
        };
        let ok = self.tx.send(entry).is_ok();
        if ok {
            self.wake.wake();
        }
        ok
    }

    /// Schedule `task` to run on the next loop iteration.
    pub fn schedule_now(&self, task: Task) -> bool {
        self.schedule(Duration::ZERO, task)
    }
}

pub(crate) struct ScheduledTask {
    run_at: Instant,
    seq: u64,
    task: Task,
}

// Min-heap ordering: the earliest deadline is the greatest element. Ties
// break on submission order.
impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.seq == other.seq
    }
}

impl Eq for ScheduledTask {}

fn next_seq() -> u64 {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    SEQ.fetch_add(1, Ordering::Relaxed)
}

/// Worker-side half of a scheduler: the pending timer queue drained by the
/// event loop.
pub struct ScheduleQueue {
    rx: Receiver<ScheduledTask>,
    heap: BinaryHeap<ScheduledTask>,
    wake: Arc<Waker>,
}

impl ScheduleQueue {
    /// Pull newly scheduled tasks into the timer heap.
    pub fn drain_new(&mut self) {
        while let Ok(entry) = self.rx.try_recv() {
            self.heap.push(entry);
        }
    }

    /// Deadline of the earliest pending task, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|entry| entry.run_at)
    }

    /// Run every task due at `now`. Returns how many ran.
    pub fn run_due(&mut self, now: Instant) -> usize {
        let mut ran = 0;
        while let Some(entry) = self.heap.peek() {
            if entry.run_at > now {
                break;
            }
            if let Some(entry) = self.heap.pop() {
                (entry.task)();
                ran += 1;
            }
        }
        ran
    }

    /// Number of tasks waiting in the heap (not counting undrained sends).
    pub fn pending(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn waker(&self) -> &Arc<Waker> {
        &self.wake
    }
}

/// Create a connected scheduler handle / queue pair.
///
/// The pair shares an eventfd waker: scheduling from any thread wakes the
/// loop draining the queue. Custom [`TransportThread`](crate::TransportThread)
/// implementations hand out clones of the handle and drive the queue from
/// their own loop.
pub fn scheduler_pair() -> io::Result<(Scheduler, ScheduleQueue)> {
    let wake = Arc::new(Waker::new()?);
    let (tx, rx) = unbounded();
    let scheduler = Scheduler {
        tx,
        wake: wake.clone(),
    };
    let queue = ScheduleQueue {
        rx,
        heap: BinaryHeap::new(),
        wake,
    };
    Ok((scheduler, queue))
}

/// Cached clock updated once per event-loop iteration.
///
/// Lets per-component bookkeeping read "now" without a syscall per touch.
/// The sampled instant lags real time by at most one loop iteration.
#[derive(Clone)]
pub struct TimeSampler {
    origin: Instant,
    elapsed_nanos: Arc<AtomicU64>,
}

impl TimeSampler {
    pub fn new() -> TimeSampler {
        TimeSampler {
            origin: Instant::now(),
            elapsed_nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record the current time. The loop calls this once per iteration.
    pub fn sample(&self) {
        self.elapsed_nanos
            .store(self.origin.elapsed().as_nanos() as u64, Ordering::Relaxed);
    }

    /// The most recently sampled instant.
    pub fn now(&self) -> Instant {
        self.origin + Duration::from_nanos(self.elapsed_nanos.load(Ordering::Relaxed))
    }
}

impl Default for TimeSampler {
    fn default() -> Self {
        Self::new()
    }
}
