use crate::runtime::{Remote, Scheduler};
use crate::sync::latch::Latch;
use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Instant;

/// Deadline service behind `Alt::after`.
///
/// One thread per runtime, started on first use, sleeping on the earliest
/// deadline in a heap. Expiry sets the entry's latch; the latch claims its
/// waiters through the normal pick protocol and submits the winners through
/// the scheduler's overflow stack, so the timer thread never runs user code.
/// Entries whose picks already committed elsewhere are simply stale latch
/// waiters and get dropped by the claim.
pub(crate) struct TimerHandle {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

struct TimerShared {
    queue: Mutex<BinaryHeap<Reverse<Entry>>>,
    cond: Condvar,
    stop: AtomicBool,
}

struct Entry {
    at: Instant,
    latch: Arc<Latch>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Entry) -> bool {
        self.at == other.at
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Entry) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Entry) -> std::cmp::Ordering {
        self.at.cmp(&other.at)
    }
}

impl TimerHandle {
    pub(crate) fn start(sched: Weak<Scheduler>) -> TimerHandle {
        let shared = Arc::new(TimerShared {
            queue: Mutex::new(BinaryHeap::new()),
            cond: Condvar::new(),
            stop: AtomicBool::new(false),
        });
        let thread = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("rondo-timer".to_string())
                .spawn(move || timer_loop(shared, sched))
                .expect("failed to spawn timer thread")
        };
        TimerHandle {
            shared,
            thread: Mutex::new(Some(thread)),
        }
    }

    pub(crate) fn register(&self, at: Instant, latch: Arc<Latch>) {
        let mut queue = self.shared.queue.lock();
        queue.push(Reverse(Entry { at, latch }));
        self.shared.cond.notify_one();
    }

    /// Stops and joins the timer thread. Pending entries are dropped; their
    /// latches never fire, which only matters to picks that are being
    /// abandoned anyway.
    pub(crate) fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.cond.notify_one();
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!("timer thread panicked during shutdown");
            }
        }
    }
}

fn timer_loop(shared: Arc<TimerShared>, sched: Weak<Scheduler>) {
    loop {
        let due = {
            let mut queue = shared.queue.lock();
            loop {
                if shared.stop.load(Ordering::Acquire) {
                    return;
                }
                let now = Instant::now();
                let mut due = Vec::new();
                loop {
                    let expired = matches!(queue.peek(), Some(Reverse(entry)) if entry.at <= now);
                    if !expired {
                        break;
                    }
                    let Reverse(entry) = queue.pop().expect("peeked entry vanished");
                    due.push(entry);
                }
                if !due.is_empty() {
                    break due;
                }
                let next = queue.peek().map(|entry| entry.0.at);
                match next {
                    Some(at) => {
                        let _ = shared.cond.wait_until(&mut queue, at);
                    }
                    None => shared.cond.wait(&mut queue),
                }
            }
        };

        let Some(sched) = sched.upgrade() else {
            return;
        };
        let mut exec = Remote(&sched);
        for entry in due {
            entry.latch.set(&mut exec);
        }
    }
}
