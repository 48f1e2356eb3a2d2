use crate::job::{Fault, WorkBox, WorkList};
use crate::runtime::park::ParkEvent;
use crate::runtime::runtime::RuntimeConfig;
use crate::time::TimerHandle;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// What a worker should do when both its stack and the shared stack are
/// empty. Returned by the runtime's idle handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idle {
    /// Re-check the shared stack immediately.
    Again,
    /// Park until signalled.
    Park,
    /// Park, but wake after at most this long.
    ParkFor(Duration),
}

pub(crate) type IdleHandler = Box<dyn Fn() -> Idle + Send + Sync>;
pub(crate) type TopLevelHandler = Box<dyn Fn(&Fault) + Send + Sync>;

struct SharedState {
    /// Overflow stack of stealable work, newest at the head.
    stack: WorkList,
    /// LIFO stack of parked worker indices.
    waiters: Vec<usize>,
}

/// Process-wide coordinator: the shared overflow stack, the parking events,
/// the idle handler and the top-level fault sink.
///
/// Workers are symmetric; there is no scheduler thread. The single lock
/// covers the overflow stack and the waiter stack; hold times are O(1)
/// except for the stealing walk, which only runs on an otherwise idle
/// worker.
pub(crate) struct Scheduler {
    pub(crate) cfg: RuntimeConfig,

    shared: Mutex<SharedState>,

    /// Mirror of the shared stack length, readable without the lock. Only a
    /// heuristic input (the push-overflow check); the lock-holder's view is
    /// authoritative.
    shared_len: AtomicUsize,

    /// One park event per worker, indexed by worker id.
    events: Vec<ParkEvent>,

    idle_handler: Option<IdleHandler>,

    top_level: TopLevelHandler,

    shutdown: AtomicBool,

    /// Deadline service behind `Alt::after`; started on first use.
    timer: OnceLock<TimerHandle>,
}

impl Scheduler {
    pub(crate) fn new(
        cfg: RuntimeConfig,
        idle_handler: Option<IdleHandler>,
        top_level: Option<TopLevelHandler>,
    ) -> Scheduler {
        let events = (0..cfg.worker_threads).map(|_| ParkEvent::new()).collect();
        Scheduler {
            cfg,
            shared: Mutex::new(SharedState {
                stack: WorkList::new(),
                waiters: Vec::new(),
            }),
            shared_len: AtomicUsize::new(0),
            events,
            idle_handler,
            top_level: top_level.unwrap_or_else(|| {
                Box::new(|fault| tracing::error!("unhandled job fault: {}", fault))
            }),
            shutdown: AtomicBool::new(false),
            timer: OnceLock::new(),
        }
    }

    pub(crate) fn shared_len(&self) -> usize {
        self.shared_len.load(Ordering::Relaxed)
    }

    /// Publishes one work item and wakes a parked worker if any.
    pub(crate) fn inject_one(&self, work: WorkBox) {
        let mut sh = self.shared.lock();
        sh.stack.push(work);
        self.shared_len.store(sh.stack.len(), Ordering::Relaxed);
        self.signal_one_locked(&mut sh);
    }

    /// Publishes a whole stack (a worker's older local work) and wakes a
    /// parked worker. The incoming items end up in front of whatever was
    /// already shared, preserving newest-at-the-head.
    pub(crate) fn inject(&self, list: WorkList) {
        if list.is_empty() {
            return;
        }
        let mut sh = self.shared.lock();
        sh.stack.append(list);
        self.shared_len.store(sh.stack.len(), Ordering::Relaxed);
        self.signal_one_locked(&mut sh);
    }

    /// Takes a share of the overflow stack for an idle worker.
    ///
    /// The split point is found by walking `len >> 2` links from the head:
    /// the newest quarter stays shared for other stealers, the older suffix
    /// goes to the caller. The ratio is a tunable, not a contract. If work
    /// remains shared afterwards, one parked worker is signalled so the
    /// leftovers do not sit unclaimed.
    pub(crate) fn steal_share(&self) -> Option<WorkList> {
        let mut sh = self.shared.lock();
        if sh.stack.is_empty() {
            return None;
        }
        let keep = sh.stack.len() >> 2;
        let share = sh.stack.split_off(keep);
        self.shared_len.store(sh.stack.len(), Ordering::Relaxed);
        if !sh.stack.is_empty() {
            self.signal_one_locked(&mut sh);
        }
        Some(share)
    }

    pub(crate) fn idle(&self) -> Idle {
        match &self.idle_handler {
            Some(handler) => handler(),
            None => Idle::Park,
        }
    }

    /// Parks the calling worker.
    ///
    /// The shared stack is re-checked under the lock before the index is
    /// published, and `signal_one` only runs under the same lock after work
    /// is published, so a wakeup cannot be lost. Spurious wakes are fine:
    /// the worker just re-enters the scheduler.
    pub(crate) fn park(&self, index: usize, timeout: Option<Duration>) {
        {
            let mut sh = self.shared.lock();
            if !sh.stack.is_empty() || self.is_shutdown() {
                return;
            }
            sh.waiters.push(index);
        }
        self.events[index].wait(timeout);
        // A timed-out worker may still be on the waiter stack; a signalled
        // one is not. Either way it must not linger there.
        let mut sh = self.shared.lock();
        sh.waiters.retain(|&i| i != index);
    }

    pub(crate) fn signal_one(&self) {
        let mut sh = self.shared.lock();
        self.signal_one_locked(&mut sh);
    }

    fn signal_one_locked(&self, sh: &mut SharedState) {
        if let Some(index) = sh.waiters.pop() {
            self.events[index].set();
        }
    }

    pub(crate) fn report(&self, fault: Fault) {
        (self.top_level)(&fault);
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Sets the shutdown flag and wakes every parked worker. Idempotent;
    /// returns whether this call was the one that initiated shutdown.
    pub(crate) fn begin_shutdown(&self) -> bool {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return false;
        }
        let mut sh = self.shared.lock();
        for index in sh.waiters.drain(..) {
            self.events[index].set();
        }
        true
    }

    pub(crate) fn timer(sched: &Arc<Scheduler>) -> &TimerHandle {
        sched
            .timer
            .get_or_init(|| TimerHandle::start(Arc::downgrade(sched)))
    }

    pub(crate) fn stop_timer(&self) {
        if let Some(timer) = self.timer.get() {
            timer.stop();
        }
    }
}

/// [`Exec`](crate::job::Exec) impl for contexts without a worker (the timer
/// thread, external entry points): submissions go through the overflow
/// stack.
pub(crate) struct Remote<'a>(pub(crate) &'a Scheduler);

impl crate::job::Exec for Remote<'_> {
    fn submit(&mut self, work: WorkBox) {
        self.0.inject_one(work);
    }
}
