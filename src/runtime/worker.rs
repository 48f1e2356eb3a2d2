use crate::job::{spawn_work, ContBox, Exec, FailWork, Fault, Job, WorkBox, WorkList};
use crate::runtime::scheduler::{Idle, Scheduler};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// One worker per OS thread. Owns a private LIFO work stack and runs the
/// trampoline loop; never shared, always passed as an explicit `&mut`
/// parameter into the work it drives.
pub struct Worker {
    index: usize,
    sched: Arc<Scheduler>,
    stack: WorkList,
    /// Lowest native stack address at which `exec` may still invoke work
    /// directly instead of pushing it. Set once at loop entry.
    stack_limit: usize,
}

impl Worker {
    pub(crate) fn new(index: usize, sched: Arc<Scheduler>) -> Worker {
        Worker {
            index,
            sched,
            stack: WorkList::new(),
            stack_limit: 0,
        }
    }

    /// Enqueues a job on this worker for eventual execution and returns
    /// immediately.
    pub fn spawn(&mut self, job: Job<()>) {
        let work = spawn_work(job);
        self.push(work);
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn scheduler(&self) -> &Arc<Scheduler> {
        &self.sched
    }

    /// Makes `work` the new top of the local stack.
    ///
    /// If this worker already had local work and the shared stack looks
    /// empty, the older local contents move to the shared stack first. That
    /// keeps the hottest continuation local while exposing everything else
    /// for stealing.
    pub(crate) fn push(&mut self, work: WorkBox) {
        if !self.stack.is_empty() && self.sched.shared_len() == 0 {
            let older = self.stack.take();
            self.sched.inject(older);
        }
        self.stack.push(work);
    }

    /// Puts a previously detached stack back (used when a `FailWork`
    /// re-injects the work it displaced).
    pub(crate) fn requeue(&mut self, list: WorkList) {
        self.stack.append(list);
    }

    /// Runs `work` now if native stack headroom permits, else pushes it.
    ///
    /// Direct invocation keeps tail-resumption on the hot path; the
    /// headroom check bounds native stack depth, and past the limit the
    /// push-and-return path lets the loop unwind before continuing.
    pub(crate) fn exec(&mut self, mut work: WorkBox) {
        if self.has_headroom() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| work.run(&mut *self))) {
                self.hand_off_failure(work, Fault::from_panic(payload));
            }
        } else {
            self.push(work);
        }
    }

    /// Resumes a continuation with a value, subject to the trampoline.
    pub(crate) fn resume<T: Send + 'static>(&mut self, mut next: ContBox<T>, value: T) {
        next.put(value);
        self.exec(next);
    }

    /// Starts a job, subject to the trampoline.
    pub(crate) fn run_job<T: Send + 'static>(&mut self, job: Job<T>, next: ContBox<T>) {
        if self.has_headroom() {
            (job.run)(self, next);
        } else {
            self.push(crate::job::job_work(job, next));
        }
    }

    /// Routes an otherwise unhandled fault to the top-level handler.
    pub(crate) fn report(&mut self, fault: Fault) {
        self.sched.report(fault);
    }

    /// A run step unwound past every local catch site: the remaining local
    /// stack and the faulted work become one `FailWork`, the entire work
    /// stack, which is handed to the shared scheduler. The local stack is
    /// empty afterwards, so this worker promptly re-enters scheduling.
    fn hand_off_failure(&mut self, work: WorkBox, fault: Fault) {
        let rest = self.stack.take();
        let fail = FailWork::new(rest, fault, work);
        self.sched.inject_one(fail);
    }

    fn has_headroom(&self) -> bool {
        stack_probe() > self.stack_limit
    }

    /// The worker state machine: drain the local stack, then steal a share
    /// of the shared stack, then consult the idle handler and park.
    pub(crate) fn main_loop(&mut self) {
        self.stack_limit = stack_probe().saturating_sub(self.sched.cfg.stack_trampoline_bytes);

        loop {
            // Drain local. Each run step may push more work before it
            // returns, so the stack is re-read every iteration.
            while let Some(mut work) = self.stack.pop() {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| work.run(&mut *self))) {
                    self.hand_off_failure(work, Fault::from_panic(payload));
                }
                if self.sched.is_shutdown() {
                    return;
                }
            }

            if self.sched.is_shutdown() {
                return;
            }

            if let Some(share) = self.sched.steal_share() {
                self.stack = share;
                continue;
            }

            match self.sched.idle() {
                Idle::Again => continue,
                Idle::Park => self.sched.park(self.index, None),
                Idle::ParkFor(dur) => self.sched.park(self.index, Some(dur)),
            }
        }
    }
}

impl Exec for Worker {
    fn submit(&mut self, work: WorkBox) {
        self.push(work);
    }
}

/// Approximate current stack pointer. The stack grows downward on every
/// supported target, so "headroom" is "the probe address is still above the
/// limit".
#[inline(always)]
fn stack_probe() -> usize {
    let probe = 0u8;
    std::ptr::from_ref(&probe) as usize
}
