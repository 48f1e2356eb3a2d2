use crate::runtime::Worker;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

mod error;
pub use error::Fault;

pub(crate) mod work;
pub(crate) use work::{Cont, ContBox, Exec, Link, Work, WorkBox, WorkList};

pub(crate) mod cont;
pub(crate) use cont::{job_work, spawn_work};

mod fail;
pub(crate) use fail::FailWork;

use cont::{BindCont, CatchCont, MapCont};

/// A lightweight unit of computation, described by data and executed by a
/// worker.
///
/// A job is a description: running it needs a worker and a continuation, and
/// nothing happens until a worker drives it. Jobs run to a suspension point
/// (an unmatched channel offer, a pending pick, a sleep), never to a thread
/// exit; between suspension points a job owns its worker.
///
/// Failures travel as [`Fault`] values down the continuation chain to the
/// nearest [`catch`](Job::catch) frame. Panics in user closures are caught
/// at the call site and routed the same way.
pub struct Job<T> {
    pub(crate) run: Box<dyn FnOnce(&mut Worker, ContBox<T>) + Send + 'static>,
}

impl<T: Send + 'static> Job<T> {
    pub(crate) fn new(run: impl FnOnce(&mut Worker, ContBox<T>) + Send + 'static) -> Job<T> {
        Job { run: Box::new(run) }
    }

    /// A job that immediately produces `value`.
    pub fn unit(value: T) -> Job<T> {
        Job::new(move |wr, next| wr.resume(next, value))
    }

    /// Late-bound job: `f` runs on the worker when the job starts and yields
    /// the job to continue with. This is the hook for effects that need the
    /// current worker, e.g. [`Worker::spawn`].
    pub fn delay(f: impl FnOnce(&mut Worker) -> Job<T> + Send + 'static) -> Job<T> {
        Job::new(move |wr, next| match panic::catch_unwind(AssertUnwindSafe(|| f(&mut *wr))) {
            Ok(job) => wr.run_job(job, next),
            Err(payload) => fault_to(wr, next, Fault::from_panic(payload)),
        })
    }

    /// A job that raises `fault` instead of producing a value.
    pub fn fail(fault: impl Into<Fault>) -> Job<T> {
        let fault = fault.into();
        Job::new(move |wr, next| fault_to(wr, next, fault))
    }

    /// Sequence: run `self`, feed its result to `f`, continue with the job
    /// `f` builds.
    pub fn and_then<U: Send + 'static>(
        self,
        f: impl FnOnce(T) -> Job<U> + Send + 'static,
    ) -> Job<U> {
        // Started through the trampoline: a deep combinator chain unwinds
        // back to the worker loop instead of nesting native frames.
        Job::new(move |wr, next| wr.run_job(self, Box::new(BindCont::new(f, next))))
    }

    /// Transform the result in place on the finishing worker.
    pub fn map<U: Send + 'static>(self, f: impl FnOnce(T) -> U + Send + 'static) -> Job<U> {
        Job::new(move |wr, next| wr.run_job(self, Box::new(MapCont::new(f, next))))
    }

    /// Run `self`; if it faults anywhere before the next enclosing catch
    /// frame, continue with the job `recover` builds instead.
    pub fn catch(self, recover: impl FnOnce(Fault) -> Job<T> + Send + 'static) -> Job<T> {
        Job::new(move |wr, next| wr.run_job(self, Box::new(CatchCont::new(recover, next))))
    }

    /// Run `self` for its effect, then `next`.
    pub fn seq<U: Send + 'static>(self, next: Job<U>) -> Job<U> {
        self.and_then(move |_| next)
    }
}

impl Job<()> {
    /// A job that produces `()` after at least `dur` has elapsed.
    pub fn sleep(dur: Duration) -> Job<()> {
        crate::alt::Alt::after(dur).pick()
    }
}

fn fault_to<T>(wr: &mut Worker, mut next: ContBox<T>, fault: Fault) {
    next.fault(wr, fault);
}
