use crate::job::work::{Cont, ContBox, Link, Work, WorkBox};
use crate::job::{Fault, Job};
use crate::runtime::Worker;
use std::panic::{self, AssertUnwindSafe};

// Continuation adapters for the `Job` combinators. Each adapter keeps its
// downstream continuation in place until user code has returned, so a panic
// inside the user closure still has a live fault path to travel down.

pub(crate) struct BindCont<T, U, F> {
    link: Link,
    f: Option<F>,
    next: Option<ContBox<U>>,
    value: Option<T>,
}

impl<T, U, F> BindCont<T, U, F> {
    pub(crate) fn new(f: F, next: ContBox<U>) -> BindCont<T, U, F> {
        BindCont {
            link: Link::empty(),
            f: Some(f),
            next: Some(next),
            value: None,
        }
    }
}

impl<T, U, F> Work for BindCont<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnOnce(T) -> Job<U> + Send + 'static,
{
    fn link(&mut self) -> &mut Link {
        &mut self.link
    }

    fn run(&mut self, wr: &mut Worker) {
        let value = self.value.take().expect("continuation resumed without a value");
        let f = self.f.take().expect("continuation resumed twice");
        match panic::catch_unwind(AssertUnwindSafe(|| f(value))) {
            Ok(job) => {
                let next = self.next.take().expect("continuation resumed twice");
                wr.run_job(job, next);
            }
            Err(payload) => self.fault(wr, Fault::from_panic(payload)),
        }
    }

    fn fault(&mut self, wr: &mut Worker, fault: Fault) {
        match self.next.take() {
            Some(mut next) => next.fault(wr, fault),
            None => wr.report(fault),
        }
    }
}

impl<T, U, F> Cont<T> for BindCont<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnOnce(T) -> Job<U> + Send + 'static,
{
    fn put(&mut self, value: T) {
        self.value = Some(value);
    }
}

pub(crate) struct MapCont<T, U, F> {
    link: Link,
    f: Option<F>,
    next: Option<ContBox<U>>,
    value: Option<T>,
}

impl<T, U, F> MapCont<T, U, F> {
    pub(crate) fn new(f: F, next: ContBox<U>) -> MapCont<T, U, F> {
        MapCont {
            link: Link::empty(),
            f: Some(f),
            next: Some(next),
            value: None,
        }
    }
}

impl<T, U, F> Work for MapCont<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnOnce(T) -> U + Send + 'static,
{
    fn link(&mut self) -> &mut Link {
        &mut self.link
    }

    fn run(&mut self, wr: &mut Worker) {
        let value = self.value.take().expect("continuation resumed without a value");
        let f = self.f.take().expect("continuation resumed twice");
        match panic::catch_unwind(AssertUnwindSafe(|| f(value))) {
            Ok(mapped) => {
                let next = self.next.take().expect("continuation resumed twice");
                wr.resume(next, mapped);
            }
            Err(payload) => self.fault(wr, Fault::from_panic(payload)),
        }
    }

    fn fault(&mut self, wr: &mut Worker, fault: Fault) {
        match self.next.take() {
            Some(mut next) => next.fault(wr, fault),
            None => wr.report(fault),
        }
    }
}

impl<T, U, F> Cont<T> for MapCont<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnOnce(T) -> U + Send + 'static,
{
    fn put(&mut self, value: T) {
        self.value = Some(value);
    }
}

/// The frame installed by [`Job::catch`]: values pass straight through, a
/// fault runs the recovery closure and continues with the job it builds.
pub(crate) struct CatchCont<T, F> {
    link: Link,
    recover: Option<F>,
    next: Option<ContBox<T>>,
    value: Option<T>,
}

impl<T, F> CatchCont<T, F> {
    pub(crate) fn new(recover: F, next: ContBox<T>) -> CatchCont<T, F> {
        CatchCont {
            link: Link::empty(),
            recover: Some(recover),
            next: Some(next),
            value: None,
        }
    }
}

impl<T, F> Work for CatchCont<T, F>
where
    T: Send + 'static,
    F: FnOnce(Fault) -> Job<T> + Send + 'static,
{
    fn link(&mut self) -> &mut Link {
        &mut self.link
    }

    fn run(&mut self, wr: &mut Worker) {
        let value = self.value.take().expect("continuation resumed without a value");
        let next = self.next.take().expect("continuation resumed twice");
        wr.resume(next, value);
    }

    fn fault(&mut self, wr: &mut Worker, fault: Fault) {
        let recover = self.recover.take().expect("catch frame entered twice");
        match panic::catch_unwind(AssertUnwindSafe(|| recover(fault))) {
            Ok(job) => {
                let next = self.next.take().expect("catch frame entered twice");
                wr.run_job(job, next);
            }
            Err(payload) => match self.next.take() {
                Some(mut next) => next.fault(wr, Fault::from_panic(payload)),
                None => wr.report(Fault::from_panic(payload)),
            },
        }
    }
}

impl<T, F> Cont<T> for CatchCont<T, F>
where
    T: Send + 'static,
    F: FnOnce(Fault) -> Job<T> + Send + 'static,
{
    fn put(&mut self, value: T) {
        self.value = Some(value);
    }
}

/// Terminal continuation for fire-and-forget jobs. Uncaught faults go to the
/// scheduler's top-level handler.
pub(crate) struct DoneCont {
    link: Link,
}

impl DoneCont {
    pub(crate) fn new() -> DoneCont {
        DoneCont { link: Link::empty() }
    }
}

impl Work for DoneCont {
    fn link(&mut self) -> &mut Link {
        &mut self.link
    }

    fn run(&mut self, _wr: &mut Worker) {}

    fn fault(&mut self, wr: &mut Worker, fault: Fault) {
        wr.report(fault);
    }
}

impl Cont<()> for DoneCont {
    fn put(&mut self, _value: ()) {}
}

/// A deferred job start: the job plus the continuation it will feed,
/// packaged as a queueable work item.
pub(crate) struct JobWork<T> {
    link: Link,
    job: Option<Job<T>>,
    next: Option<ContBox<T>>,
}

impl<T: Send + 'static> JobWork<T> {
    pub(crate) fn new(job: Job<T>, next: ContBox<T>) -> JobWork<T> {
        JobWork {
            link: Link::empty(),
            job: Some(job),
            next: Some(next),
        }
    }
}

impl<T: Send + 'static> Work for JobWork<T> {
    fn link(&mut self) -> &mut Link {
        &mut self.link
    }

    fn run(&mut self, wr: &mut Worker) {
        let job = self.job.take().expect("job started twice");
        let next = self.next.take().expect("job started twice");
        (job.run)(wr, next);
    }

    fn fault(&mut self, wr: &mut Worker, fault: Fault) {
        match self.next.take() {
            Some(mut next) => next.fault(wr, fault),
            None => wr.report(fault),
        }
    }
}

pub(crate) fn job_work<T: Send + 'static>(job: Job<T>, next: ContBox<T>) -> WorkBox {
    Box::new(JobWork::new(job, next))
}

/// Work item for a spawned `Job<()>` with nothing downstream.
pub(crate) fn spawn_work(job: Job<()>) -> WorkBox {
    job_work(job, Box::new(DoneCont::new()))
}
