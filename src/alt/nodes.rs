use crate::alt::{deliver_pick_fault, Alt, AltNode, ContFactory, Flow, PickSession};
use crate::job::{Cont, Fault, Job, Link, Work};
use crate::runtime::Worker;
use crate::sync::channel::Channel;
use crate::sync::latch::Latch;
use crate::sync::pick::NackAction;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) struct AlwaysAlt<T> {
    pub(crate) value: Option<T>,
}

impl<T: Send + 'static> AltNode<T> for AlwaysAlt<T> {
    fn try_pick(
        mut self: Box<Self>,
        wr: &mut Worker,
        sess: &mut PickSession,
        k: ContFactory<T>,
    ) -> Flow {
        let branch = sess.alloc_branch();
        if sess.pick.try_claim_alone(branch) {
            sess.pick.fire_nacks(&mut *wr, branch);
            let own = k();
            let value = self.value.take().expect("always offer picked twice");
            wr.resume(own, value);
        }
        Flow::Done
    }
}

pub(crate) struct NeverAlt;

impl<T: Send + 'static> AltNode<T> for NeverAlt {
    fn try_pick(
        self: Box<Self>,
        _wr: &mut Worker,
        _sess: &mut PickSession,
        _k: ContFactory<T>,
    ) -> Flow {
        // Nothing to offer, nothing to register.
        Flow::Pending
    }
}

pub(crate) struct ChooseAlt<T: Send + 'static> {
    pub(crate) alts: SmallVec<[Alt<T>; 4]>,
}

impl<T: Send + 'static> AltNode<T> for ChooseAlt<T> {
    fn try_pick(
        self: Box<Self>,
        wr: &mut Worker,
        sess: &mut PickSession,
        k: ContFactory<T>,
    ) -> Flow {
        for alt in self.alts {
            // A counter-party may have claimed one of our earlier offers
            // while we were still instantiating; the rest of the branches
            // would only register stale waiters.
            if sess.pick.decided().is_some() {
                return Flow::Done;
            }
            if let Flow::Done = alt.node.try_pick(wr, sess, k.clone()) {
                return Flow::Done;
            }
        }
        Flow::Pending
    }
}

pub(crate) struct GiveAlt<T: Send + 'static> {
    pub(crate) ch: Channel<T>,
    pub(crate) value: Option<T>,
}

impl<T: Send + 'static> AltNode<()> for GiveAlt<T> {
    fn try_pick(
        mut self: Box<Self>,
        wr: &mut Worker,
        sess: &mut PickSession,
        k: ContFactory<()>,
    ) -> Flow {
        let branch = sess.alloc_branch();
        let value = self.value.take().expect("give offer picked twice");
        self.ch.try_give(wr, sess, branch, value, k)
    }
}

pub(crate) struct TakeAlt<T: Send + 'static> {
    pub(crate) ch: Channel<T>,
}

impl<T: Send + 'static> AltNode<T> for TakeAlt<T> {
    fn try_pick(
        self: Box<Self>,
        wr: &mut Worker,
        sess: &mut PickSession,
        k: ContFactory<T>,
    ) -> Flow {
        let branch = sess.alloc_branch();
        self.ch.try_take(wr, sess, branch, k)
    }
}

pub(crate) struct WrapAlt<A: Send + 'static, F> {
    pub(crate) inner: Alt<A>,
    pub(crate) f: F,
}

impl<A, B, F> AltNode<B> for WrapAlt<A, F>
where
    A: Send + 'static,
    B: Send + 'static,
    F: FnOnce(A) -> B + Send + 'static,
{
    fn try_pick(
        self: Box<Self>,
        wr: &mut Worker,
        sess: &mut PickSession,
        k: ContFactory<B>,
    ) -> Flow {
        let this = *self;
        // The transform is single-shot but every base branch under this
        // wrap needs a chain through it; the winner drains the cell.
        let cell = Arc::new(Mutex::new(Some(this.f)));
        let inner_k: ContFactory<A> = Arc::new(move || {
            let cont: crate::job::ContBox<A> = Box::new(WrapCont {
                link: Link::empty(),
                f: cell.clone(),
                next: Some(k()),
                value: None,
            });
            cont
        });
        this.inner.node.try_pick(wr, sess, inner_k)
    }
}

/// Post-commit transform link in a branch's continuation chain.
struct WrapCont<A, B, F> {
    link: Link,
    f: Arc<Mutex<Option<F>>>,
    next: Option<crate::job::ContBox<B>>,
    value: Option<A>,
}

impl<A, B, F> Work for WrapCont<A, B, F>
where
    A: Send + 'static,
    B: Send + 'static,
    F: FnOnce(A) -> B + Send + 'static,
{
    fn link(&mut self) -> &mut Link {
        &mut self.link
    }

    fn run(&mut self, wr: &mut Worker) {
        let value = self.value.take().expect("continuation resumed without a value");
        let f = self
            .f
            .lock()
            .take()
            .expect("wrap transform ran on two branches");
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

impl<A, B, F> Cont<A> for WrapCont<A, B, F>
where
    A: Send + 'static,
    B: Send + 'static,
    F: FnOnce(A) -> B + Send + 'static,
{
    fn put(&mut self, value: A) {
        self.value = Some(value);
    }
}

pub(crate) struct WrapAbortAlt<T: Send + 'static> {
    pub(crate) inner: Alt<T>,
    pub(crate) job: Job<()>,
}

impl<T: Send + 'static> AltNode<T> for WrapAbortAlt<T> {
    fn try_pick(
        self: Box<Self>,
        wr: &mut Worker,
        sess: &mut PickSession,
        k: ContFactory<T>,
    ) -> Flow {
        let this = *self;
        let lo = sess.watermark();
        let flow = this.inner.node.try_pick(wr, sess, k);
        let hi = sess.watermark();
        // Registered after the branches exist so the range is known; a pick
        // that already committed elsewhere starts the abort right here.
        sess.pick
            .add_nack(lo, hi, NackAction::Start(this.job), &mut *wr);
        flow
    }
}

pub(crate) struct GuardAlt<F> {
    pub(crate) f: F,
}

impl<T, F> AltNode<T> for GuardAlt<F>
where
    T: Send + 'static,
    F: FnOnce(&mut Worker) -> Alt<T> + Send + 'static,
{
    fn try_pick(
        self: Box<Self>,
        wr: &mut Worker,
        sess: &mut PickSession,
        k: ContFactory<T>,
    ) -> Flow {
        let f = self.f;
        match panic::catch_unwind(AssertUnwindSafe(|| f(&mut *wr))) {
            Ok(alt) => alt.node.try_pick(wr, sess, k),
            Err(payload) => {
                deliver_pick_fault(wr, sess, &k, Fault::from_panic(payload));
                Flow::Done
            }
        }
    }
}

pub(crate) struct WithNackAlt<F> {
    pub(crate) build: F,
}

impl<T, F> AltNode<T> for WithNackAlt<F>
where
    T: Send + 'static,
    F: FnOnce(&mut Worker, Alt<()>) -> Alt<T> + Send + 'static,
{
    fn try_pick(
        self: Box<Self>,
        wr: &mut Worker,
        sess: &mut PickSession,
        k: ContFactory<T>,
    ) -> Flow {
        let build = self.build;
        let latch = Arc::new(Latch::new());
        let nack = Alt::latch(latch.clone());
        let lo = sess.watermark();
        let alt = match panic::catch_unwind(AssertUnwindSafe(|| build(&mut *wr, nack))) {
            Ok(alt) => alt,
            Err(payload) => {
                deliver_pick_fault(wr, sess, &k, Fault::from_panic(payload));
                return Flow::Done;
            }
        };
        let flow = alt.node.try_pick(wr, sess, k);
        let hi = sess.watermark();
        sess.pick
            .add_nack(lo, hi, NackAction::Set(latch), &mut *wr);
        flow
    }
}

pub(crate) struct LatchAlt {
    pub(crate) latch: Arc<Latch>,
}

impl AltNode<()> for LatchAlt {
    fn try_pick(
        self: Box<Self>,
        wr: &mut Worker,
        sess: &mut PickSession,
        k: ContFactory<()>,
    ) -> Flow {
        let branch = sess.alloc_branch();
        self.latch.try_take(wr, sess, branch, k)
    }
}

pub(crate) struct AfterAlt {
    pub(crate) dur: Duration,
}

impl AltNode<()> for AfterAlt {
    fn try_pick(
        self: Box<Self>,
        wr: &mut Worker,
        sess: &mut PickSession,
        k: ContFactory<()>,
    ) -> Flow {
        let branch = sess.alloc_branch();
        let latch = Arc::new(Latch::new());
        crate::runtime::Scheduler::timer(wr.scheduler())
            .register(Instant::now() + self.dur, latch.clone());
        latch.try_take(wr, sess, branch, k)
    }
}
