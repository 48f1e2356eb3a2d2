use crate::job::{Cont, ContBox, Fault, Job, Link, Work};
use crate::runtime::Worker;
use crate::sync::channel::Channel;
use crate::sync::latch::Latch;
use crate::sync::pick::Pick;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Duration;

mod nodes;
use nodes::{
    AfterAlt, AlwaysAlt, ChooseAlt, GiveAlt, GuardAlt, LatchAlt, NeverAlt, TakeAlt, WithNackAlt,
    WrapAbortAlt, WrapAlt,
};

#[cfg(test)]
mod tests;

/// A first-class description of a potential communication: a channel offer,
/// a timeout, a constant, or a composition of those under selective choice.
///
/// An alternative does nothing until [`pick`](Alt::pick)ed. Picking
/// registers the current job's continuation as a waiter on every base
/// branch; the first branch whose counter-party commits wins, its wrap chain
/// runs on the committing worker, and every losing `with_nack` branch is
/// negatively acknowledged.
///
/// `Alt` values are affine: picking consumes the value, and the closures
/// inside are `FnOnce`. Rebuilding is cheap; use [`guard`](Alt::guard) when
/// a fresh alternative must be materialised at pick time.
pub struct Alt<T: Send + 'static> {
    pub(crate) node: Box<dyn AltNode<T>>,
}

/// One step of pick instantiation.
pub(crate) enum Flow {
    /// The pick has committed (here or on another worker); instantiation
    /// stops and the continuation flows through the winner.
    Done,
    /// Offers were registered; the job is suspended until a counter-party
    /// commits.
    Pending,
}

/// A node in the alternative tree. `try_pick` either commits immediately,
/// registers waiters referring to the session's pick, or both halts because
/// the pick is already decided.
pub(crate) trait AltNode<T: Send + 'static>: Send {
    fn try_pick(
        self: Box<Self>,
        wr: &mut Worker,
        sess: &mut PickSession,
        k: ContFactory<T>,
    ) -> Flow;
}

/// Builds the per-branch continuation chain for a base offer. Each
/// registration gets its own chain instance; single-shot pieces (the wrap
/// transform, the user continuation) live behind shared cells that the
/// winning branch drains.
pub(crate) type ContFactory<T> = Arc<dyn Fn() -> ContBox<T> + Send + Sync + 'static>;

/// State of one selective wait during instantiation: the shared pick plus
/// the branch id allocator.
pub(crate) struct PickSession {
    pub(crate) pick: Arc<Pick>,
    next_branch: u32,
}

impl PickSession {
    fn new() -> PickSession {
        PickSession {
            pick: Arc::new(Pick::new()),
            next_branch: 0,
        }
    }

    pub(crate) fn alloc_branch(&mut self) -> u32 {
        let branch = self.next_branch;
        self.next_branch += 1;
        branch
    }

    /// Current branch-id high-water mark; a node's branches span the
    /// watermark before and after instantiating it.
    pub(crate) fn watermark(&self) -> u32 {
        self.next_branch
    }
}

impl<T: Send + 'static> Alt<T> {
    pub(crate) fn from_node(node: impl AltNode<T> + 'static) -> Alt<T> {
        Alt {
            node: Box::new(node),
        }
    }

    /// Immediately available with `value`.
    pub fn always(value: T) -> Alt<T> {
        Alt::from_node(AlwaysAlt { value: Some(value) })
    }

    /// Never available.
    pub fn never() -> Alt<T> {
        Alt::from_node(NeverAlt)
    }

    /// Available when any branch is; branches are tried and registered in
    /// order, so the leftmost immediately-available branch wins.
    pub fn choose(alts: impl IntoIterator<Item = Alt<T>>) -> Alt<T> {
        Alt::from_node(ChooseAlt {
            alts: alts.into_iter().collect::<SmallVec<[Alt<T>; 4]>>(),
        })
    }

    /// On commit, pass the result through `f` before resuming the picking
    /// job. `f` runs on the committing worker; transforms compose like
    /// function composition and a panic inside one travels the fault chain.
    pub fn wrap<U: Send + 'static>(self, f: impl FnOnce(T) -> U + Send + 'static) -> Alt<U> {
        Alt::from_node(WrapAlt { inner: self, f })
    }

    /// If this alternative loses the pick, start `job` asynchronously.
    /// Faults of an abort job go to the top-level handler.
    pub fn wrap_abort(self, job: Job<()>) -> Alt<T> {
        Alt::from_node(WrapAbortAlt { inner: self, job })
    }

    /// Late binding: `f` runs on the picking worker at pick time and
    /// produces the alternative to use, side effects included.
    pub fn guard(f: impl FnOnce(&mut Worker) -> Alt<T> + Send + 'static) -> Alt<T> {
        Alt::from_node(GuardAlt { f })
    }

    /// `build` receives a nack alternative that becomes available precisely
    /// when the enclosing pick commits to a branch outside the alternative
    /// `build` returns — the principled way to release resources on a lost
    /// race. The nack is itself an alternative other jobs can synchronise
    /// on.
    pub fn with_nack(build: impl FnOnce(&mut Worker, Alt<()>) -> Alt<T> + Send + 'static) -> Alt<T> {
        Alt::from_node(WithNackAlt { build })
    }

    /// Converts this alternative into the job that picks it: the job
    /// suspends until some branch commits and produces that branch's value.
    pub fn pick(self) -> Job<T> {
        Job::new(move |wr, next| {
            let mut sess = PickSession::new();
            let slot = Arc::new(PickSlot {
                cont: Mutex::new(Some(next)),
            });
            let factory: ContFactory<T> = Arc::new(move || {
                let cont: ContBox<T> = Box::new(SlotCont {
                    link: Link::empty(),
                    slot: slot.clone(),
                    value: None,
                });
                cont
            });
            // Done or Pending, there is nothing left to do here: the
            // continuation is in the slot and resumes through whichever
            // branch commits.
            let _ = self.node.try_pick(wr, &mut sess, factory);
        })
    }

    pub(crate) fn give(ch: Channel<T>, value: T) -> Alt<()> {
        Alt::from_node(GiveAlt {
            ch,
            value: Some(value),
        })
    }

    pub(crate) fn take(ch: Channel<T>) -> Alt<T> {
        Alt::from_node(TakeAlt { ch })
    }
}

/// An alternative is usable wherever a job is expected: converting is the
/// single-branch pick.
impl<T: Send + 'static> From<Alt<T>> for Job<T> {
    fn from(alt: Alt<T>) -> Job<T> {
        alt.pick()
    }
}

impl Alt<()> {
    /// Available `dur` after the pick, with `()`. A regular alternative:
    /// compose with [`wrap`](Alt::wrap) for timeout values.
    pub fn after(dur: Duration) -> Alt<()> {
        Alt::from_node(AfterAlt { dur })
    }

    pub(crate) fn latch(latch: Arc<Latch>) -> Alt<()> {
        Alt::from_node(LatchAlt { latch })
    }
}

/// Holds the picking job's continuation until some branch wins the claim.
pub(crate) struct PickSlot<T> {
    cont: Mutex<Option<ContBox<T>>>,
}

/// Terminal link of every branch's continuation chain: fetch the real
/// continuation from the slot and resume it. At most one branch ever gets
/// here with a value — the claim protocol guarantees it.
pub(crate) struct SlotCont<T> {
    link: Link,
    slot: Arc<PickSlot<T>>,
    value: Option<T>,
}

impl<T: Send + 'static> Work for SlotCont<T> {
    fn link(&mut self) -> &mut Link {
        &mut self.link
    }

    fn run(&mut self, wr: &mut Worker) {
        let value = self.value.take().expect("continuation resumed without a value");
        let next = self
            .slot
            .cont
            .lock()
            .take()
            .expect("picked continuation already taken");
        wr.resume(next, value);
    }

    fn fault(&mut self, wr: &mut Worker, fault: Fault) {
        match self.slot.cont.lock().take() {
            Some(mut next) => next.fault(wr, fault),
            // The pick committed elsewhere; the fault has no job left to
            // land in.
            None => wr.report(fault),
        }
    }
}

impl<T: Send + 'static> Cont<T> for SlotCont<T> {
    fn put(&mut self, value: T) {
        self.value = Some(value);
    }
}

/// Claims the pick for a fault raised during instantiation (a guard or
/// nack-builder that panicked) and delivers it to the picking job. If the
/// pick already committed elsewhere the job is fine — the fault can only go
/// to the top-level handler.
pub(crate) fn deliver_pick_fault<T: Send + 'static>(
    wr: &mut Worker,
    sess: &mut PickSession,
    k: &ContFactory<T>,
    fault: Fault,
) {
    let branch = sess.alloc_branch();
    if sess.pick.try_claim_alone(branch) {
        sess.pick.fire_nacks(&mut *wr, branch);
        let mut own = k();
        own.fault(wr, fault);
    } else {
        wr.report(fault);
    }
}
