use crate::alt::{Alt, ContFactory, Flow, PickSession};
use crate::job::{ContBox, Job};
use crate::runtime::Worker;
use crate::sync::pick::{claim_pair, Claim, Pick};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Synchronous, unbuffered rendezvous point.
///
/// A give and a take meet in the same logical tick: neither side proceeds
/// until the other has committed, and the value moves exactly once. Both
/// operations are alternatives, so they compose under
/// [`choose`](Alt::choose) and friends; converting one to a job is just a
/// single-branch pick ([`send`](Channel::send) / [`recv`](Channel::recv)).
///
/// Cloning is shallow; clones address the same channel.
pub struct Channel<T> {
    inner: Arc<ChanInner<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Channel<T> {
        Channel {
            inner: self.inner.clone(),
        }
    }
}

struct ChanInner<T> {
    waiters: Mutex<Waiters<T>>,
}

/// Waiting offers, FIFO per side.
///
/// Outside the critical section at most one side is non-empty — a giver only
/// enqueues after failing to match every waiting taker and vice versa. The
/// one exception is a single choice offering both a give and a take on the
/// same channel: those offers share a pick, cannot match each other, and may
/// sit on both sides at once.
struct Waiters<T> {
    givers: VecDeque<Giver<T>>,
    takers: VecDeque<Taker<T>>,
}

/// A parked give offer: the value, the shared pick, and the continuation to
/// resume with `()` once a taker commits.
pub(crate) struct Giver<T> {
    pub(crate) pick: Arc<Pick>,
    pub(crate) branch: u32,
    pub(crate) value: Option<T>,
    pub(crate) cont: Option<ContBox<()>>,
}

/// A parked take offer: the shared pick and the continuation to resume with
/// the communicated value once a giver commits.
pub(crate) struct Taker<T> {
    pub(crate) pick: Arc<Pick>,
    pub(crate) branch: u32,
    pub(crate) cont: Option<ContBox<T>>,
}

enum Hit<W> {
    /// Claimed a counter-party; the rendezvous is committed.
    Matched(W),
    /// Our own pick was decided elsewhere while scanning.
    Lost,
}

impl<T: Send + 'static> Channel<T> {
    pub fn new() -> Channel<T> {
        Channel {
            inner: Arc::new(ChanInner {
                waiters: Mutex::new(Waiters {
                    givers: VecDeque::new(),
                    takers: VecDeque::new(),
                }),
            }),
        }
    }

    /// An alternative that offers `value` on this channel and becomes
    /// available when a taker commits.
    pub fn give(&self, value: T) -> Alt<()> {
        Alt::give(self.clone(), value)
    }

    /// An alternative that becomes available with the offered value when a
    /// giver commits.
    pub fn take(&self) -> Alt<T> {
        Alt::take(self.clone())
    }

    /// Single-branch pick of [`give`](Channel::give).
    pub fn send(&self, value: T) -> Job<()> {
        self.give(value).pick()
    }

    /// Single-branch pick of [`take`](Channel::take).
    pub fn recv(&self) -> Job<T> {
        self.take().pick()
    }

    /// Give commit path, entered during pick instantiation.
    ///
    /// Scans waiting takers from the head: stale offers are dropped, a valid
    /// one is claimed pairwise with our own pick. On a match the taker
    /// resumes with the value as queued work on this worker, nacks fire for
    /// both picks' losing branches, and our own continuation resumes with
    /// `()`. With no claimable taker the offer parks in the giver queue.
    pub(crate) fn try_give(
        &self,
        wr: &mut Worker,
        sess: &PickSession,
        branch: u32,
        value: T,
        k: ContFactory<()>,
    ) -> Flow {
        let mut q = self.inner.waiters.lock();
        let mut i = 0;
        let hit = loop {
            if i >= q.takers.len() {
                break None;
            }
            if Arc::ptr_eq(&sess.pick, &q.takers[i].pick) {
                // Our own take branch on the same channel; skip, never match.
                i += 1;
                continue;
            }
            match claim_pair(&sess.pick, branch, &q.takers[i].pick, q.takers[i].branch) {
                Claim::Won => {
                    break Some(Hit::Matched(
                        q.takers.remove(i).expect("scan index in bounds"),
                    ));
                }
                Claim::SelfDecided => break Some(Hit::Lost),
                Claim::OtherDecided => {
                    q.takers.remove(i);
                }
            }
        };
        match hit {
            Some(Hit::Matched(mut taker)) => {
                drop(q);
                let mut cont = taker.cont.take().expect("taker resumed twice");
                cont.put(value);
                wr.push(cont);
                taker.pick.fire_nacks(&mut *wr, taker.branch);
                sess.pick.fire_nacks(&mut *wr, branch);
                let own = k();
                wr.resume(own, ());
                Flow::Done
            }
            Some(Hit::Lost) => Flow::Done,
            None => {
                q.givers.push_back(Giver {
                    pick: sess.pick.clone(),
                    branch,
                    value: Some(value),
                    cont: Some(k()),
                });
                Flow::Pending
            }
        }
    }

    /// Take commit path; symmetric to [`try_give`](Channel::try_give).
    pub(crate) fn try_take(
        &self,
        wr: &mut Worker,
        sess: &PickSession,
        branch: u32,
        k: ContFactory<T>,
    ) -> Flow {
        let mut q = self.inner.waiters.lock();
        let mut i = 0;
        let hit = loop {
            if i >= q.givers.len() {
                break None;
            }
            if Arc::ptr_eq(&sess.pick, &q.givers[i].pick) {
                i += 1;
                continue;
            }
            match claim_pair(&sess.pick, branch, &q.givers[i].pick, q.givers[i].branch) {
                Claim::Won => {
                    break Some(Hit::Matched(
                        q.givers.remove(i).expect("scan index in bounds"),
                    ));
                }
                Claim::SelfDecided => break Some(Hit::Lost),
                Claim::OtherDecided => {
                    q.givers.remove(i);
                }
            }
        };
        match hit {
            Some(Hit::Matched(mut giver)) => {
                drop(q);
                let mut cont = giver.cont.take().expect("giver resumed twice");
                cont.put(());
                wr.push(cont);
                giver.pick.fire_nacks(&mut *wr, giver.branch);
                sess.pick.fire_nacks(&mut *wr, branch);
                let value = giver.value.take().expect("giver without a value");
                let own = k();
                wr.resume(own, value);
                Flow::Done
            }
            Some(Hit::Lost) => Flow::Done,
            None => {
                q.takers.push_back(Taker {
                    pick: sess.pick.clone(),
                    branch,
                    cont: Some(k()),
                });
                Flow::Pending
            }
        }
    }
}

impl<T: Send + 'static> Default for Channel<T> {
    fn default() -> Channel<T> {
        Channel::new()
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = self.inner.waiters.lock();
        f.debug_struct("Channel")
            .field("givers", &q.givers.len())
            .field("takers", &q.takers.len())
            .finish()
    }
}
