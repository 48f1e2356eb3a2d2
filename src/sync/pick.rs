use crate::job::{spawn_work, Exec, Job};
use crate::sync::latch::Latch;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const WAITING: u32 = u32::MAX;
const CLAIMED: u32 = u32::MAX - 1;

/// Shared commit state of one selective wait.
///
/// The state is a single word: `WAITING`, the transient `CLAIMED`, or the
/// winning branch id. It moves `WAITING -> CLAIMED -> branch` exactly once;
/// `CLAIMED` is only ever held across a short CAS sequence, never across a
/// blocking call, so observers may spin on it. Every offer that references a
/// decided pick is stale and gets dropped lazily by whoever scans past it.
pub(crate) struct Pick {
    state: AtomicU32,
    nacks: Mutex<SmallVec<[NackEntry; 2]>>,
}

/// Registered negative-acknowledgement range: fires when the pick commits to
/// a branch outside `lo..hi`.
struct NackEntry {
    lo: u32,
    hi: u32,
    action: NackAction,
}

pub(crate) enum NackAction {
    /// Make a `with_nack` alternative available.
    Set(Arc<Latch>),
    /// Start a `wrap_abort` job; its faults go to the top-level handler.
    Start(Job<()>),
}

impl Pick {
    pub(crate) fn new() -> Pick {
        Pick {
            state: AtomicU32::new(WAITING),
            nacks: Mutex::new(SmallVec::new()),
        }
    }

    /// The winning branch, if the pick has committed.
    pub(crate) fn decided(&self) -> Option<u32> {
        match self.state.load(Ordering::Acquire) {
            WAITING | CLAIMED => None,
            branch => Some(branch),
        }
    }

    /// `WAITING -> CLAIMED`, spinning while someone else holds the claim.
    /// `Err(branch)` if the pick is already decided.
    fn begin_claim(&self) -> Result<(), u32> {
        loop {
            match self.state.load(Ordering::Acquire) {
                WAITING => {
                    if self
                        .state
                        .compare_exchange(WAITING, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return Ok(());
                    }
                }
                CLAIMED => std::hint::spin_loop(),
                branch => return Err(branch),
            }
        }
    }

    fn commit(&self, branch: u32) {
        debug_assert_eq!(self.state.load(Ordering::Relaxed), CLAIMED);
        self.state.store(branch, Ordering::Release);
    }

    fn cancel_claim(&self) {
        debug_assert_eq!(self.state.load(Ordering::Relaxed), CLAIMED);
        self.state.store(WAITING, Ordering::Release);
    }

    /// Single-sided commit for offers without a counter-party (`always`, a
    /// set latch, a timer expiry).
    pub(crate) fn try_claim_alone(&self, branch: u32) -> bool {
        loop {
            match self.state.load(Ordering::Acquire) {
                WAITING => {
                    if self
                        .state
                        .compare_exchange(WAITING, branch, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return true;
                    }
                }
                CLAIMED => std::hint::spin_loop(),
                _ => return false,
            }
        }
    }

    /// Registers a nack range, or fires it on the spot when the pick already
    /// committed outside the range. The state is read under the nack lock and
    /// commits store the state before draining, so an entry is either seen by
    /// the drain or handled here — never both, never neither.
    pub(crate) fn add_nack(&self, lo: u32, hi: u32, action: NackAction, exec: &mut dyn Exec) {
        let mut nacks = self.nacks.lock();
        match self.decided() {
            None => nacks.push(NackEntry { lo, hi, action }),
            Some(winning) if winning < lo || winning >= hi => {
                drop(nacks);
                fire(action, exec);
            }
            Some(_) => {}
        }
    }

    /// Fires every registered nack whose range does not contain the winning
    /// branch. Called by the committing side, after the state is stored.
    pub(crate) fn fire_nacks(&self, exec: &mut dyn Exec, winning: u32) {
        debug_assert!(self.decided() == Some(winning));
        let entries = mem::take(&mut *self.nacks.lock());
        for entry in entries {
            if winning < entry.lo || winning >= entry.hi {
                fire(entry.action, exec);
            }
        }
    }
}

fn fire(action: NackAction, exec: &mut dyn Exec) {
    match action {
        NackAction::Set(latch) => latch.set(exec),
        NackAction::Start(job) => exec.submit(spawn_work(job)),
    }
}

pub(crate) enum Claim {
    /// Both picks committed; the rendezvous is on.
    Won,
    /// Our own pick was decided by someone else; stop scanning.
    SelfDecided,
    /// The counter-party's pick was decided elsewhere; drop that stale offer
    /// and keep scanning.
    OtherDecided,
}

/// Atomically commits two picks to their respective branches.
///
/// Claims are taken in pick address order, lower first. Two committers can
/// therefore never hold one claim each while spinning on the other: a cycle
/// would need each to hold the higher-addressed pick of its pair, and one of
/// them cannot. Rollback on failure leaves the already-claimed pick back in
/// `WAITING`; the caller's waiter stays enqueued and claimable.
pub(crate) fn claim_pair(
    ours: &Arc<Pick>,
    our_branch: u32,
    theirs: &Arc<Pick>,
    their_branch: u32,
) -> Claim {
    debug_assert!(
        !Arc::ptr_eq(ours, theirs),
        "an alternative cannot rendezvous with itself"
    );
    let ours_first = Arc::as_ptr(ours) < Arc::as_ptr(theirs);
    let (first, second) = if ours_first {
        (ours, theirs)
    } else {
        (theirs, ours)
    };

    if first.begin_claim().is_err() {
        return if ours_first {
            Claim::SelfDecided
        } else {
            Claim::OtherDecided
        };
    }

    match second.begin_claim() {
        Ok(()) => {
            ours.commit(our_branch);
            theirs.commit(their_branch);
            Claim::Won
        }
        Err(_) => {
            first.cancel_claim();
            if ours_first {
                Claim::OtherDecided
            } else {
                Claim::SelfDecided
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_alone_is_single_shot() {
        let pick = Pick::new();
        assert!(pick.decided().is_none());
        assert!(pick.try_claim_alone(3));
        assert_eq!(pick.decided(), Some(3));
        assert!(!pick.try_claim_alone(4));
        assert_eq!(pick.decided(), Some(3));
    }

    #[test]
    fn pair_claim_commits_both() {
        let a = Arc::new(Pick::new());
        let b = Arc::new(Pick::new());
        assert!(matches!(claim_pair(&a, 0, &b, 2), Claim::Won));
        assert_eq!(a.decided(), Some(0));
        assert_eq!(b.decided(), Some(2));
    }

    #[test]
    fn pair_claim_reports_which_side_was_stale() {
        let a = Arc::new(Pick::new());
        let b = Arc::new(Pick::new());
        assert!(b.try_claim_alone(1));
        assert!(matches!(claim_pair(&a, 0, &b, 0), Claim::OtherDecided));
        // The loser's own pick must be claimable again.
        assert!(a.decided().is_none());
        assert!(a.try_claim_alone(0));

        let c = Arc::new(Pick::new());
        let d = Arc::new(Pick::new());
        assert!(c.try_claim_alone(5));
        assert!(matches!(claim_pair(&c, 0, &d, 0), Claim::SelfDecided));
        assert!(d.decided().is_none());
    }

    #[test]
    fn concurrent_pair_claims_pick_at_most_one_winner_per_pick() {
        // Two committers race for the same counter-party pick.
        for _ in 0..200 {
            let shared = Arc::new(Pick::new());
            let a = Arc::new(Pick::new());
            let b = Arc::new(Pick::new());

            let t1 = {
                let shared = shared.clone();
                let a = a.clone();
                std::thread::spawn(move || matches!(claim_pair(&a, 0, &shared, 7), Claim::Won))
            };
            let t2 = {
                let shared = shared.clone();
                let b = b.clone();
                std::thread::spawn(move || matches!(claim_pair(&b, 0, &shared, 9), Claim::Won))
            };

            let w1 = t1.join().unwrap();
            let w2 = t2.join().unwrap();
            assert!(w1 ^ w2, "exactly one committer must win the shared pick");
            assert!(shared.decided().is_some());
        }
    }
}
