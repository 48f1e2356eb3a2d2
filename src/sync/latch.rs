use crate::alt::{ContFactory, Flow, PickSession};
use crate::job::Exec;
use crate::runtime::Worker;
use crate::sync::channel::Taker;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::mem;

/// One-shot event, the IVar-like primitive behind `with_nack` and `after`.
///
/// Once set it stays available: any number of picks can synchronise on it,
/// before or after the set. Waiters registered before the set are claimed
/// through the normal pick protocol when it fires, so a waiter whose pick
/// already committed elsewhere is simply dropped.
pub(crate) struct Latch {
    state: Mutex<LatchState>,
}

enum LatchState {
    Open(VecDeque<Taker<()>>),
    Set,
}

impl Latch {
    pub(crate) fn new() -> Latch {
        Latch {
            state: Mutex::new(LatchState::Open(VecDeque::new())),
        }
    }

    /// Fires the latch. Idempotent. Claimable waiters resume with `()`
    /// through `exec`; this runs on whatever context commits (a worker, or
    /// the timer thread submitting through the scheduler).
    pub(crate) fn set(&self, exec: &mut dyn Exec) {
        let takers = {
            let mut state = self.state.lock();
            match mem::replace(&mut *state, LatchState::Set) {
                LatchState::Open(takers) => takers,
                LatchState::Set => return,
            }
        };
        for mut taker in takers {
            if taker.pick.try_claim_alone(taker.branch) {
                let mut cont = taker.cont.take().expect("latch waiter resumed twice");
                cont.put(());
                exec.submit(cont);
                taker.pick.fire_nacks(exec, taker.branch);
            }
        }
    }

    /// Registers a take offer, or commits immediately when already set.
    pub(crate) fn try_take(
        &self,
        wr: &mut Worker,
        sess: &PickSession,
        branch: u32,
        k: ContFactory<()>,
    ) -> Flow {
        let mut state = self.state.lock();
        match &mut *state {
            LatchState::Open(takers) => {
                takers.push_back(Taker {
                    pick: sess.pick.clone(),
                    branch,
                    cont: Some(k()),
                });
                Flow::Pending
            }
            LatchState::Set => {
                drop(state);
                if sess.pick.try_claim_alone(branch) {
                    sess.pick.fire_nacks(&mut *wr, branch);
                    let own = k();
                    wr.resume(own, ());
                }
                Flow::Done
            }
        }
    }
}
