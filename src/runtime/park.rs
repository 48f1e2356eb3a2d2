use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// One park event per worker.
///
/// `set` may race with a timed-out `wait`; the flag is consumed on the next
/// wait, which at worst wakes the worker spuriously — the worker re-checks
/// the shared stack under the scheduler lock before sleeping again, so no
/// wakeup is lost and no stale signal blocks anything.
pub(crate) struct ParkEvent {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl ParkEvent {
    pub(crate) fn new() -> ParkEvent {
        ParkEvent {
            flag: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn set(&self) {
        let mut signaled = self.flag.lock();
        *signaled = true;
        self.cond.notify_one();
    }

    /// Blocks until `set` or until `timeout` elapses (forever when `None`).
    pub(crate) fn wait(&self, timeout: Option<Duration>) {
        let mut signaled = self.flag.lock();
        match timeout {
            None => {
                while !*signaled {
                    self.cond.wait(&mut signaled);
                }
            }
            Some(dur) => {
                let deadline = std::time::Instant::now() + dur;
                while !*signaled {
                    if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        *signaled = false;
    }
}
