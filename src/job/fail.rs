use crate::job::work::{Link, Work, WorkBox, WorkList};
use crate::job::Fault;
use crate::runtime::Worker;

/// Work item built when a run step unwinds past every local catch site.
///
/// It carries the faulting worker's displaced stack, the fault, and the work
/// item the fault is attributed to, and is handed off whole to the shared
/// scheduler; the worker that built it re-enters scheduling with an empty
/// stack. Whichever worker picks it up puts the displaced stack back and
/// hands the fault to the faulted item's `fault` hook, which forwards it
/// down its continuation chain (or, with nothing downstream, to the
/// top-level handler).
pub(crate) struct FailWork {
    link: Link,
    stack: WorkList,
    fault: Option<Fault>,
    handler: Option<WorkBox>,
}

impl FailWork {
    pub(crate) fn new(stack: WorkList, fault: Fault, handler: WorkBox) -> WorkBox {
        Box::new(FailWork {
            link: Link::empty(),
            stack,
            fault: Some(fault),
            handler: Some(handler),
        })
    }
}

impl Work for FailWork {
    fn link(&mut self) -> &mut Link {
        &mut self.link
    }

    fn run(&mut self, wr: &mut Worker) {
        wr.requeue(self.stack.take());
        let fault = self.fault.take().expect("fail work ran twice");
        match self.handler.take() {
            Some(mut handler) => handler.fault(wr, fault),
            None => wr.report(fault),
        }
    }

    fn fault(&mut self, wr: &mut Worker, fault: Fault) {
        // A fault attributed to the fail work itself: report both rather
        // than lose either.
        wr.report(fault);
        if let Some(own) = self.fault.take() {
            wr.report(own);
        }
        wr.requeue(self.stack.take());
    }
}
