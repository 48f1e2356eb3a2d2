use crate::job::{job_work, spawn_work, Cont, Fault, Job, Link, Work};
use crate::runtime::scheduler::{IdleHandler, Scheduler, TopLevelHandler};
use crate::runtime::worker::Worker;
use crate::runtime::Idle;
use crate::utils::ScopeGuard;
use anyhow::{anyhow, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::{Arc, Barrier};
use std::thread;

/// Default budget of native stack a worker may consume through direct tail
/// invocations before the trampoline falls back to push-and-return.
const STACK_TRAMPOLINE_BYTES: usize = 256 * 1024;

#[derive(Clone)]
pub(crate) struct ThreadNameFn(pub(crate) Arc<dyn Fn(usize) -> String + Send + Sync + 'static>);

fn default_thread_name_fn() -> ThreadNameFn {
    ThreadNameFn(Arc::new(|index| format!("rondo-worker-{index}")))
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The closure itself isn't printable; show a placeholder.
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// Configures and builds a [`Runtime`].
pub struct Builder {
    /// The number of worker threads. Defaults to 1 worker per CPU core.
    worker_threads: Option<usize>,

    /// Name fn used for threads spawned by the runtime.
    thread_name: ThreadNameFn,

    /// Stack size used for threads spawned by the runtime.
    thread_stack_size: Option<usize>,

    /// Trampoline budget; `0` disables direct invocation entirely.
    stack_trampoline_bytes: usize,

    /// Consulted when a worker finds no work anywhere.
    idle_handler: Option<IdleHandler>,

    /// Sink for faults that no catch frame handled.
    top_level_handler: Option<TopLevelHandler>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            worker_threads: None,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
            stack_trampoline_bytes: STACK_TRAMPOLINE_BYTES,
            idle_handler: None,
            top_level_handler: None,
        }
    }

    #[track_caller]
    pub fn worker_threads(mut self, val: usize) -> Self {
        assert!(val > 0, "worker threads cannot be set to 0");
        self.worker_threads = Some(val);
        self
    }

    /// Sets the name of threads spawned by the runtime's pool.
    ///
    /// The default yields `rondo-worker-{index}`.
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.thread_name = ThreadNameFn(Arc::new(move |index| format!("{val}-{index}")));
        self
    }

    /// Sets the stack size (in bytes) for worker threads. The platform may
    /// round it up.
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        self.thread_stack_size = Some(val);
        self
    }

    /// Sets how much native stack a worker may spend on direct tail
    /// invocations before continuations are pushed instead. `0` means
    /// always push.
    pub fn stack_trampoline_bytes(mut self, val: usize) -> Self {
        self.stack_trampoline_bytes = val;
        self
    }

    /// Installs the idle handler, consulted by a worker that found both its
    /// own stack and the shared stack empty.
    pub fn idle_handler(mut self, f: impl Fn() -> Idle + Send + Sync + 'static) -> Self {
        self.idle_handler = Some(Box::new(f));
        self
    }

    /// Installs the fallback sink for faults no catch frame handled. The
    /// default logs at error level.
    pub fn top_level_handler(mut self, f: impl Fn(&Fault) + Send + Sync + 'static) -> Self {
        self.top_level_handler = Some(Box::new(f));
        self
    }

    /// Creates the configured [`Runtime`]. Worker threads are started before
    /// this returns.
    pub fn try_build(mut self) -> Result<Runtime> {
        let idle_handler = self.idle_handler.take();
        let top_level_handler = self.top_level_handler.take();
        let cfg: RuntimeConfig = self.try_into()?;
        let worker_threads = cfg.worker_threads;

        let sched = Arc::new(Scheduler::new(cfg, idle_handler, top_level_handler));

        // Spawning threads is async; wait until every worker is up so that
        // work injected right after try_build has someone to run it.
        let barrier = Arc::new(Barrier::new(worker_threads + 1));
        let handles = (0..worker_threads)
            .map(|index| spawn_worker_thread(sched.clone(), index, barrier.clone()))
            .collect::<Vec<_>>();
        barrier.wait();

        Ok(Runtime {
            sched,
            handles: Mutex::new(handles),
        })
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("worker_threads", &self.worker_threads)
            .field("thread_name", &self.thread_name)
            .field("thread_stack_size", &self.thread_stack_size)
            .field("stack_trampoline_bytes", &self.stack_trampoline_bytes)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) worker_threads: usize,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
    pub(crate) stack_trampoline_bytes: usize,
}

impl RuntimeConfig {
    fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(anyhow!("worker_threads must be greater than 0"));
        }
        Ok(())
    }
}

impl TryFrom<Builder> for RuntimeConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let worker_threads = match builder.worker_threads {
            Some(n) => n,
            None => thread::available_parallelism()?.get(),
        };

        let cfg = RuntimeConfig {
            worker_threads,
            thread_name: builder.thread_name,
            thread_stack_size: builder.thread_stack_size,
            stack_trampoline_bytes: builder.stack_trampoline_bytes,
        };

        cfg.validate()?;

        Ok(cfg)
    }
}

fn spawn_worker_thread(
    sched: Arc<Scheduler>,
    index: usize,
    barrier: Arc<Barrier>,
) -> thread::JoinHandle<()> {
    let mut builder = thread::Builder::new().name((sched.cfg.thread_name.0)(index));

    if let Some(stack_size) = sched.cfg.thread_stack_size {
        builder = builder.stack_size(stack_size);
    }

    builder
        .spawn(move || {
            barrier.wait();
            tracing::debug!(index, "worker started");

            // A leaving worker always lets one peer re-check the queues, so
            // shutdown propagates even if this thread unwinds.
            let peer = sched.clone();
            let _signal_peer = ScopeGuard::new(move || peer.signal_one());

            let mut worker = Worker::new(index, sched);
            worker.main_loop();

            tracing::debug!(index, "worker stopped");
        })
        .expect("failed to spawn worker thread")
}

/// Handle to a running pool of workers.
///
/// The runtime is embedded as a library: build one, [`spawn`](Runtime::spawn)
/// or [`run`](Runtime::run) jobs on it, and [`shutdown`](Runtime::shutdown)
/// (or drop) when done. Jobs still parked on channels at shutdown are
/// abandoned and reclaimed with their channels.
pub struct Runtime {
    sched: Arc<Scheduler>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Runtime {
    /// Enqueues `job` for eventual execution and returns immediately.
    pub fn spawn(&self, job: Job<()>) {
        self.sched.inject_one(spawn_work(job));
    }

    /// Runs `job` to completion, blocking the calling OS thread.
    ///
    /// This is the entry point from non-runtime threads; the job itself
    /// executes on the pool.
    pub fn run<T: Send + 'static>(&self, job: Job<T>) -> Result<T, Fault> {
        if self.sched.is_shutdown() {
            return Err(Fault::msg("runtime is shut down"));
        }
        let slot = Arc::new(RunSlot::new());
        let cont = Box::new(RunCont {
            link: Link::empty(),
            slot: slot.clone(),
            value: None,
        });
        self.sched.inject_one(job_work(job, cont));
        slot.wait()
    }

    pub fn worker_count(&self) -> usize {
        self.sched.cfg.worker_threads
    }

    /// Stops the pool: every worker observes the flag, signals one peer and
    /// exits. Idempotent. Blocks until all worker threads have exited.
    pub fn shutdown(&self) {
        if self.sched.begin_shutdown() {
            self.sched.stop_timer();
        }
        let mut handles = self.handles.lock();
        for handle in handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("worker_threads", &self.sched.cfg.worker_threads)
            .finish_non_exhaustive()
    }
}

struct RunSlot<T> {
    cell: Mutex<Option<Result<T, Fault>>>,
    cond: Condvar,
}

impl<T> RunSlot<T> {
    fn new() -> RunSlot<T> {
        RunSlot {
            cell: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    fn wait(&self) -> Result<T, Fault> {
        let mut cell = self.cell.lock();
        while cell.is_none() {
            self.cond.wait(&mut cell);
        }
        cell.take().expect("checked in loop condition")
    }

    fn fill(&self, result: Result<T, Fault>) {
        let mut cell = self.cell.lock();
        *cell = Some(result);
        self.cond.notify_one();
    }
}

/// Terminal continuation for [`Runtime::run`]: hands the result (or fault)
/// back to the blocked caller.
struct RunCont<T> {
    link: Link,
    slot: Arc<RunSlot<T>>,
    value: Option<T>,
}

impl<T: Send + 'static> Work for RunCont<T> {
    fn link(&mut self) -> &mut Link {
        &mut self.link
    }

    fn run(&mut self, _wr: &mut Worker) {
        let value = self.value.take().expect("continuation resumed without a value");
        self.slot.fill(Ok(value));
    }

    fn fault(&mut self, _wr: &mut Worker, fault: Fault) {
        self.slot.fill(Err(fault));
    }
}

impl<T: Send + 'static> Cont<T> for RunCont<T> {
    fn put(&mut self, value: T) {
        self.value = Some(value);
    }
}
